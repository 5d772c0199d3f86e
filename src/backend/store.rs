//! In-memory record store
//!
//! All records live in one map behind a single reader/writer lock: any number
//! of concurrent readers or exactly one writer. Callers only ever receive
//! clones, never references into the map. Nothing is persisted; a process
//! restart starts from an empty store.

use crate::backend::id::{IdGenerator, UuidGenerator};
use crate::common::{Error, FieldUpdate, NewRecord, Record, RecordRules, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Attempts at drawing a fresh id before giving up on a create
const MAX_ID_ATTEMPTS: usize = 4;

/// Source of record timestamps (Unix seconds)
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        crate::common::timestamp_now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Entry {
    record: Record,
    /// Insertion sequence, breaks `created_at` ties
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Entry>,
    next_seq: u64,
    /// Latest timestamp handed out; keeps stamps monotonic if the clock steps back
    last_stamp: i64,
}

impl Inner {
    fn stamp(&mut self, now: i64) -> i64 {
        self.last_stamp = self.last_stamp.max(now);
        self.last_stamp
    }
}

/// Concurrency-safe keyed record collection ordered by creation time
pub struct RecordStore {
    inner: RwLock<Inner>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    rules: RecordRules,
}

impl RecordStore {
    /// Store with UUID ids and the wall clock
    pub fn new(rules: RecordRules) -> Self {
        Self::with_parts(rules, Arc::new(UuidGenerator), Arc::new(SystemClock))
    }

    pub fn with_parts(
        rules: RecordRules,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            ids,
            clock,
            rules,
        }
    }

    pub fn rules(&self) -> &RecordRules {
        &self.rules
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and insert a new record, returning its id.
    pub fn create(&self, fields: NewRecord) -> Result<String> {
        self.rules.validate(&fields)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            // Drawn outside the lock
            let id = self.ids.generate();
            let now = self.clock.now();

            let mut inner = self.write();
            if inner.records.contains_key(&id) {
                tracing::warn!("Identifier collision on {}, drawing again", id);
                continue;
            }
            let stamp = inner.stamp(now);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let record = Record {
                id: id.clone(),
                name: fields.name.clone(),
                age: fields.age,
                category: fields.category.clone(),
                created_at: stamp,
                modified_at: stamp,
            };
            inner.records.insert(id.clone(), Entry { record, seq });
            return Ok(id);
        }

        Err(Error::Internal(
            "could not draw a unique record identifier".into(),
        ))
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        self.read()
            .records
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Apply a single-field change and return the updated record.
    pub fn update(&self, id: &str, update: FieldUpdate) -> Result<Record> {
        let now = self.clock.now();

        let mut inner = self.write();
        if !inner.records.contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        self.rules.validate_update(&update)?;
        let stamp = inner.stamp(now);
        let entry = inner
            .records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let record = &mut entry.record;
        match update {
            FieldUpdate::Name(name) => record.name = name,
            FieldUpdate::Age(age) => record.age = age,
            FieldUpdate::Category(category) => record.category = category,
        }
        record.modified_at = stamp.max(record.created_at);
        Ok(record.clone())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.write()
            .records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Snapshot of every record, newest first.
    ///
    /// The shared lock is held only while copying; sorting happens after it
    /// is released.
    pub fn list_all(&self) -> Vec<Record> {
        let mut snapshot: Vec<(u64, Record)> = {
            let inner = self.read();
            inner
                .records
                .values()
                .map(|e| (e.seq, e.record.clone()))
                .collect()
        };

        snapshot.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        snapshot.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(RecordRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn store_with_clock(start: i64) -> (RecordStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = RecordStore::with_parts(
            RecordRules::default(),
            Arc::new(UuidGenerator),
            clock.clone(),
        );
        (store, clock)
    }

    fn alice() -> NewRecord {
        NewRecord::new("Alice", 20, "Software Engineering")
    }

    #[test]
    fn test_create_then_get() {
        let (store, _) = store_with_clock(1_700_000_000);
        let id = store.create(alice()).unwrap();
        assert!(!id.is_empty());

        let record = store.get(&id).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.name, "Alice");
        assert_eq!(record.age, 20);
        assert_eq!(record.category, "Software Engineering");
        assert_eq!(record.created_at, 1_700_000_000);
        assert_eq!(record.modified_at, record.created_at);
    }

    #[test]
    fn test_invalid_create_leaves_store_untouched() {
        let (store, _) = store_with_clock(0);
        let err = store.create(NewRecord::new("1", 5, "X")).unwrap_err();
        assert_eq!(err.invalid_fields(), vec!["name", "age", "category"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_missing_id() {
        let (store, _) = store_with_clock(0);
        store.create(alice()).unwrap();
        let err = store
            .update("missing", FieldUpdate::Category("Computer Science".into()))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_missing_id_wins_over_bad_value() {
        let (store, _) = store_with_clock(0);
        let id = store.create(alice()).unwrap();
        let err = store
            .update("missing", FieldUpdate::Category("Basket Weaving".into()))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = store
            .update(&id, FieldUpdate::Category("Basket Weaving".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.get(&id).unwrap().category, alice().category);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_refreshes_modified_at() {
        let (store, clock) = store_with_clock(100);
        let id = store.create(alice()).unwrap();
        clock.advance(5);

        let updated = store
            .update(&id, FieldUpdate::Category("Computer Science".into()))
            .unwrap();
        assert_eq!(updated.category, "Computer Science");
        assert_eq!(updated.created_at, 100);
        assert_eq!(updated.modified_at, 105);
        assert_eq!(store.get(&id).unwrap(), updated);
    }

    #[test]
    fn test_invalid_update_keeps_record() {
        let (store, clock) = store_with_clock(100);
        let id = store.create(alice()).unwrap();
        clock.advance(1);
        assert!(matches!(
            store.update(&id, FieldUpdate::Age(500)),
            Err(Error::Validation(_))
        ));
        let record = store.get(&id).unwrap();
        assert_eq!(record.age, 20);
        assert_eq!(record.modified_at, 100);
    }

    #[test]
    fn test_delete() {
        let (store, _) = store_with_clock(0);
        let id = store.create(alice()).unwrap();
        store.delete(&id).unwrap();
        assert!(matches!(store.get(&id), Err(Error::NotFound(_))));
        assert!(matches!(store.delete(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let (store, clock) = store_with_clock(1000);
        let a = store.create(NewRecord::new("A", 20, "Computer Science")).unwrap();
        clock.advance(1);
        let b = store.create(NewRecord::new("B", 21, "Computer Science")).unwrap();
        clock.advance(1);
        let c = store.create(NewRecord::new("C", 22, "Computer Science")).unwrap();

        let ids: Vec<String> = store.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn test_list_ties_follow_insertion_order() {
        let (store, _) = store_with_clock(1000);
        let first = store.create(NewRecord::new("A", 20, "Computer Science")).unwrap();
        let second = store.create(NewRecord::new("B", 20, "Computer Science")).unwrap();

        let ids: Vec<String> = store.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let (store, _) = store_with_clock(0);
        let id = store.create(alice()).unwrap();
        let snapshot = store.list_all();
        store.delete(&id).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(store.list_all().is_empty());
    }

    #[test]
    fn test_clock_step_back_keeps_stamps_monotonic() {
        let (store, clock) = store_with_clock(500);
        store.create(alice()).unwrap();
        clock.advance(-10);
        let id = store.create(alice()).unwrap();
        assert_eq!(store.get(&id).unwrap().created_at, 500);
    }

    struct CollidingIds {
        calls: AtomicUsize,
    }

    impl IdGenerator for CollidingIds {
        fn generate(&self) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // The first two draws return the same id
            if n < 2 {
                "fixed".to_string()
            } else {
                format!("id-{}", n)
            }
        }
    }

    #[test]
    fn test_collision_draws_again() {
        let store = RecordStore::with_parts(
            RecordRules::default(),
            Arc::new(CollidingIds {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(SystemClock),
        );
        assert_eq!(store.create(alice()).unwrap(), "fixed");
        assert_eq!(store.create(alice()).unwrap(), "id-2");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_parallel_creates() {
        let store = Arc::new(RecordStore::default());
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.create(alice()).unwrap())
            })
            .collect();
        let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ids.len(), 100);
        let listed: HashSet<String> = store.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(listed, ids);
    }
}
