//! In-process service directory
//!
//! Implements the full directory contract without an external agent:
//! idempotent registration, healthy-only discovery, blocking discovery on a
//! change index, and the health state machine
//! `Passing -> Critical -> Removed`, with `Critical -> Passing` on the next
//! successful check. Checks are fed in by [`super::checker::HealthMonitor`]
//! or directly through [`LocalDirectory::record_check`].

use crate::common::Result;
use crate::directory::types::{
    CheckSpec, Discovery, HealthStatus, Instance, QueryCursor, ServiceDescriptor,
};
use crate::directory::Directory;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Upper bound on one blocking discovery
pub const MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct Entry {
    descriptor: ServiceDescriptor,
    status: HealthStatus,
    consecutive_failures: u32,
    critical_since: Option<Instant>,
    next_check_at: Option<Instant>,
}

#[derive(Debug)]
struct State {
    /// Keyed by service id, so discovery order is stable
    entries: BTreeMap<String, Entry>,
    /// Index of the last change per service name
    service_index: HashMap<String, u64>,
    index: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            service_index: HashMap::new(),
            index: 1,
        }
    }
}

impl State {
    fn bump(&mut self, service: &str) -> u64 {
        self.index += 1;
        self.service_index.insert(service.to_string(), self.index);
        self.index
    }

    fn cursor_for(&self, service: &str) -> QueryCursor {
        // Services never seen sit at the initial index
        QueryCursor::from_index(self.service_index.get(service).copied().unwrap_or(1))
    }

    fn healthy(&self, service: &str, tag: Option<&str>) -> Vec<Instance> {
        self.entries
            .values()
            .filter(|e| e.descriptor.name == service)
            .filter(|e| e.status.is_passing())
            .filter(|e| tag.map_or(true, |t| e.descriptor.tags.iter().any(|x| x == t)))
            .map(|e| e.descriptor.instance())
            .collect()
    }
}

/// A check that is due, handed to the health monitor
#[derive(Debug, Clone)]
pub struct DueCheck {
    pub service_id: String,
    pub check: CheckSpec,
}

/// Health snapshot of one registered instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHealth {
    pub instance: Instance,
    pub status: HealthStatus,
}

pub struct LocalDirectory {
    state: Mutex<State>,
    changed: watch::Sender<u64>,
    closed: AtomicBool,
    failures_before_critical: u32,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::with_failure_threshold(1)
    }

    /// Directory where an instance turns critical after `threshold`
    /// consecutive failed checks.
    pub fn with_failure_threshold(threshold: u32) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            changed,
            closed: AtomicBool::new(false),
            failures_before_critical: threshold.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, index: u64) {
        self.changed.send_replace(index);
    }

    /// Release every blocked discovery with its current answer. Later
    /// blocking calls answer at once.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.changed.send_modify(|_| {});
    }

    fn register_at(&self, descriptor: ServiceDescriptor, now: Instant) -> u64 {
        let mut state = self.lock();
        let existing = state.entries.get(&descriptor.id);
        let (status, critical_since) = match (&descriptor.check, existing) {
            // Same instance re-registering keeps its observed health
            (Some(_), Some(existing)) => (existing.status, existing.critical_since),
            (Some(check), None) => {
                let since = (check.initial_status == HealthStatus::Critical).then_some(now);
                (check.initial_status, since)
            }
            (None, _) => (HealthStatus::Passing, None),
        };
        let next_check_at = descriptor.check.as_ref().map(|_| now);
        let name = descriptor.name.clone();
        tracing::info!("Registered {} ({}) as {}", descriptor.id, name, status);
        state.entries.insert(
            descriptor.id.clone(),
            Entry {
                descriptor,
                status,
                consecutive_failures: 0,
                critical_since,
                next_check_at,
            },
        );
        state.bump(&name)
    }

    /// Feed one health check outcome into the state machine.
    pub fn record_check(&self, service_id: &str, passed: bool) {
        self.record_check_at(service_id, passed, Instant::now());
    }

    pub fn record_check_at(&self, service_id: &str, passed: bool, now: Instant) {
        let threshold = self.failures_before_critical;
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(service_id) else {
            return;
        };

        let transition = if passed {
            entry.consecutive_failures = 0;
            if entry.status == HealthStatus::Critical {
                entry.status = HealthStatus::Passing;
                entry.critical_since = None;
                true
            } else {
                false
            }
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            if entry.status == HealthStatus::Passing && entry.consecutive_failures >= threshold {
                entry.status = HealthStatus::Critical;
                entry.critical_since = Some(now);
                true
            } else {
                false
            }
        };

        if transition {
            let name = entry.descriptor.name.clone();
            let status = entry.status;
            tracing::info!("{} is now {}", service_id, status);
            let index = state.bump(&name);
            drop(state);
            self.publish(index);
        }
    }

    /// Purge instances critical for longer than their deregister-after window.
    pub fn reap_expired(&self) -> Vec<String> {
        self.reap_expired_at(Instant::now())
    }

    pub fn reap_expired_at(&self, now: Instant) -> Vec<String> {
        let mut state = self.lock();
        let expired: Vec<(String, String)> = state
            .entries
            .iter()
            .filter_map(|(id, e)| {
                let since = e.critical_since?;
                let after = e.descriptor.check.as_ref()?.deregister_critical_after;
                (now.saturating_duration_since(since) >= after)
                    .then(|| (id.clone(), e.descriptor.name.clone()))
            })
            .collect();

        if expired.is_empty() {
            return Vec::new();
        }

        let mut index = state.index;
        for (id, name) in &expired {
            state.entries.remove(id);
            index = state.bump(name);
            tracing::warn!("Deregistered {} after staying critical", id);
        }
        drop(state);
        self.publish(index);
        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// Checks whose next run is due, rescheduled one interval ahead.
    pub fn due_checks(&self, now: Instant) -> Vec<DueCheck> {
        let mut state = self.lock();
        let mut due = Vec::new();
        for (id, entry) in state.entries.iter_mut() {
            let (Some(check), Some(at)) = (&entry.descriptor.check, entry.next_check_at) else {
                continue;
            };
            if at <= now {
                entry.next_check_at = Some(now + check.interval);
                due.push(DueCheck {
                    service_id: id.clone(),
                    check: check.clone(),
                });
            }
        }
        due
    }

    /// Every registered instance of `service`, healthy or not
    pub fn health_of(&self, service: &str) -> Vec<InstanceHealth> {
        self.lock()
            .entries
            .values()
            .filter(|e| e.descriptor.name == service)
            .map(|e| InstanceHealth {
                instance: e.descriptor.instance(),
                status: e.status,
            })
            .collect()
    }

    /// Registered service names with their instance counts
    pub fn services(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for entry in self.lock().entries.values() {
            *out.entry(entry.descriptor.name.clone()).or_insert(0) += 1;
        }
        out
    }

    pub fn current_index(&self) -> u64 {
        self.lock().index
    }

    fn snapshot(&self, service: &str, tag: Option<&str>) -> Discovery {
        let state = self.lock();
        Discovery {
            instances: state.healthy(service, tag),
            cursor: state.cursor_for(service),
        }
    }
}

impl Default for LocalDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl Directory for LocalDirectory {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let index = self.register_at(descriptor.clone(), Instant::now());
        self.publish(index);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.remove(service_id) {
            let index = state.bump(&entry.descriptor.name);
            drop(state);
            tracing::info!("Deregistered {}", service_id);
            self.publish(index);
        }
        Ok(())
    }

    async fn discover(
        &self,
        service: &str,
        tag: Option<&str>,
        cursor: Option<QueryCursor>,
        wait: Duration,
    ) -> Result<Discovery> {
        let Some(after) = cursor.filter(|c| c.is_valid()) else {
            return Ok(self.snapshot(service, tag));
        };

        // Subscribe before reading so no change slips between check and wait
        let mut rx = self.changed.subscribe();
        let deadline = tokio::time::Instant::now() + wait.min(MAX_WAIT);
        loop {
            let current = self.snapshot(service, tag);
            if current.cursor > after || self.closed.load(Ordering::SeqCst) {
                return Ok(current);
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Timed out, or the directory is going away
                _ => return Ok(self.snapshot(service, tag)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend(port: u16) -> ServiceDescriptor {
        ServiceDescriptor::new("grpcServer", "127.0.0.1", port)
            .with_tags(["grpc"])
            .with_check(
                CheckSpec::grpc("127.0.0.1", port, "grpcServer")
                    .with_deregister_after(Duration::from_secs(60)),
            )
    }

    async fn discover_now(dir: &LocalDirectory) -> Discovery {
        dir.discover("grpcServer", Some("grpc"), None, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_directory_returns_valid_cursor() {
        let dir = LocalDirectory::new();
        let found = discover_now(&dir).await;
        assert!(found.instances.is_empty());
        assert!(found.cursor.is_valid());
    }

    #[tokio::test]
    async fn test_reregistration_is_idempotent() {
        let dir = LocalDirectory::new();
        let d = backend(50052);
        dir.register(&d).await.unwrap();
        dir.record_check(&d.id, true);
        dir.register(&d).await.unwrap();

        let found = discover_now(&dir).await;
        assert_eq!(found.instances.len(), 1);
        assert_eq!(dir.services().get("grpcServer"), Some(&1));
    }

    #[tokio::test]
    async fn test_new_instance_is_critical_until_checked() {
        let dir = LocalDirectory::new();
        let d = backend(50052);
        dir.register(&d).await.unwrap();
        assert!(discover_now(&dir).await.instances.is_empty());

        dir.record_check(&d.id, true);
        assert_eq!(discover_now(&dir).await.instances, vec![d.instance()]);
    }

    #[tokio::test]
    async fn test_tag_filter() {
        let dir = LocalDirectory::new();
        let d = ServiceDescriptor::new("grpcServer", "127.0.0.1", 1).with_tags(["other"]);
        dir.register(&d).await.unwrap();
        assert!(discover_now(&dir).await.instances.is_empty());
        let untagged = dir
            .discover("grpcServer", None, None, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(untagged.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_state_machine() {
        let dir = LocalDirectory::with_failure_threshold(2);
        let d = backend(50052);
        let t0 = Instant::now();
        dir.register(&d).await.unwrap();
        dir.record_check_at(&d.id, true, t0);
        assert_eq!(dir.health_of("grpcServer")[0].status, HealthStatus::Passing);

        // One failure is below the threshold
        dir.record_check_at(&d.id, false, t0);
        assert_eq!(dir.health_of("grpcServer")[0].status, HealthStatus::Passing);
        dir.record_check_at(&d.id, false, t0);
        assert_eq!(dir.health_of("grpcServer")[0].status, HealthStatus::Critical);
        assert!(discover_now(&dir).await.instances.is_empty());

        // Critical -> Passing immediately on success
        dir.record_check_at(&d.id, true, t0);
        assert_eq!(dir.health_of("grpcServer")[0].status, HealthStatus::Passing);

        // Critical long enough -> Removed
        dir.record_check_at(&d.id, false, t0);
        dir.record_check_at(&d.id, false, t0);
        assert!(dir.reap_expired_at(t0 + Duration::from_secs(30)).is_empty());
        let removed = dir.reap_expired_at(t0 + Duration::from_secs(61));
        assert_eq!(removed, vec![d.id.clone()]);
        assert!(dir.health_of("grpcServer").is_empty());

        // Terminal: checks for a purged id do nothing
        dir.record_check_at(&d.id, true, t0);
        assert!(discover_now(&dir).await.instances.is_empty());
    }

    #[tokio::test]
    async fn test_passing_checks_do_not_bump_index() {
        let dir = LocalDirectory::new();
        let d = backend(50052);
        dir.register(&d).await.unwrap();
        dir.record_check(&d.id, true);
        let before = dir.current_index();
        dir.record_check(&d.id, true);
        dir.record_check(&d.id, true);
        assert_eq!(dir.current_index(), before);
    }

    #[tokio::test]
    async fn test_blocking_discovery_wakes_on_change() {
        let dir = Arc::new(LocalDirectory::new());
        let cursor = discover_now(&dir).await.cursor;

        let waiter = {
            let dir = dir.clone();
            tokio::spawn(async move {
                dir.discover("grpcServer", Some("grpc"), Some(cursor), Duration::from_secs(30))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let d = ServiceDescriptor::new("grpcServer", "127.0.0.1", 50052).with_tags(["grpc"]);
        dir.register(&d).await.unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.instances.len(), 1);
        assert!(found.cursor > cursor);
    }

    #[tokio::test]
    async fn test_blocking_discovery_times_out_unchanged() {
        let dir = LocalDirectory::new();
        let cursor = discover_now(&dir).await.cursor;
        let started = std::time::Instant::now();
        let found = dir
            .discover("grpcServer", Some("grpc"), Some(cursor), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(found.cursor, cursor);
        assert!(found.instances.is_empty());
    }

    #[tokio::test]
    async fn test_other_services_do_not_wake_watchers() {
        let dir = Arc::new(LocalDirectory::new());
        let cursor = discover_now(&dir).await.cursor;
        let waiter = {
            let dir = dir.clone();
            tokio::spawn(async move {
                dir.discover("grpcServer", None, Some(cursor), Duration::from_millis(200))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        dir.register(&ServiceDescriptor::new("httpServer", "127.0.0.1", 8089))
            .await
            .unwrap();
        let found = waiter.await.unwrap();
        assert_eq!(found.cursor, cursor);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let dir = Arc::new(LocalDirectory::new());
        let cursor = discover_now(&dir).await.cursor;
        let waiter = {
            let dir = dir.clone();
            tokio::spawn(async move {
                dir.discover("grpcServer", None, Some(cursor), Duration::from_secs(30))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        dir.close();
        let found = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.cursor, cursor);
    }

    #[test]
    fn test_due_checks_reschedule() {
        let dir = LocalDirectory::new();
        let d = backend(50052);
        let t0 = Instant::now();
        dir.register_at(d.clone(), t0);
        assert_eq!(dir.due_checks(t0).len(), 1);
        assert!(dir.due_checks(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(dir.due_checks(t0 + Duration::from_secs(10)).len(), 1);
    }
}
