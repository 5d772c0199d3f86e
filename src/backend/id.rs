//! Record identifier generation

use uuid::Uuid;

/// Source of opaque record identifiers.
///
/// Implementations must not share a lock with the record store and must not
/// be predictable from the sequence of previously issued ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random UUID v4 identifiers (122 bits of entropy)
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
