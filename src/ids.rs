use uuid::Uuid;

use crate::types::EntityId;

/// Source of fresh identities for entities that arrive without one.
///
/// Implementations must never hand out the same id twice.
pub trait IdSynthesizer {
    fn next_id(&mut self) -> EntityId;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSynthesizer;

impl IdSynthesizer for UuidSynthesizer {
    fn next_id(&mut self) -> EntityId {
        EntityId::new(Uuid::new_v4().to_string())
    }
}
