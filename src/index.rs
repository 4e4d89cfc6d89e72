//! Identity index: classify related entities by primary key alone.

use indexmap::IndexSet;
use serde_json::Value;

use crate::error::{PlanError, PlanResult};
use crate::types::{EntityId, Payload};

/// Added / removed / retained identities for one relation.
///
/// All three sets are disjoint and keep first-seen order: `added` and
/// `retained` follow the desired list, `removed` follows the persisted list.
/// Entities without an identity never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityIndex {
    pub added: IndexSet<EntityId>,
    pub removed: IndexSet<EntityId>,
    pub retained: IndexSet<EntityId>,
}

impl IdentityIndex {
    /// Compare the `old` and `new` entity lists of relation `owner`.
    pub fn build(
        owner: &str,
        old: &[Payload],
        new: &[Payload],
        id_field: &str,
    ) -> PlanResult<Self> {
        let old_ids = identities(owner, old, id_field)?;
        let new_ids = identities(owner, new, id_field)?;

        let mut index = IdentityIndex::default();
        for id in &new_ids {
            if old_ids.contains(id) {
                index.retained.insert(id.clone());
            } else {
                index.added.insert(id.clone());
            }
        }
        for id in old_ids {
            if !new_ids.contains(&id) {
                index.removed.insert(id);
            }
        }
        Ok(index)
    }

    pub fn is_added(&self, id: &EntityId) -> bool {
        self.added.contains(id)
    }

    pub fn is_removed(&self, id: &EntityId) -> bool {
        self.removed.contains(id)
    }

    pub fn is_retained(&self, id: &EntityId) -> bool {
        self.retained.contains(id)
    }

    /// No identity entered or left the relation.
    pub fn is_stable(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Identity of `entity`, or `None` when the id field is absent or null.
///
/// Strings are taken verbatim and numbers keep their JSON type, matching by
/// decimal text. Any other JSON type cannot identify a row.
pub fn entity_id(owner: &str, entity: &Payload, id_field: &str) -> PlanResult<Option<EntityId>> {
    match entity.get(id_field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(EntityId::new(s.as_str()))),
        Some(Value::Number(n)) => Ok(Some(EntityId::from_number(n.clone()))),
        Some(other) => Err(PlanError::invalid_identity(owner, other.to_string())),
    }
}

fn identities(owner: &str, entities: &[Payload], id_field: &str) -> PlanResult<IndexSet<EntityId>> {
    let mut ids = IndexSet::with_capacity(entities.len());
    for entity in entities {
        if let Some(id) = entity_id(owner, entity, id_field)? {
            ids.insert(id);
        }
    }
    Ok(ids)
}
