use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PlanResult;
use crate::util::{qi, ql};

/// Field name → value mapping for one entity row.
pub type Payload = Map<String, Value>;

// ── Relation kind (closed set of ownership semantics) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// One-to-many; child rows carry a foreign key to the root.
    OwnedCollection,
    /// Association mediated by a join table.
    ManyToMany,
    /// Read-only association; never mutated.
    Reference,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnedCollection => "owned_collection",
            Self::ManyToMany => "many_to_many",
            Self::Reference => "reference",
        }
    }
}

// ── Join specification (many-to-many only) ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    #[serde(default)]
    pub through_type: Option<String>,
    /// Join column holding the root id.
    pub from_column: String,
    /// Join column holding the related entity id.
    pub to_column: String,
}

impl JoinSpec {
    pub fn new(
        through_type: impl Into<String>,
        from_column: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            through_type: Some(through_type.into()),
            from_column: from_column.into(),
            to_column: to_column.into(),
        }
    }
}

// ── Relation mapping (supplied by the metadata provider) ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMapping {
    pub kind: RelationKind,
    pub related_type: String,
    /// Foreign-key field on the related row pointing back at the root.
    #[serde(default)]
    pub relation_field: Option<String>,
    /// The related type is not owned by the root. Only meaningful for
    /// many-to-many relations, where the join row is still managed.
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub join: Option<JoinSpec>,
}

impl RelationMapping {
    pub fn owned_collection(
        related_type: impl Into<String>,
        relation_field: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::OwnedCollection,
            related_type: related_type.into(),
            relation_field: Some(relation_field.into()),
            reference: false,
            join: None,
        }
    }

    pub fn many_to_many(related_type: impl Into<String>, join: JoinSpec) -> Self {
        Self {
            kind: RelationKind::ManyToMany,
            related_type: related_type.into(),
            relation_field: None,
            reference: false,
            join: Some(join),
        }
    }

    pub fn reference(related_type: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::Reference,
            related_type: related_type.into(),
            relation_field: None,
            reference: true,
            join: None,
        }
    }

    /// Mark the related type as a non-owned reference.
    pub fn as_reference(mut self) -> Self {
        self.reference = true;
        self
    }

    pub fn with_relation_field(mut self, relation_field: impl Into<String>) -> Self {
        self.relation_field = Some(relation_field.into());
        self
    }
}

// ── Entity schema (root type plus its declared relations, in order) ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub type_name: String,
    #[serde(default)]
    pub relations: IndexMap<String, RelationMapping>,
}

impl EntitySchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relations: IndexMap::new(),
        }
    }

    pub fn with_relation(mut self, name: impl Into<String>, mapping: RelationMapping) -> Self {
        self.relations.insert(name.into(), mapping);
        self
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMapping> {
        self.relations.get(name)
    }

    /// Parse a schema from its JSON form. Relation order follows the document.
    pub fn from_json(json: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ── Planner configuration ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Primary-key field present on every persisted entity.
    pub id_field: String,
    /// Record a classification trace on the produced plan.
    pub trace: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            trace: false,
        }
    }
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }
}

// ── Entity identity ──

/// Identity of one entity row.
///
/// Ids compare by their text, so `7` and `"7"` name the same row. The JSON
/// value the id was read from is kept and is what gets written back into
/// predicates, foreign keys and join rows.
#[derive(Debug, Clone)]
pub struct EntityId {
    key: String,
    value: Value,
}

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        let key = id.into();
        Self {
            value: Value::String(key.clone()),
            key,
        }
    }

    pub fn from_number(n: serde_json::Number) -> Self {
        Self {
            key: n.to_string(),
            value: Value::Number(n),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn is_numeric(&self) -> bool {
        self.value.is_number()
    }

    pub fn to_value(&self) -> Value {
        self.value.clone()
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for EntityId {}

impl std::hash::Hash for EntityId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for EntityId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl Serialize for EntityId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::from_number(id.into())
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self::from_number(id.into())
    }
}

// ── Graph snapshot (one side of the diff) ──

/// Point-in-time copy of a root entity and its related entities.
///
/// Snapshots own their data; nothing the caller does after construction can
/// reach into them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphSnapshot {
    root: Payload,
    relations: IndexMap<String, Vec<Payload>>,
}

impl GraphSnapshot {
    pub fn new(root: Payload) -> Self {
        Self {
            root,
            relations: IndexMap::new(),
        }
    }

    pub fn with_relation(mut self, name: impl Into<String>, entities: Vec<Payload>) -> Self {
        self.relations.insert(name.into(), entities);
        self
    }

    pub fn root(&self) -> &Payload {
        &self.root
    }

    /// Related entities under `name`; empty when the relation was not loaded.
    pub fn relation(&self, name: &str) -> &[Payload] {
        self.relations.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }
}

// ── Match predicate (conjunction of equality constraints) ──

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct MatchPredicate(Vec<(String, Value)>);

impl MatchPredicate {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self(vec![(column.into(), value)])
    }

    pub fn and(mut self, column: impl Into<String>, value: Value) -> Self {
        self.0.push((column.into(), value));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.0
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// True when every clause holds for `row`.
    pub fn matches(&self, row: &Payload) -> bool {
        self.0.iter().all(|(c, v)| row.get(c) == Some(v))
    }
}

impl fmt::Display for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .0
            .iter()
            .map(|(c, v)| format!("{} = {}", qi(c), ql(v)))
            .collect();
        f.write_str(&clauses.join(" AND "))
    }
}

// ── Mutation kind (declaration order is plan order) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

// ── Mutation descriptor ──

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert {
        entity_type: String,
        payload: Payload,
    },
    Update {
        entity_type: String,
        payload: Payload,
        filter: MatchPredicate,
    },
    Delete {
        entity_type: String,
        filter: MatchPredicate,
    },
}

impl Mutation {
    pub fn insert(entity_type: impl Into<String>, payload: Payload) -> Self {
        Self::Insert {
            entity_type: entity_type.into(),
            payload,
        }
    }

    pub fn update(
        entity_type: impl Into<String>,
        payload: Payload,
        filter: MatchPredicate,
    ) -> Self {
        Self::Update {
            entity_type: entity_type.into(),
            payload,
            filter,
        }
    }

    pub fn delete(entity_type: impl Into<String>, filter: MatchPredicate) -> Self {
        Self::Delete {
            entity_type: entity_type.into(),
            filter,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Insert { .. } => MutationKind::Insert,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            Self::Insert { entity_type, .. }
            | Self::Update { entity_type, .. }
            | Self::Delete { entity_type, .. } => entity_type,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Insert { payload, .. } | Self::Update { payload, .. } => Some(payload),
            Self::Delete { .. } => None,
        }
    }

    pub fn filter(&self) -> Option<&MatchPredicate> {
        match self {
            Self::Update { filter, .. } | Self::Delete { filter, .. } => Some(filter),
            Self::Insert { .. } => None,
        }
    }
}

/// SQL-like rendering, for logs only.
impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert {
                entity_type,
                payload,
            } => {
                let cols: Vec<String> = payload.keys().map(|k| qi(k)).collect();
                let vals: Vec<String> = payload.values().map(ql).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    qi(entity_type),
                    cols.join(", "),
                    vals.join(", ")
                )
            }
            Self::Update {
                entity_type,
                payload,
                filter,
            } => {
                let sets: Vec<String> = payload
                    .iter()
                    .map(|(k, v)| format!("{} = {}", qi(k), ql(v)))
                    .collect();
                write!(
                    f,
                    "UPDATE {} SET {} WHERE {}",
                    qi(entity_type),
                    sets.join(", "),
                    filter
                )
            }
            Self::Delete {
                entity_type,
                filter,
            } => write!(f, "DELETE FROM {} WHERE {}", qi(entity_type), filter),
        }
    }
}

// ── Classification trace ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Added,
    Removed,
    Retained,
    /// Inserted under a freshly synthesized id.
    Synthesized,
    /// Join row moved from one related id to another in the same slot.
    Rewired,
    /// Seen on a reference relation; produces no mutation.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub relation: String,
    pub id: EntityId,
    pub change: Change,
}

// ── Mutation plan (final output) ──

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MutationPlan {
    mutations: Vec<Mutation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    trace: Vec<TraceEntry>,
}

impl MutationPlan {
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn count(&self, kind: MutationKind) -> usize {
        self.mutations.iter().filter(|m| m.kind() == kind).count()
    }

    pub fn inserts(&self) -> usize {
        self.count(MutationKind::Insert)
    }

    pub fn updates(&self) -> usize {
        self.count(MutationKind::Update)
    }

    pub fn deletes(&self) -> usize {
        self.count(MutationKind::Delete)
    }

    /// Classification trace; empty unless `PlannerConfig::trace` was set.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Stable xxh3 hash of the serialized mutations (trace excluded).
    pub fn fingerprint(&self) -> u64 {
        let serialized = serde_json::to_vec(&self.mutations).unwrap_or_default();
        xxhash_rust::xxh3::xxh3_64(&serialized)
    }
}

impl IntoIterator for MutationPlan {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

impl<'a> IntoIterator for &'a MutationPlan {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}

impl fmt::Display for MutationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.mutations.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, m)?;
        }
        Ok(())
    }
}

// ── Plan buckets (per-relation output, concatenated once) ──

#[derive(Debug, Default)]
pub(crate) struct PlanBuckets {
    pub inserts: Vec<Mutation>,
    pub updates: Vec<Mutation>,
    pub deletes: Vec<Mutation>,
}

impl PlanBuckets {
    pub fn extend(&mut self, other: PlanBuckets) {
        self.inserts.extend(other.inserts);
        self.updates.extend(other.updates);
        self.deletes.extend(other.deletes);
    }

    /// Inserts, then updates, then deletes.
    pub fn into_plan(self, trace: Vec<TraceEntry>) -> MutationPlan {
        let mut mutations =
            Vec::with_capacity(self.inserts.len() + self.updates.len() + self.deletes.len());
        mutations.extend(self.inserts);
        mutations.extend(self.updates);
        mutations.extend(self.deletes);
        MutationPlan { mutations, trace }
    }
}
