//! Graph mutation planner.
//!
//! Given an entity schema and two snapshots of the same aggregate root (what
//! is persisted and what is desired), produce the ordered list of inserts,
//! updates and deletes that turns one into the other. A second planner
//! produces the cascading deletes that remove a root and everything it owns.
//!
//! Planning is pure: no storage is read or written. The [`operation`] module
//! wires the planners to a [`SnapshotSource`] and a [`MutationSink`].

mod delete;
mod error;
mod ids;
mod index;
mod introspect;
pub mod operation;
mod reader;
mod types;
mod update;
mod util;

pub use error::{PlanError, PlanResult};
pub use ids::{IdSynthesizer, UuidSynthesizer};
pub use index::{entity_id, IdentityIndex};
pub use operation::{
    execute_plan, DeleteGraphOperation, ExecutionError, MutationSink, OperationError,
    SnapshotSource, UpdateGraphOperation,
};
pub use reader::{read_snapshot, read_snapshot_str};
pub use types::{
    Change, EntityId, EntitySchema, GraphSnapshot, JoinSpec, MatchPredicate, Mutation,
    MutationKind, MutationPlan, Payload, PlannerConfig, RelationKind, RelationMapping,
    TraceEntry,
};

/// Plan the mutations that turn `persisted` into `desired`.
///
/// Entities without an identity get a random v4 UUID.
pub fn plan_graph_update(
    schema: &EntitySchema,
    persisted: &GraphSnapshot,
    desired: &GraphSnapshot,
) -> PlanResult<MutationPlan> {
    plan_graph_update_with(
        schema,
        persisted,
        desired,
        &PlannerConfig::default(),
        &mut UuidSynthesizer,
    )
}

pub fn plan_graph_update_with(
    schema: &EntitySchema,
    persisted: &GraphSnapshot,
    desired: &GraphSnapshot,
    config: &PlannerConfig,
    ids: &mut dyn IdSynthesizer,
) -> PlanResult<MutationPlan> {
    update::plan_update(schema, persisted, desired, config, ids)
}

/// Plan the cascading deletes that remove `root_id` and what it owns.
pub fn plan_graph_delete(schema: &EntitySchema, root_id: &EntityId) -> PlanResult<MutationPlan> {
    plan_graph_delete_with(schema, root_id, &PlannerConfig::default())
}

pub fn plan_graph_delete_with(
    schema: &EntitySchema,
    root_id: &EntityId,
    config: &PlannerConfig,
) -> PlanResult<MutationPlan> {
    delete::plan_delete(schema, root_id, config)
}
