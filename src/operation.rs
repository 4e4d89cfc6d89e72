//! Graph operations: load, plan, and hand the plan to an execution sink.
//!
//! The planners themselves never touch storage. These operations wire them to
//! the two storage-facing collaborators: a [`SnapshotSource`] that loads the
//! persisted graph, and a [`MutationSink`] that executes mutations in order.
//! Transactions and retries remain the sink's business.

use std::convert::Infallible;

use thiserror::Error;

use crate::delete::plan_delete;
use crate::error::PlanError;
use crate::ids::{IdSynthesizer, UuidSynthesizer};
use crate::index::entity_id;
use crate::types::*;
use crate::update::plan_update;

/// Loads the persisted graph for a root, with every declared relation.
pub trait SnapshotSource {
    type Error: std::error::Error + 'static;

    fn load(&self, schema: &EntitySchema, root_id: &EntityId) -> Result<GraphSnapshot, Self::Error>;
}

/// Executes mutations, one at a time, in plan order.
pub trait MutationSink {
    type Error: std::error::Error + 'static;

    fn execute(&mut self, mutation: &Mutation) -> Result<(), Self::Error>;
}

/// A mutation the sink refused, and where in the plan it sat.
#[derive(Debug, Error)]
#[error("mutation {index} failed ({mutation}): {source}")]
pub struct ExecutionError<E: std::error::Error + 'static> {
    pub index: usize,
    pub mutation: Mutation,
    pub source: E,
}

#[derive(Debug, Error)]
pub enum OperationError<L, S>
where
    L: std::error::Error + 'static,
    S: std::error::Error + 'static,
{
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("failed to load persisted graph: {0}")]
    Load(#[source] L),

    #[error(transparent)]
    Execute(ExecutionError<S>),
}

/// Run `plan` against `sink` in order, stopping at the first failure.
///
/// Returns the number of mutations executed.
pub fn execute_plan<S: MutationSink>(
    plan: &MutationPlan,
    sink: &mut S,
) -> Result<usize, ExecutionError<S::Error>> {
    for (index, mutation) in plan.iter().enumerate() {
        if let Err(source) = sink.execute(mutation) {
            tracing::warn!(index, mutation = %mutation, error = %source, "mutation failed");
            return Err(ExecutionError {
                index,
                mutation: mutation.clone(),
                source,
            });
        }
    }
    Ok(plan.len())
}

// ── Update graph ──

/// Replace the persisted graph of a root with a desired one.
pub struct UpdateGraphOperation<'a, I = UuidSynthesizer> {
    schema: &'a EntitySchema,
    config: PlannerConfig,
    ids: I,
}

impl<'a> UpdateGraphOperation<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self {
            schema,
            config: PlannerConfig::default(),
            ids: UuidSynthesizer,
        }
    }
}

impl<'a, I: IdSynthesizer> UpdateGraphOperation<'a, I> {
    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_ids<J: IdSynthesizer>(self, ids: J) -> UpdateGraphOperation<'a, J> {
        UpdateGraphOperation {
            schema: self.schema,
            config: self.config,
            ids,
        }
    }

    /// Load the persisted graph for the desired root and plan against it.
    pub fn plan<Src: SnapshotSource>(
        &mut self,
        source: &Src,
        desired: &GraphSnapshot,
    ) -> Result<MutationPlan, OperationError<Src::Error, Infallible>> {
        self.load_and_plan(source, desired)
    }

    /// Plan, then execute the plan against `sink`.
    pub fn run<Src: SnapshotSource, Snk: MutationSink>(
        &mut self,
        source: &Src,
        sink: &mut Snk,
        desired: &GraphSnapshot,
    ) -> Result<MutationPlan, OperationError<Src::Error, Snk::Error>> {
        let plan = self.load_and_plan::<Src, Snk::Error>(source, desired)?;
        execute_plan(&plan, sink).map_err(OperationError::Execute)?;
        Ok(plan)
    }

    fn load_and_plan<Src, E>(
        &mut self,
        source: &Src,
        desired: &GraphSnapshot,
    ) -> Result<MutationPlan, OperationError<Src::Error, E>>
    where
        Src: SnapshotSource,
        E: std::error::Error + 'static,
    {
        let root_id = entity_id(&self.schema.type_name, desired.root(), &self.config.id_field)?
            .ok_or(PlanError::MissingRootId)?;
        let persisted = source
            .load(self.schema, &root_id)
            .map_err(OperationError::Load)?;
        Ok(plan_update(
            self.schema,
            &persisted,
            desired,
            &self.config,
            &mut self.ids,
        )?)
    }
}

// ── Delete graph ──

/// Remove a root and everything it owns.
pub struct DeleteGraphOperation<'a> {
    schema: &'a EntitySchema,
    config: PlannerConfig,
}

impl<'a> DeleteGraphOperation<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self {
            schema,
            config: PlannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plan(&self, root_id: &EntityId) -> Result<MutationPlan, PlanError> {
        plan_delete(self.schema, root_id, &self.config)
    }

    pub fn run<Snk: MutationSink>(
        &self,
        sink: &mut Snk,
        root_id: &EntityId,
    ) -> Result<MutationPlan, OperationError<Infallible, Snk::Error>> {
        let plan = self.plan(root_id)?;
        execute_plan(&plan, sink).map_err(OperationError::Execute)?;
        Ok(plan)
    }
}
