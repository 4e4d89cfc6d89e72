use std::collections::HashSet;

use indexmap::IndexSet;

use crate::error::{PlanError, PlanResult};
use crate::ids::IdSynthesizer;
use crate::index::{entity_id, IdentityIndex};
use crate::introspect::{introspect_relation, ResolvedJoin, ResolvedRelation};
use crate::types::*;

/// Main entry point: reconcile `persisted` with `desired` for one root.
///
/// The root is always rewritten. Each declared relation is then diffed by
/// identity and mapped to inserts, updates and deletes according to its kind.
/// A relation whose entity list is identical on both sides produces nothing.
/// The plan is ordered inserts, updates (root first), deletes.
pub fn plan_update(
    schema: &EntitySchema,
    persisted: &GraphSnapshot,
    desired: &GraphSnapshot,
    config: &PlannerConfig,
    ids: &mut dyn IdSynthesizer,
) -> PlanResult<MutationPlan> {
    // Phase 1: Root identity
    let root_id = resolve_root_id(schema, persisted, desired, &config.id_field)?;

    let span = tracing::debug_span!(
        "plan_graph_update",
        root_type = %schema.type_name,
        root_id = %root_id
    );
    let _guard = span.enter();

    check_declared(schema, persisted)?;
    check_declared(schema, desired)?;

    let mut ctx = UpdateContext {
        root_id,
        id_field: &config.id_field,
        trace: config.trace.then(Vec::new),
    };

    // Phase 2: Base mutation
    let mut buckets = PlanBuckets::default();
    buckets.updates.push(Mutation::update(
        &schema.type_name,
        desired.root().clone(),
        ctx.id_filter(&ctx.root_id),
    ));

    // Phase 3: Per-relation diff, in declared order
    for (name, mapping) in &schema.relations {
        let relation = introspect_relation(name, mapping)?;
        let (old, new) = (persisted.relation(name), desired.relation(name));

        // Read-only: ids are only looked at for the trace
        if let ResolvedRelation::Reference { .. } = relation {
            plan_reference(&mut ctx, name, old, new);
            continue;
        }

        let diff = RelationDiff {
            name,
            persisted: old,
            desired: new,
            index: IdentityIndex::build(name, old, new, ctx.id_field)?,
        };

        tracing::trace!(
            relation = name.as_str(),
            kind = mapping.kind.as_str(),
            added = diff.index.added.len(),
            removed = diff.index.removed.len(),
            retained = diff.index.retained.len(),
            "relation diff"
        );

        // An untouched relation is re-applied as is: nothing to write
        if old == new {
            for id in &diff.index.retained {
                ctx.note(name, id, Change::Retained);
            }
            continue;
        }

        let planned = match relation {
            ResolvedRelation::Owned {
                related_type,
                relation_field,
            } => plan_owned(&mut ctx, &diff, related_type, relation_field, ids)?,
            ResolvedRelation::ManyToMany {
                related_type,
                join,
                owns_related: true,
                relation_field,
            } => plan_many_to_many(&mut ctx, &diff, related_type, join, relation_field, ids)?,
            ResolvedRelation::ManyToMany {
                join,
                owns_related: false,
                ..
            } => plan_reference_association(&mut ctx, &diff, join)?,
            ResolvedRelation::Reference { .. } => PlanBuckets::default(),
        };
        buckets.extend(planned);
    }

    // Phase 4: Sequencing
    let plan = buckets.into_plan(ctx.trace.unwrap_or_default());

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(
            inserts = plan.inserts(),
            updates = plan.updates(),
            deletes = plan.deletes(),
            fingerprint = %format!("{:016x}", plan.fingerprint()),
            "graph update planned"
        );
    }

    Ok(plan)
}

// ── Planning state ──

struct UpdateContext<'a> {
    root_id: EntityId,
    id_field: &'a str,
    trace: Option<Vec<TraceEntry>>,
}

impl UpdateContext<'_> {
    fn note(&mut self, relation: &str, id: &EntityId, change: Change) {
        tracing::trace!(relation, id = %id, change = ?change, "classified related entity");
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceEntry {
                relation: relation.to_string(),
                id: id.clone(),
                change,
            });
        }
    }

    fn id_filter(&self, id: &EntityId) -> MatchPredicate {
        MatchPredicate::eq(self.id_field, id.to_value())
    }
}

struct RelationDiff<'a> {
    name: &'a str,
    persisted: &'a [Payload],
    desired: &'a [Payload],
    index: IdentityIndex,
}

/// One desired related entity after classification.
enum Slot<'a> {
    Keyed {
        id: EntityId,
        entity: &'a Payload,
        change: Change,
    },
    Unkeyed {
        slot: usize,
        entity: &'a Payload,
    },
}

// ── Phase 1 helpers ──

fn resolve_root_id(
    schema: &EntitySchema,
    persisted: &GraphSnapshot,
    desired: &GraphSnapshot,
    id_field: &str,
) -> PlanResult<EntityId> {
    let desired_id =
        entity_id(&schema.type_name, desired.root(), id_field)?.ok_or(PlanError::MissingRootId)?;

    if let Some(persisted_id) = entity_id(&schema.type_name, persisted.root(), id_field)? {
        if persisted_id != desired_id {
            return Err(PlanError::root_mismatch(
                persisted_id.as_str(),
                desired_id.as_str(),
            ));
        }
    }
    Ok(desired_id)
}

fn check_declared(schema: &EntitySchema, snapshot: &GraphSnapshot) -> PlanResult<()> {
    match snapshot
        .relation_names()
        .find(|name| !schema.relations.contains_key(*name))
    {
        Some(name) => Err(PlanError::unknown_relation(name)),
        None => Ok(()),
    }
}

// ── Phase 3 helpers ──

/// Desired entities in list order, first occurrence of each identity only.
fn desired_slots<'a>(ctx: &UpdateContext, diff: &RelationDiff<'a>) -> PlanResult<Vec<Slot<'a>>> {
    let mut seen = HashSet::new();
    let mut slots = Vec::with_capacity(diff.desired.len());

    for (slot, entity) in diff.desired.iter().enumerate() {
        match entity_id(diff.name, entity, ctx.id_field)? {
            None => slots.push(Slot::Unkeyed { slot, entity }),
            Some(id) => {
                if !seen.insert(id.clone()) {
                    continue;
                }
                let change = if diff.index.is_added(&id) {
                    Change::Added
                } else {
                    Change::Retained
                };
                slots.push(Slot::Keyed { id, entity, change });
            }
        }
    }
    Ok(slots)
}

fn with_identity(entity: &Payload, id_field: &str, id: &EntityId) -> Payload {
    let mut payload = entity.clone();
    payload.insert(id_field.to_string(), id.to_value());
    payload
}

/// Owned collection: inserted children are stamped with the root id in
/// `relation_field`; retained children are rewritten; removed ones deleted.
fn plan_owned(
    ctx: &mut UpdateContext,
    diff: &RelationDiff,
    related_type: &str,
    relation_field: &str,
    ids: &mut dyn IdSynthesizer,
) -> PlanResult<PlanBuckets> {
    let mut out = PlanBuckets::default();

    for slot in desired_slots(ctx, diff)? {
        match slot {
            Slot::Unkeyed { entity, .. } => {
                let id = ids.next_id();
                ctx.note(diff.name, &id, Change::Synthesized);
                let mut payload = with_identity(entity, ctx.id_field, &id);
                payload.insert(relation_field.to_string(), ctx.root_id.to_value());
                out.inserts.push(Mutation::insert(related_type, payload));
            }
            Slot::Keyed {
                id,
                entity,
                change: Change::Added,
            } => {
                ctx.note(diff.name, &id, Change::Added);
                let mut payload = entity.clone();
                payload.insert(relation_field.to_string(), ctx.root_id.to_value());
                out.inserts.push(Mutation::insert(related_type, payload));
            }
            Slot::Keyed { id, entity, .. } => {
                ctx.note(diff.name, &id, Change::Retained);
                out.updates.push(Mutation::update(
                    related_type,
                    entity.clone(),
                    ctx.id_filter(&id),
                ));
            }
        }
    }

    for id in &diff.index.removed {
        ctx.note(diff.name, id, Change::Removed);
        out.deletes.push(Mutation::delete(related_type, ctx.id_filter(id)));
    }

    Ok(out)
}

/// Many-to-many over an owned related type.
///
/// Added entities get their own row and then a join row. Retained entities
/// are rewritten in place without touching the join row. Removals only drop
/// the join row.
fn plan_many_to_many(
    ctx: &mut UpdateContext,
    diff: &RelationDiff,
    related_type: &str,
    join: ResolvedJoin,
    relation_field: Option<&str>,
    ids: &mut dyn IdSynthesizer,
) -> PlanResult<PlanBuckets> {
    let mut out = PlanBuckets::default();

    for slot in desired_slots(ctx, diff)? {
        match slot {
            Slot::Unkeyed { entity, .. } => {
                let id = ids.next_id();
                ctx.note(diff.name, &id, Change::Synthesized);
                let mut payload = with_identity(entity, ctx.id_field, &id);
                if let Some(field) = relation_field {
                    payload.insert(field.to_string(), ctx.root_id.to_value());
                }
                out.inserts.push(Mutation::insert(related_type, payload));
                out.inserts.push(Mutation::insert(
                    join.through_type,
                    join.row(&ctx.root_id, &id),
                ));
            }
            Slot::Keyed {
                id,
                entity,
                change: Change::Added,
            } => {
                ctx.note(diff.name, &id, Change::Added);
                let mut payload = entity.clone();
                if let Some(field) = relation_field {
                    payload.insert(field.to_string(), ctx.root_id.to_value());
                }
                out.inserts.push(Mutation::insert(related_type, payload));
                out.inserts.push(Mutation::insert(
                    join.through_type,
                    join.row(&ctx.root_id, &id),
                ));
            }
            Slot::Keyed { id, entity, .. } => {
                ctx.note(diff.name, &id, Change::Retained);
                out.updates.push(Mutation::update(
                    related_type,
                    entity.clone(),
                    ctx.id_filter(&id),
                ));
            }
        }
    }

    for id in &diff.index.removed {
        ctx.note(diff.name, id, Change::Removed);
        out.deletes.push(Mutation::delete(
            join.through_type,
            join.association(&ctx.root_id, id),
        ));
    }

    Ok(out)
}

/// Many-to-many over a reference type: only join rows are managed.
///
/// When a slot that held a removed id now holds an added id, the existing
/// join row is repointed instead of deleted and re-inserted. Desired entities
/// without an identity cannot be associated and abort the plan.
fn plan_reference_association(
    ctx: &mut UpdateContext,
    diff: &RelationDiff,
    join: ResolvedJoin,
) -> PlanResult<PlanBuckets> {
    let mut out = PlanBuckets::default();
    let mut rewired_old: HashSet<EntityId> = HashSet::new();
    let mut rewired_new: HashSet<EntityId> = HashSet::new();

    for (old, new) in diff.persisted.iter().zip(diff.desired) {
        let (Some(old_id), Some(new_id)) = (
            entity_id(diff.name, old, ctx.id_field)?,
            entity_id(diff.name, new, ctx.id_field)?,
        ) else {
            continue;
        };
        if diff.index.is_removed(&old_id)
            && diff.index.is_added(&new_id)
            && !rewired_old.contains(&old_id)
            && !rewired_new.contains(&new_id)
        {
            ctx.note(diff.name, &new_id, Change::Rewired);
            out.updates.push(Mutation::update(
                join.through_type,
                join.retarget(&new_id),
                join.association(&ctx.root_id, &old_id),
            ));
            rewired_old.insert(old_id);
            rewired_new.insert(new_id);
        }
    }

    for slot in desired_slots(ctx, diff)? {
        match slot {
            Slot::Unkeyed { slot, .. } => {
                return Err(PlanError::unassociable_entity(diff.name, slot));
            }
            Slot::Keyed {
                id,
                change: Change::Added,
                ..
            } => {
                if rewired_new.contains(&id) {
                    continue;
                }
                ctx.note(diff.name, &id, Change::Added);
                out.inserts.push(Mutation::insert(
                    join.through_type,
                    join.row(&ctx.root_id, &id),
                ));
            }
            Slot::Keyed { id, .. } => ctx.note(diff.name, &id, Change::Retained),
        }
    }

    for id in &diff.index.removed {
        if rewired_old.contains(id) {
            continue;
        }
        ctx.note(diff.name, id, Change::Removed);
        out.deletes.push(Mutation::delete(
            join.through_type,
            join.association(&ctx.root_id, id),
        ));
    }

    Ok(out)
}

/// Plain reference: never mutated, whatever either side holds. Entities
/// without a usable id are left out of the trace.
fn plan_reference(ctx: &mut UpdateContext, relation: &str, old: &[Payload], new: &[Payload]) {
    let ids: IndexSet<EntityId> = new
        .iter()
        .chain(old)
        .filter_map(|entity| entity_id(relation, entity, ctx.id_field).ok().flatten())
        .collect();
    for id in &ids {
        ctx.note(relation, id, Change::Ignored);
    }
}
