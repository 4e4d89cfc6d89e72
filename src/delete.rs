use crate::error::{PlanError, PlanResult};
use crate::introspect::{introspect_relation, ResolvedRelation};
use crate::types::*;

/// Cascading delete for one root: every relation-level delete first, in
/// declared order, then the root row itself.
///
/// Owned collections drop their rows by foreign key. Many-to-many relations
/// drop every join row of the root and, when they own the related type and
/// declare a `relation_field`, the related rows linked by it as well.
/// Reference relations are never cascaded.
pub fn plan_delete(
    schema: &EntitySchema,
    root_id: &EntityId,
    config: &PlannerConfig,
) -> PlanResult<MutationPlan> {
    if root_id.as_str().trim().is_empty() {
        return Err(PlanError::MissingRootId);
    }

    let span = tracing::debug_span!(
        "plan_graph_delete",
        root_type = %schema.type_name,
        root_id = %root_id
    );
    let _guard = span.enter();

    let root = root_id.to_value();
    let mut buckets = PlanBuckets::default();

    for (name, mapping) in &schema.relations {
        match introspect_relation(name, mapping)? {
            ResolvedRelation::Owned {
                related_type,
                relation_field,
            } => {
                buckets.deletes.push(Mutation::delete(
                    related_type,
                    MatchPredicate::eq(relation_field, root.clone()),
                ));
            }
            ResolvedRelation::ManyToMany {
                related_type,
                join,
                owns_related,
                relation_field,
            } => {
                buckets
                    .deletes
                    .push(Mutation::delete(join.through_type, join.owned_by(root_id)));
                if let (true, Some(field)) = (owns_related, relation_field) {
                    buckets.deletes.push(Mutation::delete(
                        related_type,
                        MatchPredicate::eq(field, root.clone()),
                    ));
                }
            }
            ResolvedRelation::Reference { related_type } => {
                tracing::trace!(relation = name.as_str(), related_type, "reference not cascaded");
            }
        }
    }

    buckets.deletes.push(Mutation::delete(
        &schema.type_name,
        MatchPredicate::eq(config.id_field.as_str(), root),
    ));

    let plan = buckets.into_plan(Vec::new());
    tracing::debug!(deletes = plan.deletes(), "graph delete planned");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::new("project")
            .with_relation(
                "tags",
                RelationMapping::many_to_many(
                    "tag",
                    JoinSpec::new("project_tag", "project_id", "tag_id"),
                ),
            )
            .with_relation("tasks", RelationMapping::owned_collection("task", "project_id"))
            .with_relation("owner", RelationMapping::reference("user"))
    }

    #[test]
    fn test_relation_deletes_precede_root_delete() {
        let plan = plan_delete(&schema(), &EntityId::new("p1"), &PlannerConfig::default()).unwrap();
        assert_eq!(
            plan.mutations(),
            &[
                Mutation::delete("project_tag", MatchPredicate::eq("project_id", json!("p1"))),
                Mutation::delete("task", MatchPredicate::eq("project_id", json!("p1"))),
                Mutation::delete("project", MatchPredicate::eq("id", json!("p1"))),
            ]
        );
    }

    #[test]
    fn test_owned_many_to_many_with_relation_field_drops_related_rows() {
        let join = JoinSpec::new("project_file", "project_id", "file_id");
        let schema = EntitySchema::new("project").with_relation(
            "attachments",
            RelationMapping::many_to_many("file", join.clone())
                .with_relation_field("origin_project"),
        );
        let plan = plan_delete(&schema, &EntityId::new("p1"), &PlannerConfig::default()).unwrap();
        assert_eq!(
            plan.mutations(),
            &[
                Mutation::delete("project_file", MatchPredicate::eq("project_id", json!("p1"))),
                Mutation::delete("file", MatchPredicate::eq("origin_project", json!("p1"))),
                Mutation::delete("project", MatchPredicate::eq("id", json!("p1"))),
            ]
        );

        // A reference related type keeps its rows even with a relation field.
        let schema = EntitySchema::new("project").with_relation(
            "attachments",
            RelationMapping::many_to_many("file", join)
                .with_relation_field("origin_project")
                .as_reference(),
        );
        let plan = plan_delete(&schema, &EntityId::new("p1"), &PlannerConfig::default()).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|m| m.entity_type() != "file"));
    }

    #[test]
    fn test_only_references_yields_root_delete() {
        let schema =
            EntitySchema::new("project").with_relation("owner", RelationMapping::reference("user"));
        let plan = plan_delete(&schema, &EntityId::new("p1"), &PlannerConfig::default()).unwrap();
        assert_eq!(
            plan.mutations(),
            &[Mutation::delete("project", MatchPredicate::eq("id", json!("p1")))]
        );
    }

    #[test]
    fn test_malformed_relation_aborts() {
        let mut join = JoinSpec::new("project_tag", "project_id", "tag_id");
        join.through_type = None;
        let schema = EntitySchema::new("project")
            .with_relation("tasks", RelationMapping::owned_collection("task", "project_id"))
            .with_relation("tags", RelationMapping::many_to_many("tag", join));
        let err =
            plan_delete(&schema, &EntityId::new("p1"), &PlannerConfig::default()).unwrap_err();
        assert!(
            matches!(err, PlanError::MissingThroughType { ref relation } if relation == "tags")
        );
    }

    #[test]
    fn test_blank_root_id_rejected() {
        let err =
            plan_delete(&schema(), &EntityId::new(" "), &PlannerConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::MissingRootId));
    }

    #[test]
    fn test_numeric_root_id_matches_numeric_keys() {
        let plan =
            plan_delete(&schema(), &EntityId::from(7i64), &PlannerConfig::default()).unwrap();
        assert_eq!(
            plan.mutations()[0],
            Mutation::delete("project_tag", MatchPredicate::eq("project_id", json!(7)))
        );
        let mut stored = Payload::new();
        stored.insert("id".to_string(), json!(7));
        assert!(plan.mutations()[2].filter().unwrap().matches(&stored));
    }

    #[test]
    fn test_custom_id_field_on_root_delete() {
        let config = PlannerConfig::default().with_id_field("uuid");
        let plan = plan_delete(&schema(), &EntityId::new("p1"), &config).unwrap();
        assert_eq!(
            plan.mutations().last(),
            Some(&Mutation::delete("project", MatchPredicate::eq("uuid", json!("p1"))))
        );
    }
}
