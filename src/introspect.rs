use crate::error::{PlanError, PlanResult};
use crate::types::{EntityId, MatchPredicate, Payload, RelationKind, RelationMapping};

/// A relation mapping that passed validation, dispatched once per relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedRelation<'a> {
    Owned {
        related_type: &'a str,
        relation_field: &'a str,
    },
    ManyToMany {
        related_type: &'a str,
        join: ResolvedJoin<'a>,
        /// False when the related type is a reference (join row only).
        owns_related: bool,
        relation_field: Option<&'a str>,
    },
    Reference {
        related_type: &'a str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedJoin<'a> {
    pub through_type: &'a str,
    pub from_column: &'a str,
    pub to_column: &'a str,
}

impl ResolvedJoin<'_> {
    /// Join row linking `root` to `related`.
    pub fn row(&self, root: &EntityId, related: &EntityId) -> Payload {
        let mut row = Payload::new();
        row.insert(self.from_column.to_string(), root.to_value());
        row.insert(self.to_column.to_string(), related.to_value());
        row
    }

    /// Matches the single join row linking `root` to `related`.
    pub fn association(&self, root: &EntityId, related: &EntityId) -> MatchPredicate {
        MatchPredicate::eq(self.from_column, root.to_value())
            .and(self.to_column, related.to_value())
    }

    /// Matches every join row owned by `root`.
    pub fn owned_by(&self, root: &EntityId) -> MatchPredicate {
        MatchPredicate::eq(self.from_column, root.to_value())
    }

    /// Payload that repoints an association at `related`.
    pub fn retarget(&self, related: &EntityId) -> Payload {
        let mut payload = Payload::new();
        payload.insert(self.to_column.to_string(), related.to_value());
        payload
    }
}

/// Validate one relation mapping and resolve it to its closed form.
///
/// Called lazily as each planner reaches the relation; a malformed mapping is
/// a configuration error and aborts the call.
pub(crate) fn introspect_relation<'a>(
    name: &str,
    mapping: &'a RelationMapping,
) -> PlanResult<ResolvedRelation<'a>> {
    let resolved = match mapping.kind {
        RelationKind::OwnedCollection => non_empty(mapping.relation_field.as_deref())
            .ok_or_else(|| PlanError::missing_relation_field(name))
            .map(|relation_field| ResolvedRelation::Owned {
                related_type: &mapping.related_type,
                relation_field,
            }),
        RelationKind::ManyToMany => introspect_join(name, mapping),
        RelationKind::Reference => Ok(ResolvedRelation::Reference {
            related_type: &mapping.related_type,
        }),
    };

    if let Err(ref err) = resolved {
        tracing::warn!(
            relation = name,
            kind = mapping.kind.as_str(),
            error = %err,
            "malformed relation mapping"
        );
    }
    resolved
}

fn introspect_join<'a>(
    name: &str,
    mapping: &'a RelationMapping,
) -> PlanResult<ResolvedRelation<'a>> {
    let join = mapping
        .join
        .as_ref()
        .ok_or_else(|| PlanError::missing_join(name))?;
    let through_type = non_empty(join.through_type.as_deref())
        .ok_or_else(|| PlanError::missing_through_type(name))?;
    let from_column = non_empty(Some(join.from_column.as_str()))
        .ok_or_else(|| PlanError::invalid_join_column(name, "from_column"))?;
    let to_column = non_empty(Some(join.to_column.as_str()))
        .ok_or_else(|| PlanError::invalid_join_column(name, "to_column"))?;

    Ok(ResolvedRelation::ManyToMany {
        related_type: &mapping.related_type,
        join: ResolvedJoin {
            through_type,
            from_column,
            to_column,
        },
        owns_related: !mapping.reference,
        relation_field: non_empty(mapping.relation_field.as_deref()),
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JoinSpec;
    use serde_json::json;

    #[test]
    fn test_owned_collection_requires_relation_field() {
        let mut mapping = RelationMapping::owned_collection("child", "parent_id");
        mapping.relation_field = None;
        let err = introspect_relation("children", &mapping).unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingRelationField { ref relation } if relation == "children"
        ));
        assert!(err.is_configuration());

        mapping.relation_field = Some("  ".to_string());
        assert!(introspect_relation("children", &mapping).is_err());
    }

    #[test]
    fn test_many_to_many_requires_join_and_through_type() {
        let mut mapping =
            RelationMapping::many_to_many("tag", JoinSpec::new("root_tag", "root_id", "tag_id"));
        mapping.join = None;
        assert!(matches!(
            introspect_relation("tags", &mapping),
            Err(PlanError::MissingJoin { .. })
        ));

        let mut join = JoinSpec::new("root_tag", "root_id", "tag_id");
        join.through_type = None;
        let mapping = RelationMapping::many_to_many("tag", join);
        assert!(matches!(
            introspect_relation("tags", &mapping),
            Err(PlanError::MissingThroughType { .. })
        ));

        let mapping =
            RelationMapping::many_to_many("tag", JoinSpec::new("root_tag", "root_id", ""));
        assert!(matches!(
            introspect_relation("tags", &mapping),
            Err(PlanError::InvalidJoinColumn { ref column, .. }) if column == "to_column"
        ));
    }

    #[test]
    fn test_reference_needs_nothing() {
        let mapping = RelationMapping::reference("user");
        assert_eq!(
            introspect_relation("author", &mapping).unwrap(),
            ResolvedRelation::Reference { related_type: "user" }
        );
    }

    #[test]
    fn test_many_to_many_reference_flag() {
        let join = JoinSpec::new("root_tag", "root_id", "tag_id");
        let mapping = RelationMapping::many_to_many("tag", join).as_reference();
        match introspect_relation("tags", &mapping).unwrap() {
            ResolvedRelation::ManyToMany {
                owns_related,
                relation_field,
                ..
            } => {
                assert!(!owns_related);
                assert_eq!(relation_field, None);
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn test_join_predicates() {
        let join = ResolvedJoin {
            through_type: "root_tag",
            from_column: "root_id",
            to_column: "tag_id",
        };
        let root = EntityId::new("r1");
        let tag = EntityId::new("t1");

        let filter = join.association(&root, &tag);
        assert_eq!(
            filter.clauses(),
            &[
                ("root_id".to_string(), json!("r1")),
                ("tag_id".to_string(), json!("t1"))
            ]
        );
        assert!(filter.matches(&join.row(&root, &tag)));
        assert_eq!(join.owned_by(&root).clauses().len(), 1);
        assert_eq!(join.retarget(&tag).get("tag_id"), Some(&json!("t1")));
    }
}
