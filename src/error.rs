//! Planner error types.

use thiserror::Error;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors that abort a planning call.
///
/// Two families exist: configuration errors (relation metadata is incomplete)
/// and unresolvable references (the snapshots name something the planner
/// cannot map to a row). Neither is ever skipped; no partial plan is returned.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Relation field is required for owned collection relation: {relation}")]
    MissingRelationField { relation: String },

    #[error("Join specification is required for many-to-many relation: {relation}")]
    MissingJoin { relation: String },

    #[error("Through type is required for many-to-many relation: {relation}")]
    MissingThroughType { relation: String },

    #[error("Join column {column} is empty on many-to-many relation: {relation}")]
    InvalidJoinColumn { relation: String, column: String },

    #[error("Unknown relation: {relation}")]
    UnknownRelation { relation: String },

    #[error("Desired root entity has no identity")]
    MissingRootId,

    #[error("Snapshots describe different roots: persisted {persisted}, desired {desired}")]
    RootMismatch { persisted: String, desired: String },

    #[error("Invalid identity value on {owner}: {value}")]
    InvalidIdentity { owner: String, value: String },

    #[error("Entity at slot {slot} of reference relation {relation} has no identity to associate")]
    UnassociableEntity { relation: String, slot: usize },

    #[error("Invalid graph document: {message}")]
    InvalidDocument { message: String },

    #[error("Invalid planner configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlanError {
    pub fn missing_relation_field(relation: impl Into<String>) -> Self {
        Self::MissingRelationField {
            relation: relation.into(),
        }
    }

    pub fn missing_join(relation: impl Into<String>) -> Self {
        Self::MissingJoin {
            relation: relation.into(),
        }
    }

    pub fn missing_through_type(relation: impl Into<String>) -> Self {
        Self::MissingThroughType {
            relation: relation.into(),
        }
    }

    pub fn invalid_join_column(relation: impl Into<String>, column: impl Into<String>) -> Self {
        Self::InvalidJoinColumn {
            relation: relation.into(),
            column: column.into(),
        }
    }

    pub fn unknown_relation(relation: impl Into<String>) -> Self {
        Self::UnknownRelation {
            relation: relation.into(),
        }
    }

    pub fn root_mismatch(persisted: impl Into<String>, desired: impl Into<String>) -> Self {
        Self::RootMismatch {
            persisted: persisted.into(),
            desired: desired.into(),
        }
    }

    pub fn invalid_identity(owner: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            owner: owner.into(),
            value: value.into(),
        }
    }

    pub fn unassociable_entity(relation: impl Into<String>, slot: usize) -> Self {
        Self::UnassociableEntity {
            relation: relation.into(),
            slot,
        }
    }

    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Relation metadata (or planner configuration) is malformed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingRelationField { .. }
                | Self::MissingJoin { .. }
                | Self::MissingThroughType { .. }
                | Self::InvalidJoinColumn { .. }
                | Self::Config(_)
        )
    }

    /// The snapshots reference something that cannot be resolved to a row.
    pub fn is_unresolvable_reference(&self) -> bool {
        matches!(
            self,
            Self::UnknownRelation { .. }
                | Self::MissingRootId
                | Self::RootMismatch { .. }
                | Self::InvalidIdentity { .. }
                | Self::UnassociableEntity { .. }
                | Self::InvalidDocument { .. }
        )
    }
}
