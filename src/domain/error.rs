//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::arena::NodeId;

/// Invalid observer options, rejected before any registration changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("attributeOldValue or attributeFilter requires attributes to be observed")]
    AttributeOptionsWithoutAttributes,

    #[error("characterDataOldValue requires characterData to be observed")]
    CharacterDataOldValueWithoutCharacterData,
}

/// Domain errors represent violations of tree or observer rules.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("node {child} is not a child of {parent}")]
    NotFound { parent: NodeId, child: NodeId },

    #[error("invalid observer options: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown observer")]
    UnknownObserver,

    #[error("cannot insert {node} into {parent}")]
    HierarchyRequest { parent: NodeId, node: NodeId },

    #[error("node {node} is not {expected}")]
    InvalidNodeKind { node: NodeId, expected: &'static str },

    #[error("node {0} is still attached")]
    NodeAttached(NodeId),

    #[error("inconsistent tree at {node}: {reason}")]
    InconsistentTree { node: NodeId, reason: String },
}
