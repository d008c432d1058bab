//! Infrastructure-level errors (wraps application errors)

use thiserror::Error;

use crate::application::ApplicationError;
use crate::domain::NodeId;

/// Failures reported by a physical-tree collaborator.
///
/// These propagate to the caller unchanged; the core never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhysicalError {
    #[error("physical node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("{child} is not a physical child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("inserting {node} under {parent} would create a cycle")]
    HierarchyRequest { parent: NodeId, node: NodeId },

    #[error("physical operation rejected: {0}")]
    Rejected(String),
}

/// Infrastructure errors wrap application errors and add I/O-level concerns.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("{0}")]
    Application(#[from] ApplicationError),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InfraError {
    /// Create an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
