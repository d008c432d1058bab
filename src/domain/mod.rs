//! Domain layer: node storage, observer options and change records
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod arena;
pub mod display;
pub mod error;
pub mod options;
pub mod record;

pub use arena::{Attribute, NodeArena, NodeId, NodeKind, NodeRecord, Overlay, Relation};
pub use display::TreeDisplay;
pub use error::{ConfigurationError, DomainError};
pub use options::{ObserverInit, ObserverOptions};
pub use record::{Change, ChangeKind, ChangeRecord};
