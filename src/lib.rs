//! Dual-tree node overlay with batched subtree mutation observers.
//!
//! A [`Document`] owns an arena of nodes whose logical structure may be
//! overlaid on top of a physical one. Every structural, attribute and
//! character-data change is recorded for the observers registered on the
//! target or (with `subtree`) one of its ancestors, and delivered in
//! batches by [`Document::flush`].

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;

pub use application::{
    ApplicationError, ApplicationResult, Document, FlushReport, ObserverId, Scenario,
};
pub use config::Settings;
pub use domain::{ChangeKind, ChangeRecord, ConfigurationError, DomainError, NodeId, ObserverInit};
