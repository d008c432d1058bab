//! Application layer: the document and the observation engine
//!
//! This layer orchestrates domain logic and depends on the collaborator traits.

pub mod document;
pub mod error;
pub mod scenario;
pub mod services;

pub use document::Document;
pub use error::{ApplicationError, ApplicationResult};
pub use scenario::{Scenario, ScenarioEvent, ScenarioOutcome};
pub use services::{
    CallbackResult, Delivery, DeliveryFailure, FlushReport, ObserverHandle, ObserverId,
    SchedulerState,
};
