//! Application services
//!
//! The pieces of the observation engine. Each is a concrete struct owned by
//! [`Document`](crate::application::Document); the tree mutator is a set of
//! `Document` methods because it drives all the others.

mod mutator;
pub mod observer;
pub mod recorder;
pub mod registry;
pub mod scheduler;

pub use observer::{CallbackResult, ObserverCallback, ObserverHandle, ObserverId, ObserverTable};
pub use recorder::ChangeRecorder;
pub use registry::{Interest, ObservationRegistry, Registration, RegistrationId};
pub use scheduler::{
    ArmHook, Delivery, DeliveryFailure, FlushReport, NotificationScheduler, SchedulerState,
};
