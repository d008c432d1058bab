//! Infrastructure layer: collaborator seams and their in-memory implementations
//!
//! The physical-tree primitives and composition-boundary rules live behind
//! traits so the engine can be driven against other trees.

pub mod error;
pub mod traits;

pub use error::{InfraError, PhysicalError};
pub use traits::{
    Composition, CompositionEvent, CompositionLog, NativeTree, PhysicalTree, ShadowComposition,
};
