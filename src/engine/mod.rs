//! Constraint Engine
//! Mission: Turn logical relations between contracts into hard probability bounds

pub mod bounds;
pub mod constraint;
pub mod registry;

pub use bounds::BoundCalculator;
pub use constraint::{Constraint, ConstraintKind, ConstraintViolation, ProbabilityBound, Relation};
pub use registry::{ConstraintEngine, ConstraintRecord};
