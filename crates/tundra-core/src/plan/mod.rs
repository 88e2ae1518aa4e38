//! # Run Plan
//!
//! Stage kinds, subsystem toggles, and resolution of raw stage settings
//! into an immutable, canonically ordered [`RunPlan`].

mod modules;
mod resolver;
mod stage;

pub use modules::{NitrogenCoupling, SubsystemToggles, ToggleFlags};
pub use resolver::{RawConvergence, RawModules, RawStage, RestartMode, StageSettings};
pub use stage::{RestartSource, RunPlan, StageDescriptor, StageKind, fire_cycle_adjusted_years};
