//! Simulation engine for simbase simulators
//!
//! Ties the core pieces together: a [`SimulationState`] owns the processor
//! contexts, the core memory bus, the event queue and the module registry.
//! Architecture-specific simulators embed a state and drive it from their
//! instruction loop.

pub mod cpu;
pub mod modules;
pub mod platform;
pub mod state;

pub use cpu::{CpuContext, DebugFlags, MAX_DEBUG_VALUES};
pub use modules::install_standard_modules;
pub use platform::Platform;
pub use state::{ProgramInfo, SimulationState, StateId, SIM_MAGIC_NUMBER};
