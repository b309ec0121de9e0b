//! Core engine types for the simbase simulator engine
//!
//! This crate provides the architecture-agnostic foundation shared by every
//! simulator built on simbase: error types, configuration, logging, runtime
//! options, machine model tables, the discrete-event scheduler and the module
//! lifecycle registry.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod module;
pub mod options;

pub use config::{BackingStrategy, ByteOrder, Config, LogLevel, OpenKind};
pub use error::{
    AccessKind, ConfigError, CpuError, EventError, LoaderError, MemoryError, ModuleError, Result,
    SimError, StateError,
};
pub use events::{DueEvent, EventDriven, EventHandle, EventQueue};
pub use model::{MachineDesc, ModelDesc, ModelTable};
pub use module::{InfoHook, Module, ModuleHook, ModuleRegistry, ModuleState, UninstallReport};
pub use options::{SimOption, SimOptions};
