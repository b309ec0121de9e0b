//! Core memory bus for simbase simulators
//!
//! This crate provides the simulated address space: a set of non-overlapping
//! regions, each backed by an owned buffer or a device, with per-region access
//! permissions and an optional access-tracing hook.

pub mod bus;
pub mod hook;
pub mod perms;
pub mod region;

pub use bus::{BusStats, CoreBus};
pub use hook::{AccessHook, AccessLog, AccessRecord};
pub use perms::AccessFlags;
pub use region::{Backing, Device, Region};
