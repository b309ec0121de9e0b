//! Profiling and tracing collectors for simbase simulators
//!
//! Each simulated processor owns one [`ProfileData`] and one [`TraceData`].
//! Both are plain data updated synchronously by the instruction loop and read
//! by the host at any time.

pub mod profile;
pub mod sink;
pub mod trace;

pub use profile::{Hotspot, ProfileCategory, ProfileData};
pub use sink::{DebugSink, MemorySink};
pub use trace::{TraceData, TraceFlags, TraceRecord};
