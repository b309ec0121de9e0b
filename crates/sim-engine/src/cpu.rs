//! Per-processor context shared by every simulated CPU
//!
//! Architecture-specific processor state lives in the simulator; this is the
//! common tail it carries: identity, debug toggles, a debug output sink and
//! the profiling and tracing collectors.

use crate::state::StateId;
use bitflags::bitflags;
use sim_core::CpuError;
use sim_debug::{sink, DebugSink, ProfileData, TraceData};
use std::fmt;
use std::io;

/// Number of per-processor debug toggles
pub const MAX_DEBUG_VALUES: usize = 4;

bitflags! {
    /// Per-processor debug toggles
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u8 {
        /// Instruction-level debugging
        const INSN    = 1 << 0;
        /// Scheduler event debugging
        const EVENTS  = 1 << 1;
        /// First simulator-specific toggle
        const TARGET0 = 1 << 2;
        /// Second simulator-specific toggle
        const TARGET1 = 1 << 3;
    }
}

impl Default for DebugFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl DebugFlags {
    /// Parse a toggle name (`insn`, `events`, `target0`, `target1`)
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_name(&name.to_ascii_uppercase())
    }
}

/// Common state of one simulated processor
pub struct CpuContext {
    index: usize,
    owner: StateId,
    trace: TraceData,
    debug_flags: DebugFlags,
    debug_sink: Option<DebugSink>,
    profile: ProfileData,
}

impl CpuContext {
    pub(crate) fn new(index: usize, owner: StateId, trace_capacity: usize, pc_bucket_size: u64) -> Self {
        Self {
            index,
            owner,
            trace: TraceData::new(trace_capacity),
            debug_flags: DebugFlags::empty(),
            debug_sink: None,
            profile: ProfileData::new(pc_bucket_size),
        }
    }

    /// Position within the owning state
    pub fn index(&self) -> usize {
        self.index
    }

    /// State this processor belongs to
    pub fn owner(&self) -> StateId {
        self.owner
    }

    pub fn trace(&self) -> &TraceData {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceData {
        &mut self.trace
    }

    pub fn profile(&self) -> &ProfileData {
        &self.profile
    }

    pub fn profile_mut(&mut self) -> &mut ProfileData {
        &mut self.profile
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.debug_flags
    }

    /// Turn debug toggles on or off
    pub fn set_debug_flags(&mut self, flags: DebugFlags, on: bool) {
        self.debug_flags.set(flags, on);
    }

    /// Whether any of the given toggles is on
    #[inline]
    pub fn is_debug(&self, flags: DebugFlags) -> bool {
        self.debug_flags.intersects(flags)
    }

    /// Turn a debug toggle on or off by name
    pub fn set_debug_flag_by_name(&mut self, name: &str, on: bool) -> Result<(), CpuError> {
        let flags = DebugFlags::parse(name).ok_or_else(|| CpuError::UnknownDebugFlag(name.to_string()))?;
        self.set_debug_flags(flags, on);
        Ok(())
    }

    /// Redirect debug output; `None` restores stderr
    pub fn set_debug_sink(&mut self, sink: Option<DebugSink>) {
        self.debug_sink = sink;
    }

    pub fn debug_sink(&self) -> Option<&DebugSink> {
        self.debug_sink.as_ref()
    }

    /// Write to the debug sink
    pub fn debug_print(&self, args: fmt::Arguments<'_>) -> io::Result<()> {
        sink::write_fmt(self.debug_sink.as_ref(), args)
    }

    /// Write the retained trace records to the debug sink and empty the buffer
    pub fn flush_trace(&mut self) -> io::Result<usize> {
        match self.debug_sink.clone() {
            Some(sink) => {
                let mut out = sink.lock();
                self.trace.flush(&mut *out)
            }
            None => self.trace.flush(&mut io::stderr().lock()),
        }
    }

    /// Write the profile report to the debug sink
    pub fn write_profile_report(&self) -> io::Result<()> {
        self.debug_print(format_args!("cpu{}:\n", self.index))?;
        match &self.debug_sink {
            Some(sink) => self.profile.report(&mut *sink.lock()),
            None => self.profile.report(&mut io::stderr().lock()),
        }
    }
}

impl fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuContext")
            .field("index", &self.index)
            .field("owner", &self.owner)
            .field("debug_flags", &self.debug_flags)
            .field("debug_sink", &self.debug_sink.is_some())
            .field("trace", &self.trace.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_debug::{MemorySink, TraceFlags};

    fn cpu() -> CpuContext {
        CpuContext::new(0, StateId::next(), 16, 64)
    }

    #[test]
    fn test_debug_flags_fit_in_max_values() {
        assert_eq!(DebugFlags::all().bits().count_ones() as usize, MAX_DEBUG_VALUES);
    }

    #[test]
    fn test_debug_flags_by_name() {
        let mut cpu = cpu();
        cpu.set_debug_flag_by_name("insn", true).unwrap();
        cpu.set_debug_flag_by_name("TARGET1", true).unwrap();
        assert!(cpu.is_debug(DebugFlags::INSN));
        assert!(cpu.is_debug(DebugFlags::TARGET1));
        assert!(!cpu.is_debug(DebugFlags::EVENTS));

        cpu.set_debug_flag_by_name("insn", false).unwrap();
        assert!(!cpu.is_debug(DebugFlags::INSN));

        assert_eq!(
            cpu.set_debug_flag_by_name("verbose", true),
            Err(CpuError::UnknownDebugFlag("verbose".to_string()))
        );
    }

    #[test]
    fn test_debug_print_to_sink() {
        let mut cpu = cpu();
        let capture = MemorySink::new();
        cpu.set_debug_sink(Some(capture.sink()));

        cpu.debug_print(format_args!("r{} = 0x{:x}\n", 3, 0x2a)).unwrap();
        assert_eq!(capture.contents(), "r3 = 0x2a\n");

        cpu.set_debug_sink(None);
        assert!(cpu.debug_sink().is_none());
    }

    #[test]
    fn test_flush_trace_to_sink() {
        let mut cpu = cpu();
        let capture = MemorySink::new();
        cpu.set_debug_sink(Some(capture.sink()));

        cpu.trace_mut().enable(TraceFlags::INSN);
        cpu.trace_mut().record(7, TraceFlags::INSN, "nop");
        assert_eq!(cpu.flush_trace().unwrap(), 1);

        assert!(capture.contents().contains("nop"));
        assert!(cpu.trace().is_empty());
    }
}
