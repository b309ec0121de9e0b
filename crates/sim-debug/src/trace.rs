//! Per-processor trace collection

use bitflags::bitflags;
use std::collections::VecDeque;
use std::io::{self, Write};

bitflags! {
    /// Trace categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceFlags: u32 {
        /// Executed instructions
        const INSN     = 1 << 0;
        /// Instruction decoding
        const DECODE   = 1 << 1;
        /// Operand extraction
        const EXTRACT  = 1 << 2;
        /// Source line numbers
        const LINENUM  = 1 << 3;
        /// Memory accesses
        const MEMORY   = 1 << 4;
        /// Model-specific behaviour
        const MODEL    = 1 << 5;
        /// Integer arithmetic
        const ALU      = 1 << 6;
        /// Core bus operations
        const CORE     = 1 << 7;
        /// Scheduler events
        const EVENTS   = 1 << 8;
        /// Floating point
        const FPU      = 1 << 9;
        /// Vector unit
        const VPU      = 1 << 10;
        /// Branches
        const BRANCH   = 1 << 11;
        /// System calls
        const SYSCALL  = 1 << 12;
        /// Register updates
        const REGISTER = 1 << 13;
        /// Simulator debugging
        const DEBUG    = 1 << 14;
    }
}

impl Default for TraceFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl TraceFlags {
    /// Parse a lower-case category name; `all` selects every category
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("all") {
            return Some(Self::all());
        }
        Self::from_name(&name.to_ascii_uppercase())
    }

    /// Name of the first category in the set
    pub fn label(&self) -> &'static str {
        self.iter_names().next().map(|(name, _)| name).unwrap_or("NONE")
    }
}

/// One retained trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Simulated time when the record was taken
    pub time: u64,
    pub category: TraceFlags,
    pub text: String,
}

/// Bounded trace buffer with category filtering
#[derive(Debug, Clone)]
pub struct TraceData {
    enabled: TraceFlags,
    records: VecDeque<TraceRecord>,
    capacity: usize,
    dropped: u64,
}

impl Default for TraceData {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl TraceData {
    /// Create a trace buffer retaining at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: TraceFlags::empty(),
            records: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Enable categories
    pub fn enable(&mut self, flags: TraceFlags) {
        self.enabled |= flags;
    }

    /// Disable categories
    pub fn disable(&mut self, flags: TraceFlags) {
        self.enabled &= !flags;
    }

    /// Enable a category by name; returns `false` for unknown names
    pub fn enable_by_name(&mut self, name: &str) -> bool {
        match TraceFlags::parse(name) {
            Some(flags) => {
                self.enable(flags);
                true
            }
            None => false,
        }
    }

    pub fn enabled(&self) -> TraceFlags {
        self.enabled
    }

    /// Whether any of the given categories is enabled
    #[inline]
    pub fn is_enabled(&self, flags: TraceFlags) -> bool {
        self.enabled.intersects(flags)
    }

    /// Whether any category is enabled
    pub fn is_active(&self) -> bool {
        !self.enabled.is_empty()
    }

    /// Append a record if its category is enabled
    pub fn record(&mut self, time: u64, category: TraceFlags, text: impl Into<String>) {
        if self.is_enabled(category) {
            self.push(time, category, text.into());
        }
    }

    /// Append a record, formatting it only if its category is enabled
    pub fn record_with<F>(&mut self, time: u64, category: TraceFlags, text: F)
    where
        F: FnOnce() -> String,
    {
        if self.is_enabled(category) {
            self.push(time, category, text());
        }
    }

    fn push(&mut self, time: u64, category: TraceFlags, text: String) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.records.len() >= self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(TraceRecord { time, category, text });
    }

    /// Retained records, oldest first
    pub fn records(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// The most recent `count` records, oldest first
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter().skip(self.records.len().saturating_sub(count))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, dropping the oldest records if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.records.len() > capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
    }

    /// Records discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Write every retained record and empty the buffer
    pub fn flush(&mut self, out: &mut dyn Write) -> io::Result<usize> {
        let count = self.records.len();
        for record in self.records.drain(..) {
            writeln!(out, "{:>12} {:<8} {}", record.time, record.category.label(), record.text)?;
        }
        if self.dropped > 0 {
            writeln!(out, "({} older records dropped)", self.dropped)?;
            self.dropped = 0;
        }
        Ok(count)
    }
}
