//! Per-processor profiling counters

use serde::{Deserialize, Serialize};
use sim_core::AccessKind;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

/// Profile category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileCategory {
    /// Instruction counts
    Insn,
    /// Memory access counts
    Memory,
    /// Core bus activity
    Core,
    /// Model-specific counters
    Model,
    /// Scheduler events
    Events,
    /// Program counter histogram
    Pc,
}

impl ProfileCategory {
    pub const ALL: [ProfileCategory; 6] = [
        Self::Insn,
        Self::Memory,
        Self::Core,
        Self::Model,
        Self::Events,
        Self::Pc,
    ];

    /// Get category name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insn => "insn",
            Self::Memory => "memory",
            Self::Core => "core",
            Self::Model => "model",
            Self::Events => "events",
            Self::Pc => "pc",
        }
    }

    /// Parse a category name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// Hotspot entry
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    /// Start address of the histogram bucket
    pub address: u64,
    /// Hit count
    pub hit_count: u64,
    /// Percentage of all recorded instructions
    pub percentage: f64,
}

/// Profiling accumulators of one processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileData {
    enabled: BTreeSet<ProfileCategory>,
    counters: BTreeMap<ProfileCategory, BTreeMap<String, u64>>,
    /// Instruction hits per PC bucket, keyed by bucket start
    pc_histogram: BTreeMap<u64, u64>,
    pc_bucket_size: u64,
    total_instructions: u64,
}

impl Default for ProfileData {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProfileData {
    /// Create empty accumulators
    ///
    /// `pc_bucket_size` is rounded up to a power of two, capped at 2^63.
    pub fn new(pc_bucket_size: u64) -> Self {
        Self {
            enabled: BTreeSet::new(),
            counters: BTreeMap::new(),
            pc_histogram: BTreeMap::new(),
            pc_bucket_size: pc_bucket_size.max(1).checked_next_power_of_two().unwrap_or(1 << 63),
            total_instructions: 0,
        }
    }

    pub fn enable(&mut self, category: ProfileCategory) {
        self.enabled.insert(category);
    }

    pub fn disable(&mut self, category: ProfileCategory) {
        self.enabled.remove(&category);
    }

    /// Enable every category
    pub fn enable_all(&mut self) {
        self.enabled.extend(ProfileCategory::ALL);
    }

    #[inline]
    pub fn is_enabled(&self, category: ProfileCategory) -> bool {
        self.enabled.contains(&category)
    }

    /// Whether any category is enabled
    pub fn is_active(&self) -> bool {
        !self.enabled.is_empty()
    }

    pub fn pc_bucket_size(&self) -> u64 {
        self.pc_bucket_size
    }

    /// Add `amount` to a named counter if the category is enabled
    pub fn count(&mut self, category: ProfileCategory, counter: &str, amount: u64) {
        if !self.is_enabled(category) {
            return;
        }
        let slot = self
            .counters
            .entry(category)
            .or_default()
            .entry(counter.to_string())
            .or_insert(0);
        *slot = slot.saturating_add(amount);
    }

    /// Record one executed instruction at `pc`
    pub fn record_insn(&mut self, pc: u64) {
        if self.is_enabled(ProfileCategory::Insn) {
            self.count(ProfileCategory::Insn, "executed", 1);
        }
        if self.is_enabled(ProfileCategory::Pc) {
            let bucket = pc & !(self.pc_bucket_size - 1);
            *self.pc_histogram.entry(bucket).or_insert(0) += 1;
            self.total_instructions += 1;
        }
    }

    /// Record a memory access of `len` bytes
    pub fn record_memory(&mut self, kind: AccessKind, len: usize) {
        if !self.is_enabled(ProfileCategory::Memory) {
            return;
        }
        let (count, bytes) = match kind {
            AccessKind::Read => ("reads", "bytes_read"),
            AccessKind::Write => ("writes", "bytes_written"),
            AccessKind::Execute => ("fetches", "bytes_fetched"),
        };
        self.count(ProfileCategory::Memory, count, 1);
        self.count(ProfileCategory::Memory, bytes, len as u64);
    }

    /// Record a fired scheduler event
    pub fn record_event(&mut self) {
        self.count(ProfileCategory::Events, "fired", 1);
    }

    /// Value of a named counter
    pub fn counter(&self, category: ProfileCategory, counter: &str) -> u64 {
        self.counters
            .get(&category)
            .and_then(|c| c.get(counter))
            .copied()
            .unwrap_or(0)
    }

    /// Counters of one category
    pub fn counters(&self, category: ProfileCategory) -> impl Iterator<Item = (&str, u64)> {
        self.counters
            .get(&category)
            .into_iter()
            .flat_map(|c| c.iter().map(|(name, &value)| (name.as_str(), value)))
    }

    /// Top `count` PC buckets by hit count
    pub fn pc_hotspots(&self, count: usize) -> Vec<Hotspot> {
        let mut hotspots: Vec<_> = self
            .pc_histogram
            .iter()
            .map(|(&address, &hits)| Hotspot {
                address,
                hit_count: hits,
                percentage: if self.total_instructions > 0 {
                    (hits as f64 / self.total_instructions as f64) * 100.0
                } else {
                    0.0
                },
            })
            .collect();

        // Stable sort keeps equal counts in address order
        hotspots.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        hotspots.truncate(count);
        hotspots
    }

    /// Reset all accumulators, keeping the enabled categories
    pub fn reset(&mut self) {
        self.counters.clear();
        self.pc_histogram.clear();
        self.total_instructions = 0;
    }

    /// Write a text report
    pub fn report(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "=== Profile Report ===")?;

        for category in ProfileCategory::ALL {
            if category == ProfileCategory::Pc {
                continue;
            }
            let Some(counters) = self.counters.get(&category) else {
                continue;
            };
            writeln!(out, "\n--- {} ---", category.name())?;
            for (name, value) in counters {
                writeln!(out, "  {:<16} {:>12}", name, value)?;
            }
        }

        if !self.pc_histogram.is_empty() {
            writeln!(
                out,
                "\n--- pc (bucket size {}, {} instructions) ---",
                self.pc_bucket_size, self.total_instructions
            )?;
            for hotspot in self.pc_hotspots(10) {
                writeln!(
                    out,
                    "  0x{:016x}: {:>10} hits ({:.2}%)",
                    hotspot.address, hotspot.hit_count, hotspot.percentage
                )?;
            }
        }

        Ok(())
    }

    /// Serialize as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
