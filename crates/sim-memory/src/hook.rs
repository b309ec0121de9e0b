//! Access-tracing hooks for the core memory bus

use parking_lot::Mutex;
use sim_core::AccessKind;
use std::collections::VecDeque;
use std::sync::Arc;

/// Observer of successful checked bus accesses
///
/// Called after the access completed; it cannot alter the access.
pub trait AccessHook {
    fn on_access(&mut self, kind: AccessKind, addr: u64, len: usize);
}

impl<F> AccessHook for F
where
    F: FnMut(AccessKind, u64, usize),
{
    fn on_access(&mut self, kind: AccessKind, addr: u64, len: usize) {
        self(kind, addr, len)
    }
}

/// One observed access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub kind: AccessKind,
    pub addr: u64,
    pub len: usize,
}

/// Shared, bounded log of bus accesses
///
/// Clones share the same log, so one clone can be installed on the bus while
/// another is inspected.
#[derive(Debug, Clone)]
pub struct AccessLog {
    records: Arc<Mutex<VecDeque<AccessRecord>>>,
    capacity: usize,
}

impl AccessLog {
    /// Create a log retaining at most `capacity` records (oldest dropped first)
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Hook feeding this log
    pub fn hook(&self) -> Box<dyn AccessHook> {
        let log = self.clone();
        Box::new(move |kind: AccessKind, addr: u64, len: usize| {
            log.record(kind, addr, len)
        })
    }

    /// Append a record
    pub fn record(&self, kind: AccessKind, addr: u64, len: usize) {
        if self.capacity == 0 {
            return;
        }

        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(AccessRecord { kind, addr, len });
    }

    /// Snapshot of the retained records
    pub fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
