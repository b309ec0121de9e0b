//! Discrete-event scheduler driving simulated time
//!
//! Events are kept in a binary heap ordered by `(trigger_time, sequence)`, so
//! events fire in non-decreasing time order and events sharing a trigger time
//! fire in the order they were scheduled. Time is an opaque counter supplied
//! by the host (cycles or instructions); the queue never looks at wall-clock
//! time.
//!
//! A due event is always detached from the queue before its callback runs,
//! which lets callbacks schedule or cancel further events freely.

use crate::error::EventError;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Deferred work attached to an event
pub type EventCallback<C> = Box<dyn FnOnce(&mut C)>;

/// Heap is rebuilt once stale entries outnumber live ones by this margin
const COMPACT_SLACK: usize = 64;

/// Handle identifying a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

impl EventHandle {
    /// Raw handle value
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Heap key; the sequence number doubles as the handle id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    time: u64,
    seq: u64,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for max heap to work as min heap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PendingEvent<C> {
    time: u64,
    description: Option<String>,
    callback: EventCallback<C>,
}

/// An event removed from the queue that is ready to fire
pub struct DueEvent<C> {
    handle: EventHandle,
    time: u64,
    description: Option<String>,
    callback: EventCallback<C>,
}

impl<C> DueEvent<C> {
    /// Handle the event was scheduled under
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Trigger time the event was scheduled for
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Description given at scheduling time, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Run the callback
    pub fn fire(self, ctx: &mut C) {
        match &self.description {
            Some(desc) => tracing::trace!("Firing event {} at {}: {}", self.handle, self.time, desc),
            None => tracing::trace!("Firing event {} at {}", self.handle, self.time),
        }
        (self.callback)(ctx);
    }
}

/// Discrete-event queue
pub struct EventQueue<C> {
    /// Ordered keys, possibly including cancelled entries
    heap: BinaryHeap<QueueEntry>,
    /// Live events by handle id
    pending: HashMap<u64, PendingEvent<C>>,
    /// Current simulated time
    now: u64,
    /// Next sequence number / handle id
    next_seq: u64,
    /// Total number of events fired
    fired: u64,
}

impl<C> EventQueue<C> {
    /// Create an empty queue at time zero
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            now: 0,
            next_seq: 0,
            fired: 0,
        }
    }

    /// Schedule `callback` to fire at absolute `trigger_time`
    ///
    /// A trigger time earlier than the current time is allowed; the event
    /// fires on the next advance.
    pub fn schedule<F>(&mut self, trigger_time: u64, callback: F) -> EventHandle
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.insert(trigger_time, None, Box::new(callback))
    }

    /// Schedule `callback` to fire `delta` time units from now
    pub fn schedule_after<F>(&mut self, delta: u64, callback: F) -> EventHandle
    where
        F: FnOnce(&mut C) + 'static,
    {
        let time = self.now.saturating_add(delta);
        self.insert(time, None, Box::new(callback))
    }

    /// Schedule an event carrying a description reported when it fires
    pub fn schedule_traced<F>(
        &mut self,
        trigger_time: u64,
        description: impl Into<String>,
        callback: F,
    ) -> EventHandle
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.insert(trigger_time, Some(description.into()), Box::new(callback))
    }

    fn insert(
        &mut self,
        time: u64,
        description: Option<String>,
        callback: EventCallback<C>,
    ) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(QueueEntry { time, seq });
        self.pending.insert(
            seq,
            PendingEvent {
                time,
                description,
                callback,
            },
        );

        tracing::trace!("Scheduled event #{} at {} (now {})", seq, time, self.now);
        EventHandle(seq)
    }

    /// Cancel a pending event
    ///
    /// Returns `false` when the event already fired or was cancelled; that is
    /// not an error.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if self.pending.remove(&handle.0).is_none() {
            return false;
        }

        tracing::trace!("Cancelled event {}", handle);

        if self.heap.len() > self.pending.len() * 2 + COMPACT_SLACK {
            self.compact();
        }
        true
    }

    /// Cancel every pending event
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }

    /// Remove and return the next event due at or before `limit`
    pub fn pop_due(&mut self, limit: u64) -> Option<DueEvent<C>> {
        while let Some(top) = self.heap.peek().copied() {
            if !self.pending.contains_key(&top.seq) {
                self.heap.pop();
                continue;
            }
            if top.time > limit {
                return None;
            }

            self.heap.pop();
            let event = self.pending.remove(&top.seq)?;
            self.now = self.now.max(event.time);
            self.fired += 1;

            return Some(DueEvent {
                handle: EventHandle(top.seq),
                time: event.time,
                description: event.description,
                callback: event.callback,
            });
        }
        None
    }

    /// Fire every event due at or before `time`, then move the clock to `time`
    ///
    /// Callbacks receive `ctx`; contexts that own their queue should use
    /// [`EventDriven::advance_to`] instead so callbacks can reschedule.
    pub fn advance_to(&mut self, time: u64, ctx: &mut C) -> usize {
        let mut count = 0;
        while let Some(event) = self.pop_due(time) {
            event.fire(ctx);
            count += 1;
        }
        self.settle(time);
        count
    }

    /// Move the clock forward to `time` without firing anything
    ///
    /// The clock never moves backwards.
    pub fn settle(&mut self, time: u64) {
        self.now = self.now.max(time);
    }

    /// Current simulated time
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Number of events waiting to fire
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether no event is waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total number of events fired so far
    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    /// Whether `handle` still refers to a pending event
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains_key(&handle.0)
    }

    /// Trigger time of the earliest pending event
    pub fn next_trigger_time(&mut self) -> Option<u64> {
        while let Some(top) = self.heap.peek().copied() {
            if self.pending.contains_key(&top.seq) {
                return Some(top.time);
            }
            self.heap.pop();
        }
        None
    }

    /// Trigger time of a pending event
    pub fn trigger_time(&self, handle: EventHandle) -> Result<u64, EventError> {
        self.pending
            .get(&handle.0)
            .map(|e| e.time)
            .ok_or(EventError::StaleHandle(handle.0))
    }

    /// Time left until a pending event fires (zero if overdue)
    pub fn remaining(&self, handle: EventHandle) -> Result<u64, EventError> {
        self.trigger_time(handle)
            .map(|time| time.saturating_sub(self.now))
    }

    /// Description of a pending event
    pub fn description(&self, handle: EventHandle) -> Result<Option<&str>, EventError> {
        self.pending
            .get(&handle.0)
            .map(|e| e.description.as_deref())
            .ok_or(EventError::StaleHandle(handle.0))
    }

    /// Drop cancelled entries from the heap
    fn compact(&mut self) {
        let pending = &self.pending;
        self.heap.retain(|entry| pending.contains_key(&entry.seq));
    }
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("now", &self.now)
            .field("pending", &self.pending.len())
            .field("fired", &self.fired)
            .finish()
    }
}

/// A context that owns its own event queue
///
/// Callbacks receive the whole context, so they can reach the queue and
/// schedule follow-up events while the queue is being drained.
pub trait EventDriven: Sized {
    /// The queue owned by this context
    fn event_queue(&mut self) -> &mut EventQueue<Self>;

    /// Fire every event due at or before `time`
    fn advance_to(&mut self, time: u64) -> usize {
        let mut count = 0;
        while let Some(event) = self.event_queue().pop_due(time) {
            event.fire(self);
            count += 1;
        }
        self.event_queue().settle(time);
        count
    }
}
