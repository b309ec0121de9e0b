//! The part of a simulation state visible to callbacks
//!
//! Event callbacks and module hooks receive `&mut Platform`: the processors,
//! the core memory bus and the event queue. The module registry and program
//! bookkeeping stay in the owning state.

use crate::cpu::CpuContext;
use sim_core::{EventDriven, EventQueue, StateError};
use sim_debug::TraceFlags;
use sim_memory::CoreBus;

/// Processors, address space and scheduler of one simulation
#[derive(Debug)]
pub struct Platform {
    cpus: Vec<CpuContext>,
    bus: CoreBus,
    events: EventQueue<Platform>,
}

impl Platform {
    pub(crate) fn new(cpus: Vec<CpuContext>, bus: CoreBus) -> Self {
        Self {
            cpus,
            bus,
            events: EventQueue::new(),
        }
    }

    /// Drop the processors, every region and all pending events
    pub(crate) fn release(&mut self) {
        let byte_order = self.bus.byte_order();
        self.events.clear();
        self.cpus = Vec::new();
        self.bus = CoreBus::mapped(byte_order);
    }

    pub fn bus(&self) -> &CoreBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut CoreBus {
        &mut self.bus
    }

    pub fn events(&self) -> &EventQueue<Platform> {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventQueue<Platform> {
        &mut self.events
    }

    /// Current simulated time
    pub fn now(&self) -> u64 {
        self.events.now()
    }

    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpus(&self) -> &[CpuContext] {
        &self.cpus
    }

    pub fn cpus_mut(&mut self) -> &mut [CpuContext] {
        &mut self.cpus
    }

    pub fn cpu(&self, index: usize) -> Result<&CpuContext, StateError> {
        let count = self.cpus.len();
        self.cpus.get(index).ok_or(StateError::InvalidCpu { index, count })
    }

    pub fn cpu_mut(&mut self, index: usize) -> Result<&mut CpuContext, StateError> {
        let count = self.cpus.len();
        self.cpus
            .get_mut(index)
            .ok_or(StateError::InvalidCpu { index, count })
    }
}

impl EventDriven for Platform {
    fn event_queue(&mut self) -> &mut EventQueue<Self> {
        &mut self.events
    }

    /// Fire due events, accounting them to the first processor's collectors
    fn advance_to(&mut self, time: u64) -> usize {
        let mut count = 0;
        while let Some(event) = self.events.pop_due(time) {
            if let Some(cpu) = self.cpus.first_mut() {
                cpu.profile_mut().record_event();
                cpu.trace_mut().record_with(event.time(), TraceFlags::EVENTS, || {
                    match event.description() {
                        Some(desc) => format!("event {}: {}", event.handle(), desc),
                        None => format!("event {}", event.handle()),
                    }
                });
            }
            event.fire(self);
            count += 1;
        }
        self.events.settle(time);
        count
    }
}
