//! End-to-end scenarios: events driving the bus, a toy processor built on a
//! simulation state, and loading a program from disk

use sim_core::{BackingStrategy, Config, EventDriven, MemoryError};
use sim_debug::{MemorySink, ProfileCategory, TraceFlags};
use sim_engine::{install_standard_modules, Platform, SimulationState};
use sim_loader::{ImageReader, RawReader};
use sim_memory::AccessFlags;
use std::io::Write;

fn state_with_ram() -> SimulationState {
    let mut state = SimulationState::create(Config::default()).unwrap();
    state
        .bus_mut()
        .unwrap()
        .map_zeroed("ram", 0x1000, 0x1000, AccessFlags::RWX)
        .unwrap();
    state
}

#[test]
fn test_events_write_the_bus_in_time_order() {
    let mut state = state_with_ram();
    {
        let events = state.platform_mut().unwrap().events_mut();
        for (time, value) in [(5u64, 0xAAu8), (3, 0xBB), (5, 0xCC)] {
            events.schedule(time, move |platform: &mut Platform| {
                let slot = platform.bus().stats().writes;
                platform.bus_mut().write_u8(0x1000 + slot, value).unwrap();
            });
        }
    }

    assert_eq!(state.advance_to(4).unwrap(), 1);
    assert_eq!(state.now().unwrap(), 4);
    assert_eq!(state.advance_to(10).unwrap(), 2);
    assert_eq!(state.now().unwrap(), 10);

    // t=3 first, then the two t=5 events in scheduling order
    assert_eq!(
        state.bus_mut().unwrap().read(0x1000, 3).unwrap(),
        vec![0xBB, 0xAA, 0xCC]
    );
}

#[test]
fn test_callback_reschedules_itself() {
    fn tick(platform: &mut Platform) {
        let count = platform.bus_mut().read_u32(0x1000).unwrap() + 1;
        platform.bus_mut().write_u32(0x1000, count).unwrap();
        if count < 4 {
            platform.events_mut().schedule_after(10, tick);
        }
    }

    let mut state = state_with_ram();
    state.platform_mut().unwrap().events_mut().schedule(0, tick);

    assert_eq!(state.advance_to(100).unwrap(), 4);
    assert_eq!(state.bus_mut().unwrap().read_u32(0x1000).unwrap(), 4);
    assert!(state.platform().unwrap().events().is_empty());
}

#[test]
fn test_cancelled_event_never_fires() {
    let mut state = state_with_ram();
    let events = state.platform_mut().unwrap().events_mut();
    let keep = events.schedule(2, |p: &mut Platform| p.bus_mut().write_u8(0x1000, 1).unwrap());
    let dropped = events.schedule(2, |p: &mut Platform| p.bus_mut().write_u8(0x1001, 1).unwrap());
    assert!(events.cancel(dropped));
    assert!(!events.cancel(dropped));
    assert!(events.is_pending(keep));

    state.advance_to(2).unwrap();
    assert_eq!(state.bus_mut().unwrap().read(0x1000, 2).unwrap(), vec![1, 0]);
}

#[test]
fn test_events_are_accounted_to_first_cpu() {
    let mut state = state_with_ram();
    {
        let cpu = state.cpu_mut(0).unwrap();
        cpu.trace_mut().enable(TraceFlags::EVENTS);
        cpu.profile_mut().enable(ProfileCategory::Events);
    }
    state
        .platform_mut()
        .unwrap()
        .events_mut()
        .schedule_traced(7, "timer", |_: &mut Platform| {});
    state.advance_to(7).unwrap();

    let cpu = state.cpu(0).unwrap();
    let record = cpu.trace().records().next().unwrap();
    assert_eq!(record.time, 7);
    assert!(record.text.contains("timer"));
    assert_eq!(cpu.profile().counter(ProfileCategory::Events, "fired"), 1);
}

/// A tiny accumulator machine embedding the engine state as a field
///
/// Encoding: one byte opcode, one byte operand.
/// 0x01 n: acc += n, 0x02 n: store acc at n, 0x00: halt
struct ToyCpu {
    sim: SimulationState,
    pc: u64,
    acc: u8,
}

impl ToyCpu {
    fn step(&mut self) -> Result<bool, MemoryError> {
        let mut insn = [0u8; 2];
        let bus = self.sim.bus_mut().unwrap();
        bus.fetch(self.pc, &mut insn)?;

        let cpu = self.sim.cpu_mut(0).unwrap();
        cpu.profile_mut().record_insn(self.pc);
        let pc = self.pc;
        cpu.trace_mut()
            .record_with(pc, TraceFlags::INSN, || format!("{:#x}: {:02x} {:02x}", pc, insn[0], insn[1]));

        self.pc += 2;
        match insn[0] {
            0x00 => return Ok(false),
            0x01 => self.acc = self.acc.wrapping_add(insn[1]),
            0x02 => self.sim.bus_mut().unwrap().write_u8(u64::from(insn[1]), self.acc)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[test]
fn test_toy_processor_runs_a_program() {
    let mut config = Config::default();
    config.memory.backing = BackingStrategy::Flat { size: 0x100 };
    config.debug.trace = vec!["insn".to_string()];
    config.debug.profile = vec!["insn".to_string()];

    let mut sim = SimulationState::create(config).unwrap();
    install_standard_modules(&mut sim).unwrap();
    sim.init_modules().unwrap();

    let program = [0x01, 0x20, 0x01, 0x22, 0x02, 0x80, 0x00, 0x00];
    let image = RawReader::new(0x10).with_entry(0x10).parse(&program).unwrap();
    sim.load_program(&image).unwrap();

    let capture = MemorySink::new();
    sim.cpu_mut(0).unwrap().set_debug_sink(Some(capture.sink()));

    let entry = sim.entry().unwrap().unwrap();
    let mut toy = ToyCpu { sim, pc: entry, acc: 0 };
    while toy.step().unwrap() {}

    assert_eq!(toy.acc, 0x42);
    assert_eq!(toy.sim.bus_mut().unwrap().read_u8(0x80).unwrap(), 0x42);
    assert_eq!(toy.sim.cpu(0).unwrap().profile().counter(ProfileCategory::Insn, "executed"), 4);

    // Flat memory rejects fetches past its end
    toy.pc = 0xFF;
    assert!(matches!(toy.step(), Err(MemoryError::Unmapped { .. })));

    toy.sim.destroy().unwrap();
    let out = capture.contents();
    assert!(out.contains("0x10: 01 20"));
    assert!(out.contains("=== Profile Report ==="));
}

#[test]
fn test_load_program_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    file.flush().unwrap();

    let mut state = SimulationState::create(Config::default()).unwrap();
    state
        .load_program_file(file.path(), &RawReader::new(0x4000))
        .unwrap();

    let program = state.program().unwrap().unwrap();
    assert_eq!(program.path.as_deref(), Some(file.path()));
    assert_eq!(program.format, "raw");
    assert_eq!(state.entry().unwrap(), Some(0x4000));
    assert_eq!(state.text_range().unwrap(), Some(0x4000..0x4004));
    assert_eq!(
        state.bus_mut().unwrap().read_u32(0x4000).unwrap(),
        0xEFBE_ADDE
    );
}

#[test]
fn test_module_info_reports_model() {
    let mut state = SimulationState::create(Config::default()).unwrap();
    install_standard_modules(&mut state).unwrap();
    state.init_modules().unwrap();

    let capture = MemorySink::new();
    state.cpu_mut(0).unwrap().set_debug_sink(Some(capture.sink()));
    state.module_info(true).unwrap();

    let out = capture.contents();
    assert!(out.contains("model: generic"));
    assert!(out.contains("machine generic word=32"));
}

#[test]
fn test_platform_advance_directly() {
    let mut state = state_with_ram();
    let platform = state.platform_mut().unwrap();
    platform.events_mut().schedule(1, |p: &mut Platform| {
        p.bus_mut().write_u8(0x1FFF, 9).unwrap()
    });
    assert_eq!(platform.advance_to(1), 1);
    assert_eq!(platform.bus_mut().read_u8(0x1FFF).unwrap(), 9);
}
