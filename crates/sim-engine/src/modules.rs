//! Standard modules installed by every simbase simulator
//!
//! Each module reads its settings from the state's configuration when it is
//! installed and applies them to the processors when init runs.

use crate::platform::Platform;
use crate::state::SimulationState;
use anyhow::{bail, Context};
use sim_core::{Module, SimError, StateError};
use sim_debug::ProfileCategory;
use tracing::{debug, info, warn};

/// Register the `model`, `trace`, `profile` and `debug` modules, in that order
pub fn install_standard_modules(state: &mut SimulationState) -> Result<(), SimError> {
    let model = model_module(state)?;
    let trace = trace_module(state)?;
    let profile = profile_module(state)?;
    let debug = debug_module(state)?;

    let registry = state.modules_mut()?;
    registry.register(model)?;
    registry.register(trace)?;
    registry.register(profile)?;
    registry.register(debug)?;
    Ok(())
}

/// Fail with every per-CPU error collected during a best-effort pass
fn cpu_failures(what: &str, failures: Vec<String>) -> anyhow::Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    bail!("{} failed on {} CPU(s): {}", what, failures.len(), failures.join("; "))
}

fn model_module(state: &SimulationState) -> Result<Module<Platform>, StateError> {
    let model = state.model()?.name.clone();
    let machine = state.machine()?.cloned();
    let info_model = model.clone();
    let info_machine = machine.clone();

    Ok(Module::new("model", move |platform: &mut Platform| {
        match &machine {
            Some(m) => info!(
                "Model '{}' ({}: {}-bit words, {}-bit addresses) on {} CPU(s)",
                model,
                m.name,
                m.word_bits,
                m.addr_bits,
                platform.cpu_count()
            ),
            None => info!("Model '{}' on {} CPU(s)", model, platform.cpu_count()),
        }
        Ok(())
    })
    .with_info(move |platform: &mut Platform, verbose: bool| {
        let Ok(cpu) = platform.cpu(0) else {
            return;
        };
        let _ = cpu.debug_print(format_args!("model: {}\n", info_model));
        if let (true, Some(m)) = (verbose, &info_machine) {
            let _ = cpu.debug_print(format_args!(
                "  machine {} word={} addr={} default={}\n",
                m.name, m.word_bits, m.addr_bits, m.default_model
            ));
        }
    }))
}

fn trace_module(state: &SimulationState) -> Result<Module<Platform>, StateError> {
    let debug = &state.config()?.debug;
    let categories = debug.trace.clone();
    let capacity = debug.trace_capacity;

    Ok(Module::new("trace", move |platform: &mut Platform| {
        for cpu in platform.cpus_mut() {
            cpu.trace_mut().set_capacity(capacity);
            for name in &categories {
                if !cpu.trace_mut().enable_by_name(name) {
                    bail!("unknown trace category '{}'", name);
                }
            }
        }
        if !categories.is_empty() {
            debug!("Tracing {} on every CPU", categories.join(","));
        }
        Ok(())
    })
    .with_uninstall(|platform: &mut Platform| {
        let mut failures = Vec::new();
        for cpu in platform.cpus_mut() {
            let index = cpu.index();
            if cpu.trace().dropped() > 0 {
                warn!(
                    "cpu{}: {} trace record(s) were dropped",
                    index,
                    cpu.trace().dropped()
                );
            }
            match cpu.flush_trace() {
                Ok(flushed) => debug!("cpu{}: flushed {} trace record(s)", index, flushed),
                Err(e) => failures.push(format!("cpu{}: {}", index, e)),
            }
        }
        cpu_failures("trace flush", failures)
    }))
}

fn profile_module(state: &SimulationState) -> Result<Module<Platform>, StateError> {
    let categories = state.config()?.debug.profile.clone();

    Ok(Module::new("profile", move |platform: &mut Platform| {
        let mut wanted = Vec::new();
        let mut all = false;
        for name in &categories {
            if name.eq_ignore_ascii_case("all") {
                all = true;
                continue;
            }
            match ProfileCategory::from_name(name) {
                Some(category) => wanted.push(category),
                None => bail!("unknown profile category '{}'", name),
            }
        }

        for cpu in platform.cpus_mut() {
            let profile = cpu.profile_mut();
            if all {
                profile.enable_all();
            }
            for category in &wanted {
                profile.enable(*category);
            }
        }
        Ok(())
    })
    .with_uninstall(|platform: &mut Platform| {
        let failures = platform
            .cpus()
            .iter()
            .filter(|cpu| cpu.profile().is_active())
            .filter_map(|cpu| {
                cpu.write_profile_report()
                    .err()
                    .map(|e| format!("cpu{}: {}", cpu.index(), e))
            })
            .collect();
        cpu_failures("profile report", failures)
    }))
}

fn debug_module(state: &SimulationState) -> Result<Module<Platform>, StateError> {
    let flags = state.config()?.debug.debug_flags.clone();

    Ok(Module::new("debug", move |platform: &mut Platform| {
        for cpu in platform.cpus_mut() {
            for name in &flags {
                cpu.set_debug_flag_by_name(name, true)
                    .with_context(|| format!("cpu{}", cpu.index()))?;
            }
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DebugFlags;
    use sim_core::Config;
    use sim_debug::{DebugSink, MemorySink, TraceFlags};
    use std::io::{self, Write};
    use std::sync::Arc;

    /// Writer whose output side has gone away
    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn state_with(configure: impl FnOnce(&mut Config)) -> SimulationState {
        let mut config = Config::default();
        config.cpu.count = 2;
        configure(&mut config);
        let mut state = SimulationState::create(config).unwrap();
        install_standard_modules(&mut state).unwrap();
        state
    }

    #[test]
    fn test_registration_order() {
        let state = state_with(|_| {});
        assert_eq!(
            state.modules().unwrap().names(),
            vec!["model", "trace", "profile", "debug"]
        );
    }

    #[test]
    fn test_install_twice_is_duplicate() {
        let mut state = state_with(|_| {});
        assert!(matches!(
            install_standard_modules(&mut state),
            Err(SimError::Module(sim_core::ModuleError::Duplicate(_)))
        ));
    }

    #[test]
    fn test_settings_applied_to_every_cpu() {
        let mut state = state_with(|config| {
            config.debug.trace = vec!["insn".to_string(), "memory".to_string()];
            config.debug.trace_capacity = 32;
            config.debug.profile = vec!["pc".to_string()];
            config.debug.debug_flags = vec!["events".to_string()];
        });
        state.init_modules().unwrap();

        for index in 0..2 {
            let cpu = state.cpu(index).unwrap();
            assert!(cpu.trace().is_enabled(TraceFlags::INSN | TraceFlags::MEMORY));
            assert!(!cpu.trace().is_enabled(TraceFlags::ALU));
            assert_eq!(cpu.trace().capacity(), 32);
            assert!(cpu.profile().is_enabled(ProfileCategory::Pc));
            assert!(!cpu.profile().is_enabled(ProfileCategory::Insn));
            assert!(cpu.is_debug(DebugFlags::EVENTS));
        }
    }

    #[test]
    fn test_profile_all() {
        let mut state = state_with(|config| config.debug.profile = vec!["all".to_string()]);
        state.init_modules().unwrap();
        let cpu = state.cpu(1).unwrap();
        for category in ProfileCategory::ALL {
            assert!(cpu.profile().is_enabled(category));
        }
    }

    #[test]
    fn test_unknown_category_fails_init() {
        let mut state = state_with(|config| config.debug.trace = vec!["bogus".to_string()]);
        let err = state.init_modules().unwrap_err();
        match err {
            SimError::Module(e) => assert_eq!(e.module(), "trace"),
            other => panic!("unexpected error: {other}"),
        }
        // model initialized before the failure, later modules never ran
        let modules = state.modules().unwrap();
        assert!(modules.is_initialized("model"));
        assert!(!modules.is_initialized("profile"));
    }

    #[test]
    fn test_uninstall_flushes_trace_and_reports_profile() {
        let mut state = state_with(|config| {
            config.debug.trace = vec!["insn".to_string()];
            config.debug.profile = vec!["insn".to_string()];
        });
        state.init_modules().unwrap();

        let capture = MemorySink::new();
        {
            let cpu = state.cpu_mut(0).unwrap();
            cpu.set_debug_sink(Some(capture.sink()));
            cpu.trace_mut().record(3, TraceFlags::INSN, "addi r1, r1, 1");
            cpu.profile_mut().record_insn(0x1000);
        }

        let report = state.destroy().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.uninstalled, vec!["debug", "profile", "trace", "model"]);

        let out = capture.contents();
        assert!(out.contains("addi r1, r1, 1"));
        assert!(out.contains("=== Profile Report ==="));
    }

    #[test]
    fn test_uninstall_continues_past_failing_cpu() {
        let mut state = state_with(|config| {
            config.debug.trace = vec!["insn".to_string()];
            config.debug.profile = vec!["insn".to_string()];
        });
        state.init_modules().unwrap();

        let closed: DebugSink = Arc::new(parking_lot::Mutex::new(ClosedWriter));
        let capture = MemorySink::new();
        for (index, sink) in [(0, closed), (1, capture.sink())] {
            let cpu = state.cpu_mut(index).unwrap();
            cpu.set_debug_sink(Some(sink));
            cpu.trace_mut().record(7, TraceFlags::INSN, format!("insn on cpu{}", index));
            cpu.profile_mut().record_insn(0x2000);
        }

        let report = state.destroy().unwrap();
        let failed: Vec<_> = report.failures.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(failed, vec!["profile", "trace"]);
        for (_, err) in &report.failures {
            let message = format!("{:#}", err);
            assert!(message.contains("1 CPU(s)"), "{}", message);
            assert!(message.contains("cpu0: sink closed"), "{}", message);
        }
        assert_eq!(report.uninstalled, vec!["debug", "model"]);

        let out = capture.contents();
        assert!(out.contains("insn on cpu1"));
        assert!(!out.contains("insn on cpu0"));
        assert!(out.contains("cpu1:"));
        assert!(out.contains("=== Profile Report ==="));
    }
}
