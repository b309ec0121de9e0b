//! Simulation state
//!
//! The root aggregate of one simulation. Several states may coexist in a
//! process; nothing here is global.

use crate::cpu::CpuContext;
use crate::platform::Platform;
use sim_core::{
    Config, EventDriven, MachineDesc, ModelDesc, ModelTable, ModuleRegistry, OpenKind, SimError,
    SimOptions, StateError, UninstallReport,
};
use sim_loader::{ImageReader, ProgramImage};
use sim_memory::CoreBus;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info};

/// Integrity sentinel stored as the last field of every state
pub const SIM_MAGIC_NUMBER: u32 = 0x4242;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a simulation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

/// What is known about the loaded program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    /// File the program was read from, if any
    pub path: Option<PathBuf>,
    pub format: String,
    pub entry: u64,
    /// Bounds of the text section, if known
    pub text: Option<Range<u64>>,
}

/// Root aggregate of one simulation
pub struct SimulationState {
    id: StateId,
    name: String,
    open_kind: OpenKind,
    verbose: bool,
    config: Config,
    options: SimOptions,
    prog_argv: Vec<String>,
    models: ModelTable,
    model: ModelDesc,
    program: Option<ProgramInfo>,
    platform: Platform,
    modules: ModuleRegistry<Platform>,
    destroyed: bool,
    magic: u32,
}

impl SimulationState {
    /// Create a state using the generic model table
    pub fn create(config: Config) -> Result<Self, SimError> {
        Self::create_with_models(config, ModelTable::generic())
    }

    /// Create a state for a simulator with its own model table
    pub fn create_with_models(config: Config, models: ModelTable) -> Result<Self, SimError> {
        config.validate()?;

        let model = models.resolve(config.cpu.model.as_deref())?.clone();
        let id = StateId::next();

        let cpus = (0..config.cpu.count)
            .map(|index| {
                CpuContext::new(
                    index,
                    id,
                    config.debug.trace_capacity,
                    config.debug.pc_bucket_size,
                )
            })
            .collect();
        let bus = CoreBus::from_config(&config.memory)?;

        info!(
            "Created {} '{}': {} CPU(s), model '{}', {:?} memory",
            id, config.general.name, config.cpu.count, model.name, config.memory.backing
        );

        Ok(Self {
            id,
            name: config.general.name.clone(),
            open_kind: config.general.open_kind,
            verbose: config.general.verbose,
            options: SimOptions::from_map(&config.options),
            prog_argv: Vec::new(),
            models,
            model,
            program: None,
            platform: Platform::new(cpus, bus),
            modules: ModuleRegistry::new(),
            destroyed: false,
            config,
            magic: SIM_MAGIC_NUMBER,
        })
    }

    fn live(&self) -> Result<(), StateError> {
        if self.destroyed {
            Err(StateError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Identity; the only accessor that still answers after destroy
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Simulator name
    pub fn name(&self) -> Result<&str, StateError> {
        self.live()?;
        Ok(&self.name)
    }

    pub fn open_kind(&self) -> Result<OpenKind, StateError> {
        self.live()?;
        Ok(self.open_kind)
    }

    pub fn verbose(&self) -> Result<bool, StateError> {
        self.live()?;
        Ok(self.verbose)
    }

    /// Configuration the state was created from
    pub fn config(&self) -> Result<&Config, StateError> {
        self.live()?;
        Ok(&self.config)
    }

    pub fn options(&self) -> Result<&SimOptions, StateError> {
        self.live()?;
        Ok(&self.options)
    }

    /// Append runtime options; they override earlier ones with the same name
    pub fn add_options(&mut self, options: SimOptions) -> Result<(), StateError> {
        self.live()?;
        self.options.extend(options);
        Ok(())
    }

    /// Arguments of the simulated program, starting with its name
    pub fn prog_argv(&self) -> Result<&[String], StateError> {
        self.live()?;
        Ok(&self.prog_argv)
    }

    pub fn set_prog_argv(&mut self, argv: Vec<String>) -> Result<(), StateError> {
        self.live()?;
        self.prog_argv = argv;
        Ok(())
    }

    /// Selected processor model
    pub fn model(&self) -> Result<&ModelDesc, StateError> {
        self.live()?;
        Ok(&self.model)
    }

    /// Machine of the selected model
    pub fn machine(&self) -> Result<Option<&MachineDesc>, StateError> {
        self.live()?;
        Ok(self.models.machine_of(&self.model))
    }

    pub fn models(&self) -> Result<&ModelTable, StateError> {
        self.live()?;
        Ok(&self.models)
    }

    /// Loaded program, if any
    pub fn program(&self) -> Result<Option<&ProgramInfo>, StateError> {
        self.live()?;
        Ok(self.program.as_ref())
    }

    /// Entry point of the loaded program
    pub fn entry(&self) -> Result<Option<u64>, StateError> {
        Ok(self.program()?.map(|p| p.entry))
    }

    /// Text section bounds of the loaded program
    pub fn text_range(&self) -> Result<Option<Range<u64>>, StateError> {
        Ok(self.program()?.and_then(|p| p.text.clone()))
    }

    pub fn cpu_count(&self) -> Result<usize, StateError> {
        self.live()?;
        Ok(self.platform.cpu_count())
    }

    pub fn cpu(&self, index: usize) -> Result<&CpuContext, StateError> {
        self.live()?;
        self.platform.cpu(index)
    }

    pub fn cpu_mut(&mut self, index: usize) -> Result<&mut CpuContext, StateError> {
        self.live()?;
        self.platform.cpu_mut(index)
    }

    pub fn platform(&self) -> Result<&Platform, StateError> {
        self.live()?;
        Ok(&self.platform)
    }

    pub fn platform_mut(&mut self) -> Result<&mut Platform, StateError> {
        self.live()?;
        Ok(&mut self.platform)
    }

    pub fn bus(&self) -> Result<&CoreBus, StateError> {
        self.live()?;
        Ok(self.platform.bus())
    }

    pub fn bus_mut(&mut self) -> Result<&mut CoreBus, StateError> {
        self.live()?;
        Ok(self.platform.bus_mut())
    }

    pub fn modules(&self) -> Result<&ModuleRegistry<Platform>, StateError> {
        self.live()?;
        Ok(&self.modules)
    }

    /// Registry to populate before [`init_modules`](Self::init_modules)
    pub fn modules_mut(&mut self) -> Result<&mut ModuleRegistry<Platform>, StateError> {
        self.live()?;
        Ok(&mut self.modules)
    }

    /// Run every module's init hook in registration order
    ///
    /// A failure aborts startup; modules initialized before the failing one
    /// stay initialized and are torn down by [`destroy`](Self::destroy).
    pub fn init_modules(&mut self) -> Result<(), SimError> {
        self.live()?;
        self.modules.run_init_all(&mut self.platform)?;
        info!("Initialized {} module(s)", self.modules.len());
        Ok(())
    }

    /// Run suspend hooks before the host pauses the simulation
    pub fn suspend(&mut self) -> Result<(), SimError> {
        self.live()?;
        self.modules.run_suspend_all(&mut self.platform)?;
        Ok(())
    }

    /// Run resume hooks when the host continues the simulation
    pub fn resume(&mut self) -> Result<(), SimError> {
        self.live()?;
        self.modules.run_resume_all(&mut self.platform)?;
        Ok(())
    }

    /// Let every module describe itself
    pub fn module_info(&mut self, verbose: bool) -> Result<(), StateError> {
        self.live()?;
        self.modules.run_info_all(&mut self.platform, verbose);
        Ok(())
    }

    /// Place a parsed program on the bus and record its entry and text bounds
    pub fn load_program(&mut self, image: &ProgramImage) -> Result<(), SimError> {
        self.live()?;
        image.load_into(self.platform.bus_mut())?;

        info!(
            "Loaded {} program: entry=0x{:x}, {} segment(s)",
            image.format,
            image.entry,
            image.segments.len()
        );
        self.program = Some(ProgramInfo {
            path: None,
            format: image.format.clone(),
            entry: image.entry,
            text: image.text.clone(),
        });
        Ok(())
    }

    /// Read, parse and load a program file
    pub fn load_program_file(&mut self, path: &Path, reader: &dyn ImageReader) -> Result<(), SimError> {
        self.live()?;
        let image = reader.read_file(path)?;
        self.load_program(&image)?;

        if let Some(program) = self.program.as_mut() {
            program.path = Some(path.to_path_buf());
        }
        Ok(())
    }

    /// Current simulated time
    pub fn now(&self) -> Result<u64, StateError> {
        self.live()?;
        Ok(self.platform.now())
    }

    /// Fire every event due at or before `time`
    pub fn advance_to(&mut self, time: u64) -> Result<usize, StateError> {
        self.live()?;
        Ok(self.platform.advance_to(time))
    }

    /// Run uninstall hooks, release the processors and the address space,
    /// and poison the state
    ///
    /// Uninstall failures are reported, not escalated. Every later operation
    /// except [`id`](Self::id) fails with [`StateError::Destroyed`].
    pub fn destroy(&mut self) -> Result<UninstallReport, StateError> {
        self.live()?;
        Ok(self.teardown())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn teardown(&mut self) -> UninstallReport {
        let report = self.modules.run_uninstall_all(&mut self.platform);

        self.platform.release();
        self.program = None;
        self.destroyed = true;
        info!(
            "Destroyed {} '{}' ({} module(s) uninstalled, {} failure(s))",
            self.id,
            self.name,
            report.uninstalled.len(),
            report.failures.len()
        );
        report
    }

    /// Check the sentinel and the structural invariants without aborting
    ///
    /// A destroyed state owns no processors, so only the sentinel is checked.
    pub fn integrity_ok(&self) -> bool {
        if self.magic != SIM_MAGIC_NUMBER {
            return false;
        }
        self.destroyed
            || self.platform.cpu_count() == self.config.cpu.count
            && self
                .platform
                .cpus()
                .iter()
                .enumerate()
                .all(|(index, cpu)| cpu.owner() == self.id && cpu.index() == index)
    }

    /// Abort the process if the state is corrupted
    ///
    /// Corruption means memory safety can no longer be assumed, so this never
    /// returns an error.
    pub fn check_integrity(&self) {
        if !self.integrity_ok() {
            error!(
                "{} failed integrity check: magic=0x{:x}, {} CPU(s) (configured {})",
                self.id,
                self.magic,
                self.platform.cpu_count(),
                self.config.cpu.count
            );
            std::process::abort();
        }
    }
}

impl Drop for SimulationState {
    fn drop(&mut self) {
        if !self.destroyed {
            debug!("{} dropped without destroy()", self.id);
            self.teardown();
        }
    }
}

impl fmt::Debug for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("open_kind", &self.open_kind)
            .field("model", &self.model.name)
            .field("program", &self.program)
            .field("platform", &self.platform)
            .field("modules", &self.modules)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{MachineDesc, Module};

    #[test]
    fn test_create_defaults() {
        let state = SimulationState::create(Config::default()).unwrap();
        assert_eq!(state.name().unwrap(), "simbase");
        assert_eq!(state.cpu_count().unwrap(), 1);
        assert_eq!(state.model().unwrap().name, "generic");
        assert_eq!(state.machine().unwrap().map(|m| m.word_bits), Some(32));
        assert!(state.integrity_ok());
        state.check_integrity();
    }

    #[test]
    fn test_states_have_distinct_ids() {
        let a = SimulationState::create(Config::default()).unwrap();
        let b = SimulationState::create(Config::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.cpu(0).unwrap().owner(), a.id());
        assert_eq!(b.cpu(0).unwrap().owner(), b.id());
    }

    #[test]
    fn test_integrity_detects_corruption() {
        let mut state = SimulationState::create(Config::default()).unwrap();
        state.magic = 0;
        assert!(!state.integrity_ok());
        state.magic = SIM_MAGIC_NUMBER;

        let foreign = CpuContext::new(0, StateId::next(), 16, 64);
        state.platform.cpus_mut()[0] = foreign;
        assert!(!state.integrity_ok());
    }

    #[test]
    fn test_custom_model_table() {
        let mut models = ModelTable::new();
        models.add_machine(MachineDesc {
            name: "toy".to_string(),
            word_bits: 16,
            addr_bits: 16,
            default_model: "toy1".to_string(),
        });
        models.add_model("toy1", "toy").unwrap();
        models.add_model("toy2", "toy").unwrap();

        let mut config = Config::default();
        config.cpu.model = Some("toy2".to_string());
        let state = SimulationState::create_with_models(config, models).unwrap();
        assert_eq!(state.model().unwrap().name, "toy2");

        let mut config = Config::default();
        config.cpu.model = Some("missing".to_string());
        assert!(matches!(
            SimulationState::create(config),
            Err(SimError::Config(sim_core::ConfigError::UnknownModel(_)))
        ));
    }

    #[test]
    fn test_drop_runs_uninstall() {
        use std::cell::Cell;
        use std::rc::Rc;

        let uninstalled = Rc::new(Cell::new(false));
        let flag = uninstalled.clone();
        {
            let mut state = SimulationState::create(Config::default()).unwrap();
            state
                .modules_mut()
                .unwrap()
                .register(Module::new("marker", |_: &mut Platform| Ok(())).with_uninstall(
                    move |_: &mut Platform| {
                        flag.set(true);
                        Ok(())
                    },
                ))
                .unwrap();
            state.init_modules().unwrap();
        }
        assert!(uninstalled.get());
    }

    #[test]
    fn test_destroy_releases_components() {
        let mut config = Config::default();
        config.cpu.count = 2;
        config.memory.backing = sim_core::BackingStrategy::Flat { size: 0x1000 };
        let mut state = SimulationState::create(config).unwrap();
        state
            .load_program(&ProgramImage {
                format: "raw".to_string(),
                entry: 0x10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.now().unwrap(), 0);

        state.destroy().unwrap();

        assert_eq!(state.platform.cpu_count(), 0);
        assert_eq!(state.platform.bus().region_count(), 0);
        assert!(!state.platform.bus().is_flat());
        assert!(state.program.is_none());
        assert!(state.integrity_ok());
        state.check_integrity();

        assert_eq!(state.now(), Err(StateError::Destroyed));
        assert_eq!(state.cpu_count(), Err(StateError::Destroyed));
        assert_eq!(state.name(), Err(StateError::Destroyed));
        assert_eq!(state.program(), Err(StateError::Destroyed));
        assert_eq!(state.entry(), Err(StateError::Destroyed));
        assert!(state.config().is_err());
        assert!(state.model().is_err());
        assert!(state.id().get() > 0);
    }
}
