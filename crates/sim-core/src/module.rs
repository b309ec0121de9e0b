//! Module lifecycle registry
//!
//! Independently developed subsystems (memory, events, profiling, tracing,
//! model tables, I/O) register init and teardown hooks here. Init hooks run in
//! registration order; uninstall and suspend hooks run in reverse order, so a
//! module never observes one of its dependencies already torn down.

use crate::error::ModuleError;
use std::fmt;

/// Lifecycle hook receiving the simulator context
pub type ModuleHook<C> = Box<dyn FnMut(&mut C) -> anyhow::Result<()>>;

/// Hook describing a module; the flag requests verbose output
pub type InfoHook<C> = Box<dyn FnMut(&mut C, bool)>;

/// Lifecycle position of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Registered, init not yet run (or failed)
    Registered,
    /// Init succeeded
    Initialized,
    /// Uninstall has run
    Uninstalled,
}

/// A subsystem with its own lifecycle hooks
pub struct Module<C> {
    name: String,
    init: ModuleHook<C>,
    uninstall: Option<ModuleHook<C>>,
    suspend: Option<ModuleHook<C>>,
    resume: Option<ModuleHook<C>>,
    info: Option<InfoHook<C>>,
}

impl<C> Module<C> {
    /// Create a module with an init hook
    pub fn new<F>(name: &str, init: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + 'static,
    {
        Self {
            name: name.to_string(),
            init: Box::new(init),
            uninstall: None,
            suspend: None,
            resume: None,
            info: None,
        }
    }

    /// Attach an uninstall hook
    pub fn with_uninstall<F>(mut self, uninstall: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + 'static,
    {
        self.uninstall = Some(Box::new(uninstall));
        self
    }

    /// Attach a hook run before the simulation is suspended
    pub fn with_suspend<F>(mut self, suspend: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + 'static,
    {
        self.suspend = Some(Box::new(suspend));
        self
    }

    /// Attach a hook run when the simulation resumes
    pub fn with_resume<F>(mut self, resume: F) -> Self
    where
        F: FnMut(&mut C) -> anyhow::Result<()> + 'static,
    {
        self.resume = Some(Box::new(resume));
        self
    }

    /// Attach an info hook
    pub fn with_info<F>(mut self, info: F) -> Self
    where
        F: FnMut(&mut C, bool) + 'static,
    {
        self.info = Some(Box::new(info));
        self
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether an uninstall hook is attached
    pub fn has_uninstall(&self) -> bool {
        self.uninstall.is_some()
    }
}

impl<C> fmt::Debug for Module<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("uninstall", &self.uninstall.is_some())
            .field("suspend", &self.suspend.is_some())
            .field("resume", &self.resume.is_some())
            .field("info", &self.info.is_some())
            .finish()
    }
}

/// Outcome of a best-effort teardown
#[derive(Debug, Default)]
pub struct UninstallReport {
    /// Modules whose teardown ran, in teardown order
    pub uninstalled: Vec<String>,
    /// Modules whose uninstall hook failed, with the error
    pub failures: Vec<(String, anyhow::Error)>,
}

impl UninstallReport {
    /// Whether every uninstall hook succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Entry<C> {
    module: Module<C>,
    state: ModuleState,
}

/// Ordered registry of modules
pub struct ModuleRegistry<C> {
    entries: Vec<Entry<C>>,
}

impl<C> ModuleRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a module; names must be unique
    pub fn register(&mut self, module: Module<C>) -> Result<(), ModuleError> {
        if self.contains(module.name()) {
            return Err(ModuleError::Duplicate(module.name.clone()));
        }

        tracing::debug!("Registered module '{}'", module.name);
        self.entries.push(Entry {
            module,
            state: ModuleState::Registered,
        });
        Ok(())
    }

    /// Run init hooks in registration order
    ///
    /// Stops at the first failure. Modules initialized before the failing one
    /// stay initialized; the host decides whether to tear them down. Modules
    /// that already ran init are skipped, so a retry after fixing the cause
    /// resumes where it stopped.
    pub fn run_init_all(&mut self, ctx: &mut C) -> Result<(), ModuleError> {
        for entry in &mut self.entries {
            if entry.state != ModuleState::Registered {
                continue;
            }

            (entry.module.init)(ctx).map_err(|source| {
                tracing::error!("Module '{}' failed to initialize: {:#}", entry.module.name, source);
                ModuleError::InitFailed {
                    module: entry.module.name.clone(),
                    source,
                }
            })?;

            entry.state = ModuleState::Initialized;
            tracing::debug!("Initialized module '{}'", entry.module.name);
        }
        Ok(())
    }

    /// Run uninstall hooks in reverse registration order
    ///
    /// Only initialized modules are torn down. Failures are logged and
    /// collected; teardown always continues to the first module.
    pub fn run_uninstall_all(&mut self, ctx: &mut C) -> UninstallReport {
        let mut report = UninstallReport::default();

        for entry in self.entries.iter_mut().rev() {
            if entry.state != ModuleState::Initialized {
                continue;
            }
            entry.state = ModuleState::Uninstalled;

            if let Some(uninstall) = entry.module.uninstall.as_mut() {
                if let Err(err) = uninstall(ctx) {
                    tracing::warn!("Module '{}' failed to uninstall: {:#}", entry.module.name, err);
                    report.failures.push((entry.module.name.clone(), err));
                    continue;
                }
            }

            tracing::debug!("Uninstalled module '{}'", entry.module.name);
            report.uninstalled.push(entry.module.name.clone());
        }

        report
    }

    /// Run suspend hooks of initialized modules in reverse order
    pub fn run_suspend_all(&mut self, ctx: &mut C) -> Result<(), ModuleError> {
        for entry in self.entries.iter_mut().rev() {
            if entry.state != ModuleState::Initialized {
                continue;
            }
            if let Some(suspend) = entry.module.suspend.as_mut() {
                suspend(ctx).map_err(|source| ModuleError::HookFailed {
                    module: entry.module.name.clone(),
                    hook: "suspend",
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Run resume hooks of initialized modules in registration order
    pub fn run_resume_all(&mut self, ctx: &mut C) -> Result<(), ModuleError> {
        for entry in &mut self.entries {
            if entry.state != ModuleState::Initialized {
                continue;
            }
            if let Some(resume) = entry.module.resume.as_mut() {
                resume(ctx).map_err(|source| ModuleError::HookFailed {
                    module: entry.module.name.clone(),
                    hook: "resume",
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Run info hooks in registration order
    pub fn run_info_all(&mut self, ctx: &mut C, verbose: bool) {
        for entry in &mut self.entries {
            if let Some(info) = entry.module.info.as_mut() {
                info(ctx, verbose);
            }
        }
    }

    /// Whether a module with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.module.name == name)
    }

    /// Lifecycle state of a module
    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.entries
            .iter()
            .find(|e| e.module.name == name)
            .map(|e| e.state)
    }

    /// Whether a module's init has run successfully and it is not torn down
    pub fn is_initialized(&self, name: &str) -> bool {
        self.state(name) == Some(ModuleState::Initialized)
    }

    /// Module names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.module.name()).collect()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for ModuleRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ModuleRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.module.name, e.state)))
            .finish()
    }
}
