//! Configuration system for simbase simulators

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Upper bound on the number of simulated processors in one state
pub const MAX_NR_PROCESSORS: usize = 64;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub debug: DebugConfig,
    /// Free-form runtime options, applied in key order
    pub options: BTreeMap<String, String>,
}

/// General simulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Simulator name (argv[0] of the host)
    pub name: String,
    pub open_kind: OpenKind,
    pub verbose: bool,
}

/// How the simulator was opened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum OpenKind {
    /// Batch run from the command line
    #[default]
    Standalone,
    /// Interactive session under a debugger
    Debug,
}

/// Processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of processors (SMP count)
    pub count: usize,
    /// Machine model name; the default model is used when unset
    pub model: Option<String>,
}

/// Address space settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backing: BackingStrategy,
    pub byte_order: ByteOrder,
}

/// Backing store strategy for the core memory bus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum BackingStrategy {
    /// General address space built from discrete regions
    #[default]
    Mapped,
    /// One flat read/write/execute buffer covering `[0, size)`
    Flat { size: u64 },
}

/// Target byte order for typed bus accesses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Debug and instrumentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Trace categories enabled on every CPU (e.g. "insn", "memory")
    pub trace: Vec<String>,
    /// Maximum number of retained trace records per CPU
    pub trace_capacity: usize,
    /// Profile categories enabled on every CPU (e.g. "insn", "pc")
    pub profile: Vec<String>,
    /// Bucket size in bytes for the PC histogram
    pub pc_bucket_size: u64,
    /// Debug flags enabled on every CPU (e.g. "insn")
    pub debug_flags: Vec<String>,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: "simbase".to_string(),
            open_kind: OpenKind::default(),
            verbose: false,
        }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            count: 1,
            model: None,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backing: BackingStrategy::default(),
            byte_order: ByteOrder::default(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            trace: Vec::new(),
            trace_capacity: 10_000,
            profile: Vec::new(),
            pc_bucket_size: 64,
            debug_flags: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the user config file, or create a default one
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("simbase")
            .join("config.toml")
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu.count == 0 || self.cpu.count > MAX_NR_PROCESSORS {
            return Err(ConfigError::Invalid(format!(
                "cpu.count must be between 1 and {}, got {}",
                MAX_NR_PROCESSORS, self.cpu.count
            )));
        }
        if let BackingStrategy::Flat { size } = self.memory.backing {
            if size == 0 || usize::try_from(size).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "flat memory size 0x{:x} is not allocatable",
                    size
                )));
            }
        }
        if self.debug.pc_bucket_size == 0 || !self.debug.pc_bucket_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "debug.pc_bucket_size must be a power of two, got {}",
                self.debug.pc_bucket_size
            )));
        }
        Ok(())
    }
}
