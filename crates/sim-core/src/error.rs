//! Error types for the simbase engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Core memory bus errors
///
/// These describe faults of the simulated program, so they are returned to
/// the instruction dispatch loop rather than aborting the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error(
        "Region 0x{base:x}+0x{len:x} overlaps existing region 0x{existing_base:x}+0x{existing_len:x}"
    )]
    Overlap {
        base: u64,
        len: u64,
        existing_base: u64,
        existing_len: u64,
    },

    #[error("Unmapped access at 0x{addr:x} ({len} bytes)")]
    Unmapped { addr: u64, len: u64 },

    #[error("Permission denied at 0x{addr:x}: {kind}")]
    Permission { addr: u64, kind: AccessKind },

    #[error("Access at 0x{addr:x} ({len} bytes) spans more than one region")]
    MisalignedSpan { addr: u64, len: u64 },

    #[error("Invalid region length 0x{len:x} at 0x{base:x}")]
    InvalidLength { base: u64, len: u64 },

    #[error("Address space uses a flat backing buffer; regions cannot be changed")]
    FlatLayout,

    #[error("Cannot allocate 0x{len:x} bytes of backing memory")]
    OutOfMemory { len: u64 },
}

/// Event scheduler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Stale event handle {0}: event already fired or cancelled")]
    StaleHandle(u64),
}

/// Module lifecycle errors
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module '{0}' is already registered")]
    Duplicate(String),

    #[error("Module '{module}' failed to initialize: {source}")]
    InitFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Module '{module}' {hook} hook failed: {source}")]
    HookFailed {
        module: String,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ModuleError {
    /// Name of the module the error refers to
    pub fn module(&self) -> &str {
        match self {
            Self::Duplicate(name) => name,
            Self::InitFailed { module, .. } | Self::HookFailed { module, .. } => module,
        }
    }
}

/// Program loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Failed to place segment at 0x{addr:x}: {source}")]
    Memory {
        addr: u64,
        #[source]
        source: MemoryError,
    },
}

/// Simulation state errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Simulation state has been destroyed")]
    Destroyed,

    #[error("Invalid CPU index {index} (state has {count} CPUs)")]
    InvalidCpu { index: usize, count: usize },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown machine model '{0}'")]
    UnknownModel(String),
}

/// Per-CPU context errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("Unknown debug flag '{0}'")]
    UnknownDebugFlag(String),
}

/// Kind of memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SimError>;
