//! Machine and model tables
//!
//! A simulator describes the machines (architecture variants) it supports and
//! the concrete models of each machine. The state selects one model at
//! creation time.

use crate::error::ConfigError;

/// Architecture variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineDesc {
    pub name: String,
    /// Natural word size in bits
    pub word_bits: u32,
    /// Address size in bits
    pub addr_bits: u32,
    /// Model used when none is configured
    pub default_model: String,
}

/// Concrete processor model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDesc {
    pub name: String,
    /// Name of the machine this model belongs to
    pub machine: String,
}

/// Table of supported machines and models
#[derive(Debug, Clone, Default)]
pub struct ModelTable {
    machines: Vec<MachineDesc>,
    models: Vec<ModelDesc>,
}

impl ModelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a machine
    pub fn add_machine(&mut self, machine: MachineDesc) -> &mut Self {
        self.machines.push(machine);
        self
    }

    /// Add a model of an already registered machine
    pub fn add_model(&mut self, name: &str, machine: &str) -> Result<&mut Self, ConfigError> {
        if self.machine(machine).is_none() {
            return Err(ConfigError::Invalid(format!(
                "model '{}' refers to unknown machine '{}'",
                name, machine
            )));
        }
        self.models.push(ModelDesc {
            name: name.to_string(),
            machine: machine.to_string(),
        });
        Ok(self)
    }

    /// Look up a machine by name
    pub fn machine(&self, name: &str) -> Option<&MachineDesc> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// Look up a model by name
    pub fn model(&self, name: &str) -> Option<&ModelDesc> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Machine a model belongs to
    pub fn machine_of(&self, model: &ModelDesc) -> Option<&MachineDesc> {
        self.machine(&model.machine)
    }

    /// Resolve the configured model name, falling back to the default model of
    /// the first machine
    pub fn resolve(&self, name: Option<&str>) -> Result<&ModelDesc, ConfigError> {
        let name = match name {
            Some(name) => name,
            None => self
                .machines
                .first()
                .map(|m| m.default_model.as_str())
                .ok_or_else(|| ConfigError::Invalid("model table has no machines".to_string()))?,
        };
        self.model(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    pub fn machines(&self) -> &[MachineDesc] {
        &self.machines
    }

    pub fn models(&self) -> &[ModelDesc] {
        &self.models
    }

    /// Table with one generic 32-bit machine, used when a simulator supplies none
    pub fn generic() -> Self {
        let mut table = Self::new();
        table.add_machine(MachineDesc {
            name: "generic".to_string(),
            word_bits: 32,
            addr_bits: 32,
            default_model: "generic".to_string(),
        });
        table.models.push(ModelDesc {
            name: "generic".to_string(),
            machine: "generic".to_string(),
        });
        table
    }
}
