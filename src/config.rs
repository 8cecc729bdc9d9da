//! bpfvm Configuration
//!
//! Handles parsing of bpfvm.toml configuration files and the shared VM
//! constants.
//!
//! ```toml
//! [interpreter]
//! instruction_budget = 128
//! jset = "fault"          # or "bit-test", "no-branch"
//!
//! [[memory.regions]]
//! base = 0x1000
//! size = 64
//! fill = 0
//! ```

use crate::interp::{Interpreter, Memory, MemoryError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Instructions a single run may dispatch before it faults
pub const DEFAULT_INSTRUCTION_BUDGET: u64 = 128;

/// Name of the configuration file searched for by [`VmConfig::find_and_load`]
pub const CONFIG_FILE_NAME: &str = "bpfvm.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid memory map: {0}")]
    Memory(#[from] MemoryError),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the interpreter treats `jset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JsetPolicy {
    /// Fault with `UnsupportedOpcode`
    #[default]
    Fault,
    /// Branch when `dst & src != 0`
    BitTest,
    /// Accept `jset` and always fall through
    NoBranch,
}

impl std::str::FromStr for JsetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fault" => Ok(JsetPolicy::Fault),
            "bit-test" => Ok(JsetPolicy::BitTest),
            "no-branch" => Ok(JsetPolicy::NoBranch),
            other => Err(format!("unknown jset policy '{}'", other)),
        }
    }
}

/// Root configuration structure matching bpfvm.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VmConfig {
    /// Interpreter settings
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// Guest memory map
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl VmConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Map every configured region into a fresh [`Memory`].
    pub fn build_memory(&self) -> ConfigResult<Memory> {
        let mut memory = Memory::new();
        for region in &self.memory.regions {
            memory.map_filled(region.base, region.size, region.fill)?;
        }
        Ok(memory)
    }

    /// Build an interpreter with this budget, jset policy and memory map.
    pub fn build_interpreter(&self) -> ConfigResult<Interpreter> {
        Ok(Interpreter::new()
            .with_budget(self.interpreter.instruction_budget)
            .with_jset(self.interpreter.jset)
            .with_memory(self.build_memory()?))
    }
}

/// Interpreter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpreterConfig {
    /// Maximum instructions dispatched per run
    #[serde(default = "default_instruction_budget")]
    pub instruction_budget: u64,

    /// `jset` handling
    #[serde(default)]
    pub jset: JsetPolicy,
}

fn default_instruction_budget() -> u64 {
    DEFAULT_INSTRUCTION_BUDGET
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            instruction_budget: DEFAULT_INSTRUCTION_BUDGET,
            jset: JsetPolicy::default(),
        }
    }
}

/// Guest memory map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

/// One guest region.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegionConfig {
    /// Guest base address
    pub base: u64,

    /// Size in bytes
    pub size: usize,

    /// Initial value of every byte
    #[serde(default)]
    pub fill: u8,
}
