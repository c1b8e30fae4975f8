//! Run configuration.
//!
//! Values come from an optional TOML file; the binary then overrides individual fields
//! from its command line. Every field has a default, so an empty file is valid.

use crate::eigen::EigenMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EigMixConfig {
    /// Worker threads for accumulation. Values below one run single-threaded.
    pub threads: usize,
    /// Eigenpairs to compute. Negative or larger than the sample count means all.
    pub eigen_count: i64,
    /// Keep the normalized relationship matrix in the result.
    pub need_matrix: bool,
    pub eigen_method: EigenMethod,
    /// Report accumulation progress.
    pub verbose: bool,
}

impl Default for EigMixConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            eigen_count: 32,
            need_matrix: false,
            eigen_method: EigenMethod::Dense,
            verbose: true,
        }
    }
}

impl EigMixConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }

    pub fn from_toml_str(toml_string: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_string)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Worker count with the lower bound applied.
    pub fn workers(&self) -> usize {
        self.threads.max(1)
    }

    /// Number of eigenpairs to request for `n_samples` samples.
    pub fn eigen_count_for(&self, n_samples: usize) -> usize {
        match usize::try_from(self.eigen_count) {
            Ok(count) if count <= n_samples => count,
            _ => n_samples,
        }
    }
}
