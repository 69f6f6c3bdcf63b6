//! Key storage configuration.
//!
//! Defaults are the production values. A JSON file may override any subset of
//! the top-level sections.

use std::path::Path;

use anyhow::{Context, Result};
use ks_crypto::kdf::{ARGON2_MIN_PARAMS_ACCEPT, ARGON2_MIN_PARAMS_CREATE};
use ks_crypto::{Argon2MinParams, KdfTargetRuntime};
use serde::{Deserialize, Serialize};

/// Overrides the memory floor accepted when reading a key storage file.
pub const ENV_ARGON2_MIN_MEMORY_BYTES: &str = "KS_ARGON2_MIN_MEMORY_BYTES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Weakest parameters accepted when reading a file.
    pub accept: Argon2MinParams,
    /// Starting point of the benchmark when writing a file.
    pub create: Argon2MinParams,
    pub target_runtime: KdfTargetRuntime,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            accept: ARGON2_MIN_PARAMS_ACCEPT,
            create: ARGON2_MIN_PARAMS_CREATE,
            target_runtime: KdfTargetRuntime::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStorageConfig {
    pub kdf: KdfConfig,
}

impl KeyStorageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(ENV_ARGON2_MIN_MEMORY_BYTES) {
            self.kdf.accept.memory_bytes = value
                .trim()
                .parse()
                .with_context(|| format!("{ENV_ARGON2_MIN_MEMORY_BYTES} is not a byte count"))?;
        }
        Ok(self)
    }
}
