//! Password key derivation (Argon2id)
//!
//! The key storage file is encrypted with a 32-byte key derived from the
//! user's password. The Argon2id parameters travel in cleartext next to the
//! ciphertext; they are not secret, only the password is.
//!
//! There are always two sets of minimum parameters: the absolute minimum that
//! is accepted when reading a file (`ARGON2_MIN_PARAMS_ACCEPT`) and the minimum
//! used when creating a file (`ARGON2_MIN_PARAMS_CREATE`). The latter is the
//! starting point of the benchmark in [`crate::calibrate`].
//!
//! Reference runtimes for the minimum parameters (m=128 MiB, t=3, p=1):
//!
//! - AMD Ryzen 9 5900X: 0.207 s
//! - Intel Xeon 6140:   0.748 s
//! - Intel Atom D525:   3.526 s

use std::time::{Duration, Instant};

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::secret::RawKey;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Minimum Argon2id parameters accepted when reading a key storage file.
pub const ARGON2_MIN_PARAMS_ACCEPT: Argon2MinParams = Argon2MinParams {
    salt_length_bytes: 16,
    memory_bytes: 128 * MIB,
    iterations: 3,
    parallelism: 1,
};

/// Minimum Argon2id parameters used when writing a key storage file.
pub const ARGON2_MIN_PARAMS_CREATE: Argon2MinParams = Argon2MinParams {
    salt_length_bytes: 16,
    memory_bytes: 128 * MIB,
    iterations: 3,
    parallelism: 1,
};

/// Largest accepted memory cost.
pub const ARGON2_MAX_MEMORY_BYTES: u64 = u32::MAX as u64;

/// Largest degree of parallelism Argon2 supports.
pub const ARGON2_MAX_PARALLELISM: u32 = Params::MAX_P_COST;

/// Argon2 version. Only 1.3 (0x13) is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Version {
    V0x13,
}

impl From<Argon2Version> for Version {
    fn from(version: Argon2Version) -> Self {
        match version {
            Argon2Version::V0x13 => Version::V0x13,
        }
    }
}

/// Full parameter set needed to re-derive a key from a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argon2idParams {
    pub version: Argon2Version,
    pub salt: Vec<u8>,
    pub memory_bytes: u64,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2idParams {
    /// Whether Argon2 can run with these parameters at all.
    ///
    /// Memory is capped at the 32-bit width the parameters historically had
    /// on disk, so a file cannot request terabytes.
    pub fn is_within_limits(&self) -> bool {
        self.memory_bytes <= ARGON2_MAX_MEMORY_BYTES
            && self.parallelism >= 1
            && self.parallelism <= ARGON2_MAX_PARALLELISM
            && self.memory_bytes / KIB >= 8 * u64::from(self.parallelism)
    }
}

/// A floor for Argon2id parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2MinParams {
    pub salt_length_bytes: usize,
    pub memory_bytes: u64,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2MinParams {
    /// Whether `params` meets every floor, salt length included.
    pub fn is_satisfied_by(&self, params: &Argon2idParams) -> bool {
        params.salt.len() >= self.salt_length_bytes
            && params.memory_bytes >= self.memory_bytes
            && params.iterations >= self.iterations
            && params.parallelism >= self.parallelism
    }
}

/// Target runtime of the KDF plus the bounds outside of which a warning is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfTargetRuntime {
    pub min_ms: u64,
    pub target_ms: u64,
    pub max_ms: u64,
}

impl KdfTargetRuntime {
    pub fn contains(&self, duration: Duration) -> bool {
        let ms = duration.as_millis();
        ms >= u128::from(self.min_ms) && ms <= u128::from(self.max_ms)
    }
}

impl Default for KdfTargetRuntime {
    fn default() -> Self {
        Self {
            min_ms: 1000,
            target_ms: 2000,
            max_ms: 3000,
        }
    }
}

/// Derive a 32-byte key from a low-entropy password using Argon2id.
///
/// If `warn_bounds` is set, a runtime outside of `[min_ms, max_ms]` is logged
/// as a warning.
pub fn derive_key(
    password: &[u8],
    params: &Argon2idParams,
    warn_bounds: Option<&KdfTargetRuntime>,
) -> Result<RawKey, CryptoError> {
    let memory_kib = u32::try_from(params.memory_bytes / KIB).map_err(|_| {
        CryptoError::KeyDerivation(format!(
            "memory cost of {} bytes is out of range",
            params.memory_bytes
        ))
    })?;
    let argon2_params = Params::new(
        memory_kib,
        params.iterations,
        params.parallelism,
        Some(RawKey::LENGTH),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, params.version.into(), argon2_params);

    let start = Instant::now();
    let mut output = Zeroizing::new([0u8; RawKey::LENGTH]);
    argon2
        .hash_password_into(password, &params.salt, &mut output[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let elapsed = start.elapsed();

    match warn_bounds {
        Some(bounds) if !bounds.contains(elapsed) => {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "KDF ran outside of expected bounds")
        }
        _ => debug!(elapsed_ms = elapsed.as_millis() as u64, "KDF completed"),
    }

    Ok(RawKey::new(*output))
}

/// Generate a fresh random salt of `length` bytes.
pub fn generate_salt(length: usize) -> Vec<u8> {
    let mut salt = vec![0u8; length];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
