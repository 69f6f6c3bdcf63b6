//! Benchmark-driven Argon2id parameter selection.
//!
//! One KDF run with the minimum parameters is timed, then memory and
//! iterations are scaled so that a derivation takes roughly the target
//! runtime on this machine. Parameters are only ever raised above the
//! minimum, never lowered.
//!
//! The benchmark is expensive. Run it at most once per logical write and
//! reuse the result.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::CryptoError;
use crate::kdf::{
    derive_key, generate_salt, Argon2MinParams, Argon2Version, Argon2idParams, KdfTargetRuntime,
    MIB,
};

const BENCHMARK_PASSWORD: &[u8] = b"r3gGN9GDQ5NF6tM6";

/// Measured durations below this are treated as timer noise.
const MIN_BENCHMARK_DURATION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct KdfCalibrator {
    min: Argon2MinParams,
    target: KdfTargetRuntime,
}

impl KdfCalibrator {
    pub fn new(min: Argon2MinParams, target: KdfTargetRuntime) -> Self {
        Self { min, target }
    }

    /// Run the benchmark and return fresh parameters with a new random salt.
    pub fn determine_params(&self) -> Result<Argon2idParams, CryptoError> {
        let min = &self.min;
        debug!(
            memory_mib = min.memory_bytes / MIB,
            iterations = min.iterations,
            parallelism = min.parallelism,
            "KDF benchmark starting"
        );
        let benchmark_params = Argon2idParams {
            version: Argon2Version::V0x13,
            salt: generate_salt(min.salt_length_bytes),
            memory_bytes: min.memory_bytes,
            iterations: min.iterations,
            parallelism: min.parallelism,
        };
        let start = Instant::now();
        drop(derive_key(BENCHMARK_PASSWORD, &benchmark_params, None)?);
        let duration = start.elapsed();
        debug!(elapsed_ms = duration.as_millis() as u64, "KDF benchmark completed");

        let (memory_bytes, iterations) = scale_params(min, duration, &self.target);
        debug!(
            memory_mib = memory_bytes / MIB,
            iterations,
            parallelism = min.parallelism,
            "KDF benchmark result"
        );

        let params = Argon2idParams {
            version: Argon2Version::V0x13,
            salt: generate_salt(min.salt_length_bytes),
            memory_bytes,
            iterations,
            parallelism: min.parallelism,
        };
        if !min.is_satisfied_by(&params) {
            return Err(CryptoError::WeakParameters(format!(
                "m={} t={} p={}",
                params.memory_bytes, params.iterations, params.parallelism
            )));
        }
        Ok(params)
    }
}

/// Extrapolate `(memory_bytes, iterations)` from one benchmark run with the
/// minimum parameters.
///
/// Memory is raised first (x4 if the benchmark was more than four times
/// faster than the target, x2 if more than twice as fast), then iterations
/// fill the remaining time budget.
pub fn scale_params(
    min: &Argon2MinParams,
    benchmark: Duration,
    target: &KdfTargetRuntime,
) -> (u64, u32) {
    let duration_ms = benchmark.max(MIN_BENCHMARK_DURATION).as_secs_f64() * 1000.0;
    let target_ms = target.target_ms as f64;

    let runtime_ratio = target_ms / duration_ms;
    let factor: u64 = if runtime_ratio > 4.0 {
        4
    } else if runtime_ratio > 2.0 {
        2
    } else {
        1
    };
    let memory_bytes = min.memory_bytes.saturating_mul(factor);
    let extrapolated_ms = duration_ms * factor as f64;

    // `as` saturates for floats out of range
    let scaled = (f64::from(min.iterations) / extrapolated_ms * target_ms).round() as u32;
    let iterations = scaled.max(min.iterations);

    (memory_bytes, iterations)
}
