//! ks_crypto: cryptographic building blocks of the key storage vault
//!
//! # Design principles
//! - NO custom crypto; Argon2id and XChaCha20-Poly1305 come from audited Rust crates.
//! - Every derived or decrypted secret is zeroized on drop.
//! - KDF parameters are never weaker than the configured minimum.
//!
//! # Module layout
//! - `aead`: XChaCha20-Poly1305 with the nonce prepended to the ciphertext
//! - `kdf`: Argon2id parameters and password key derivation
//! - `calibrate`: benchmark-driven choice of Argon2id parameters
//! - `secret`: zeroizing key newtypes
//! - `error`: unified error type

pub mod aead;
pub mod calibrate;
pub mod error;
pub mod kdf;
pub mod secret;

pub use calibrate::KdfCalibrator;
pub use error::CryptoError;
pub use kdf::{Argon2MinParams, Argon2Version, Argon2idParams, KdfTargetRuntime};
pub use secret::RawKey;
