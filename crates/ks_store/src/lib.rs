//! ks_store: versioned, password-encrypted key storage file
//!
//! # File format
//! The file holds one protobuf-encoded outer layer: Argon2id parameters in
//! cleartext next to the XChaCha20-Poly1305 encrypted inner layer. The inner
//! layer holds the identity, client key, device group key, database key,
//! device IDs and optional work and on-prem data.
//!
//! # Versioning
//! Both layers are versioned independently. Migrations run on the decoded
//! protobuf messages before validation, similar to SQL migrations running
//! before table mappings are applied.
//!
//! # Module layout
//! - `key_storage`: the [`KeyStorage`] trait and its file system implementation
//! - `migrations`: forward-only schema migrations
//! - `contents`: validated contents of both layers
//! - `config`: KDF configuration
//! - `paths`: default file location
//! - `error`: [`KeyStorageError`] and its kinds

pub mod config;
pub mod contents;
pub mod error;
pub mod key_storage;
pub mod migrations;
pub mod paths;

pub use config::{KdfConfig, KeyStorageConfig};
pub use contents::{
    DeviceCookie, DeviceIds, IdentityData, IdentityString, KeyStorageContents, OnPremConfig,
    ServerGroup, WorkCredentials,
};
pub use error::{KeyStorageError, KeyStorageErrorKind};
pub use key_storage::{FileSystemKeyStorage, KeyStorage};
pub use migrations::{MigrationError, MigrationHelper};
