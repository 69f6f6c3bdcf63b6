//! Forward-only schema migrations for both key storage layers.
//!
//! Each layer carries its own `schema_version`. Migration `i` moves a schema
//! from version `i` to `i + 1`, so the current version of a layer equals the
//! number of its registered migrations. Down-migrations are not supported: a
//! file written by a newer client is rejected.
//!
//! When adding a migration, update the validation in [`crate::contents`] to
//! match the new version.

use std::fmt;

use ks_proto::{DecryptedKeyStorage, EncryptedKeyStorage, VersionedSchema};
use thiserror::Error;
use tracing::{debug, info};

/// Moves a schema forward by exactly one version, in place. The helper
/// bumps `schema_version` afterwards.
pub type Migration<S> = fn(&mut S) -> Result<(), MigrationError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("{schema} key storage has version {version}, newest supported is {supported}")]
    UnsupportedVersion {
        schema: &'static str,
        version: u32,
        supported: u32,
    },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Server group {0:#x} does not fit into a byte")]
    ServerGroupOutOfRange(u32),
}

pub const ENCRYPTED_KEY_STORAGE_MIGRATIONS: &[Migration<EncryptedKeyStorage>] = &[
    // 0 -> 1
    introduce_migrations,
];

pub const DECRYPTED_KEY_STORAGE_MIGRATIONS: &[Migration<DecryptedKeyStorage>] = &[
    // 0 -> 1
    introduce_migrations,
    // 1 -> 2
    server_group_to_string,
];

pub const ENCRYPTED_KEY_STORAGE_SCHEMA_VERSION: u32 = ENCRYPTED_KEY_STORAGE_MIGRATIONS.len() as u32;
pub const DECRYPTED_KEY_STORAGE_SCHEMA_VERSION: u32 = DECRYPTED_KEY_STORAGE_MIGRATIONS.len() as u32;

/// Only introduces the versioning itself, contents stay unchanged.
fn introduce_migrations<S>(_schema: &mut S) -> Result<(), MigrationError> {
    Ok(())
}

/// The numeric server group was replaced by its two-digit lowercase hex form.
fn server_group_to_string(schema: &mut DecryptedKeyStorage) -> Result<(), MigrationError> {
    let identity_data = schema
        .identity_data
        .as_mut()
        .ok_or(MigrationError::MissingField("identity_data"))?;
    let group = u8::try_from(identity_data.deprecated_server_group)
        .map_err(|_| MigrationError::ServerGroupOutOfRange(identity_data.deprecated_server_group))?;
    identity_data.server_group = hex::encode([group]);
    Ok(())
}

/// Applies migrations until a schema reaches the current version.
#[derive(Clone, Copy)]
pub struct MigrationHelper {
    encrypted: &'static [Migration<EncryptedKeyStorage>],
    decrypted: &'static [Migration<DecryptedKeyStorage>],
}

impl MigrationHelper {
    pub fn new(
        encrypted: &'static [Migration<EncryptedKeyStorage>],
        decrypted: &'static [Migration<DecryptedKeyStorage>],
    ) -> Self {
        debug!(
            encrypted = encrypted.len(),
            decrypted = decrypted.len(),
            "Loaded key storage migrations"
        );
        Self {
            encrypted,
            decrypted,
        }
    }

    /// Current version of the outer layer.
    pub fn encrypted_version(&self) -> u32 {
        version_of(self.encrypted)
    }

    /// Current version of the inner layer.
    pub fn decrypted_version(&self) -> u32 {
        version_of(self.decrypted)
    }

    /// Migrate the outer layer in place. Returns whether it changed.
    pub fn migrate_encrypted(
        &self,
        schema: &mut EncryptedKeyStorage,
    ) -> Result<bool, MigrationError> {
        migrate(schema, self.encrypted)
    }

    /// Migrate the inner layer in place. Returns whether it changed.
    pub fn migrate_decrypted(
        &self,
        schema: &mut DecryptedKeyStorage,
    ) -> Result<bool, MigrationError> {
        migrate(schema, self.decrypted)
    }

    /// Upper bound on the number of passes a read needs: one rewrite per
    /// possible outer and inner migration plus the final pass.
    pub fn max_read_passes(&self) -> usize {
        self.encrypted.len() + self.decrypted.len() + 1
    }
}

impl Default for MigrationHelper {
    fn default() -> Self {
        Self::new(ENCRYPTED_KEY_STORAGE_MIGRATIONS, DECRYPTED_KEY_STORAGE_MIGRATIONS)
    }
}

impl fmt::Debug for MigrationHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationHelper")
            .field("encrypted_version", &self.encrypted_version())
            .field("decrypted_version", &self.decrypted_version())
            .finish()
    }
}

fn version_of<S>(migrations: &[Migration<S>]) -> u32 {
    u32::try_from(migrations.len()).unwrap_or(u32::MAX)
}

fn migrate<S: VersionedSchema>(
    schema: &mut S,
    migrations: &[Migration<S>],
) -> Result<bool, MigrationError> {
    let original_version = schema.schema_version();
    let target_version = version_of(migrations);
    if original_version > target_version {
        return Err(MigrationError::UnsupportedVersion {
            schema: S::NAME,
            version: original_version,
            supported: target_version,
        });
    }

    while schema.schema_version() < target_version {
        let version = schema.schema_version();
        let up_migration = migrations[version as usize];
        up_migration(schema)?;
        schema.set_schema_version(version + 1);
        debug!(
            schema = S::NAME,
            version = version + 1,
            "Processed key storage up-migration"
        );
    }

    if schema.schema_version() > original_version {
        info!(
            schema = S::NAME,
            from = original_version,
            to = schema.schema_version(),
            "Migrated key storage format"
        );
        return Ok(true);
    }
    Ok(false)
}
