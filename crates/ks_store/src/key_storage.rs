//! File-backed key storage engine.
//!
//! # Pipeline
//!
//! Writing:
//!
//! ```text
//! KeyStorageContents -> encode inner -> encrypt -> encode outer -> file
//! ```
//!
//! Reading reverses this, with migrations in between:
//!
//! 1. Read and decode the outer layer.
//! 2. If the outer layer is not current, migrate it, validate it, rewrite the
//!    file and start over.
//! 3. Decrypt and decode the inner layer, migrate it if needed, validate it.
//! 4. If the inner layer was migrated, rewrite the file with fresh KDF
//!    parameters and start over. The reload checks that the rewrite worked.
//!
//! The number of passes is bounded by the number of registered migrations.
//!
//! No locking happens here; callers must serialise access to one file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ks_crypto::{aead, kdf, Argon2idParams, KdfCalibrator};
use ks_proto::{codec, DecryptedKeyStorage, EncryptedKeyStorage, KdfParameters};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::KeyStorageConfig;
use crate::contents::{
    kdf_params_to_schema, KeyStorageContents, OnPremConfig, ValidatedEncryptedKeyStorage,
    WorkCredentials,
};
use crate::error::{KeyStorageError, KeyStorageErrorKind};
use crate::migrations::{MigrationError, MigrationHelper};

/// Durable, password-protected storage of the user's key material.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    /// Whether a key storage file exists. Does not check its contents.
    async fn is_present(&self) -> bool;

    /// Read, migrate and validate the key storage.
    async fn read(&self, password: &str) -> Result<KeyStorageContents, KeyStorageError>;

    /// Create or overwrite the key storage with freshly calibrated KDF
    /// parameters.
    async fn write(&self, password: &str, contents: &KeyStorageContents)
        -> Result<(), KeyStorageError>;

    async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), KeyStorageError>;

    async fn change_work_credentials(
        &self,
        password: &str,
        work_credentials: WorkCredentials,
    ) -> Result<(), KeyStorageError>;

    async fn change_cached_on_prem_config(
        &self,
        password: &str,
        on_prem_config: OnPremConfig,
    ) -> Result<(), KeyStorageError>;
}

#[derive(Debug)]
pub struct FileSystemKeyStorage {
    path: PathBuf,
    config: KeyStorageConfig,
    migrations: MigrationHelper,
}

impl FileSystemKeyStorage {
    /// `path` does not need to exist yet, but its parent directory must.
    pub fn new(path: impl Into<PathBuf>, config: KeyStorageConfig) -> Result<Self, KeyStorageError> {
        Self::with_migrations(path, config, MigrationHelper::default())
    }

    pub fn with_migrations(
        path: impl Into<PathBuf>,
        config: KeyStorageConfig,
        migrations: MigrationHelper,
    ) -> Result<Self, KeyStorageError> {
        let path = path.into();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(KeyStorageError::new(
                KeyStorageErrorKind::NotFound,
                format!("Key storage directory {} does not exist", parent.display()),
            ));
        }
        debug!(path = %path.display(), "Key storage path");
        Ok(Self {
            path,
            config,
            migrations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_with_params(
        &self,
        password: &str,
        contents: &KeyStorageContents,
        kdf_params: &Argon2idParams,
    ) -> Result<(), KeyStorageError> {
        let encrypted = self.encrypt_key_storage(contents, password, kdf_params)?;
        self.write_encrypted(&encrypted).await
    }

    /// Benchmark the KDF. Takes seconds with production settings, so run it
    /// at most once per operation.
    fn determine_params(&self) -> Result<Argon2idParams, KeyStorageError> {
        KdfCalibrator::new(self.config.kdf.create, self.config.kdf.target_runtime)
            .determine_params()
            .map_err(|err| {
                KeyStorageError::new(
                    KeyStorageErrorKind::InternalError,
                    "Cannot determine KDF parameters",
                )
                .with_source(err)
            })
    }

    fn derive_key(
        &self,
        password: &str,
        kdf_params: &Argon2idParams,
    ) -> Result<ks_crypto::RawKey, KeyStorageError> {
        kdf::derive_key(
            password.as_bytes(),
            kdf_params,
            Some(&self.config.kdf.target_runtime),
        )
        .map_err(|err| {
            KeyStorageError::new(KeyStorageErrorKind::InternalError, "Key derivation failed")
                .with_source(err)
        })
    }

    fn check_schema_version(&self, contents: &KeyStorageContents) -> Result<(), KeyStorageError> {
        let expected = self.migrations.decrypted_version();
        if contents.schema_version != expected {
            return Err(KeyStorageError::new(
                KeyStorageErrorKind::InternalError,
                format!(
                    "Decrypted key storage has schema version {}, expected {expected}",
                    contents.schema_version
                ),
            ));
        }
        Ok(())
    }

    /// Read and decode the outer layer. Ensures the file is not empty but
    /// does not validate it.
    async fn read_encrypted(&self) -> Result<EncryptedKeyStorage, KeyStorageError> {
        if !self.is_present().await {
            return Err(KeyStorageError::new(
                KeyStorageErrorKind::NotFound,
                format!("Key storage file at {} does not exist", self.path.display()),
            ));
        }

        let bytes = fs::read(&self.path).await.map_err(|err| {
            KeyStorageError::new(
                KeyStorageErrorKind::NotReadable,
                format!("Key storage file at {} cannot be read", self.path.display()),
            )
            .with_source(err)
        })?;

        if bytes.is_empty() {
            return Err(KeyStorageError::new(
                KeyStorageErrorKind::Malformed,
                format!("Key storage file at {} is empty", self.path.display()),
            ));
        }

        codec::decode(&bytes).map_err(|err| {
            KeyStorageError::new(
                KeyStorageErrorKind::Malformed,
                "Cannot decode encrypted key storage file",
            )
            .with_source(err)
        })
    }

    /// Encode the outer layer and create or replace the file.
    async fn write_encrypted(&self, encrypted: &EncryptedKeyStorage) -> Result<(), KeyStorageError> {
        let bytes = codec::encode(encrypted);
        let not_writable = |err: std::io::Error| {
            KeyStorageError::new(
                KeyStorageErrorKind::NotWritable,
                format!("Key storage file at {} cannot be written", self.path.display()),
            )
            .with_source(err)
        };

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path).await.map_err(not_writable)?;
        file.write_all(&bytes).await.map_err(not_writable)?;
        file.sync_all().await.map_err(not_writable)?;
        debug!(bytes = bytes.len(), "Key storage file written");
        Ok(())
    }

    /// Validate the outer layer, then decrypt and decode the inner layer.
    fn decrypt_key_storage(
        &self,
        encrypted: &EncryptedKeyStorage,
        password: &str,
    ) -> Result<DecryptedKeyStorage, KeyStorageError> {
        let validated = ValidatedEncryptedKeyStorage::from_schema(
            encrypted,
            self.migrations.encrypted_version(),
            &self.config.kdf.accept,
        )
        .map_err(|err| {
            KeyStorageError::new(
                KeyStorageErrorKind::Invalid,
                "Encrypted key storage contents do not pass validation",
            )
            .with_source(err)
        })?;

        let key = self.derive_key(password, &validated.kdf_params)?;
        let plaintext = aead::decrypt(key.as_bytes(), &validated.encrypted_key_storage)
            .map_err(|err| {
                KeyStorageError::new(
                    KeyStorageErrorKind::Undecryptable,
                    "Cannot decrypt encrypted key storage",
                )
                .with_source(err)
            })?;
        drop(key);

        codec::decode(&plaintext).map_err(|err| {
            KeyStorageError::new(
                KeyStorageErrorKind::Malformed,
                "Cannot decode decrypted key storage",
            )
            .with_source(err)
        })
    }

    /// Encode and encrypt the contents into a current outer layer.
    fn encrypt_key_storage(
        &self,
        contents: &KeyStorageContents,
        password: &str,
        kdf_params: &Argon2idParams,
    ) -> Result<EncryptedKeyStorage, KeyStorageError> {
        self.check_schema_version(contents)?;

        let key = self.derive_key(password, kdf_params)?;
        let plaintext = codec::encode_secret(&contents.to_schema());
        let ciphertext = aead::encrypt(key.as_bytes(), &plaintext).map_err(|err| {
            KeyStorageError::new(
                KeyStorageErrorKind::InternalError,
                "Cannot encrypt key storage",
            )
            .with_source(err)
        })?;

        Ok(EncryptedKeyStorage {
            schema_version: self.migrations.encrypted_version(),
            encrypted_key_storage: ciphertext,
            kdf_parameters: Some(KdfParameters::Argon2id(kdf_params_to_schema(kdf_params))),
        })
    }
}

fn migration_failed(err: MigrationError) -> KeyStorageError {
    let message = match &err {
        MigrationError::UnsupportedVersion { .. } => "Key storage was written by a newer version",
        _ => "Key storage migration failed",
    };
    KeyStorageError::new(KeyStorageErrorKind::Invalid, message).with_source(err)
}

#[async_trait]
impl KeyStorage for FileSystemKeyStorage {
    async fn is_present(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn read(&self, password: &str) -> Result<KeyStorageContents, KeyStorageError> {
        debug!("Reading key storage");

        let mut cached_kdf_params: Option<Argon2idParams> = None;

        for _ in 0..self.migrations.max_read_passes() {
            let mut encrypted = self.read_encrypted().await?;

            if self
                .migrations
                .migrate_encrypted(&mut encrypted)
                .map_err(migration_failed)?
            {
                if let Err(err) = ValidatedEncryptedKeyStorage::from_schema(
                    &encrypted,
                    self.migrations.encrypted_version(),
                    &self.config.kdf.accept,
                ) {
                    return Err(KeyStorageError::new(
                        KeyStorageErrorKind::InternalError,
                        "Encrypted key storage contents do not pass validation after migration",
                    )
                    .with_source(err));
                }
                self.write_encrypted(&encrypted).await?;
                continue;
            }

            let mut decrypted = self.decrypt_key_storage(&encrypted, password)?;
            let migrated = self
                .migrations
                .migrate_decrypted(&mut decrypted)
                .map_err(migration_failed)?;

            let contents =
                KeyStorageContents::from_schema(&decrypted, self.migrations.decrypted_version())
                    .map_err(|err| {
                        KeyStorageError::new(
                            KeyStorageErrorKind::Invalid,
                            "Decrypted key storage contents do not pass validation",
                        )
                        .with_source(err)
                    })?;

            if migrated {
                let kdf_params = match cached_kdf_params.take() {
                    Some(params) => params,
                    None => self.determine_params()?,
                };
                self.write_with_params(password, &contents, &kdf_params).await?;
                cached_kdf_params = Some(kdf_params);
                continue;
            }

            info!(
                encrypted = encrypted.schema_version,
                decrypted = decrypted.schema_version,
                "Key storage loaded from file"
            );
            return Ok(contents);
        }

        Err(KeyStorageError::new(
            KeyStorageErrorKind::InternalError,
            "Key storage still required migrations after the maximum number of passes",
        ))
    }

    async fn write(
        &self,
        password: &str,
        contents: &KeyStorageContents,
    ) -> Result<(), KeyStorageError> {
        self.check_schema_version(contents)?;
        let kdf_params = self.determine_params()?;
        self.write_with_params(password, contents, &kdf_params).await
    }

    async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), KeyStorageError> {
        let contents = self.read(current_password).await?;
        self.write(new_password, &contents).await
    }

    async fn change_work_credentials(
        &self,
        password: &str,
        work_credentials: WorkCredentials,
    ) -> Result<(), KeyStorageError> {
        let mut contents = self.read(password).await?;
        contents.work_credentials = Some(work_credentials);
        self.write(password, &contents).await
    }

    async fn change_cached_on_prem_config(
        &self,
        password: &str,
        on_prem_config: OnPremConfig,
    ) -> Result<(), KeyStorageError> {
        let mut contents = self.read(password).await?;
        contents.on_prem_config = Some(on_prem_config);
        self.write(password, &contents).await
    }
}
