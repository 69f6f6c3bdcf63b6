//! Validated views of both key storage layers.
//!
//! The wire messages in `ks_proto` accept anything protobuf can encode. The
//! types here are what remains after validation: fixed-length keys, well-formed
//! identities, and KDF parameters that meet the configured floor.

use std::fmt;

use ks_crypto::aead::{MAC_LENGTH, NONCE_LENGTH};
use ks_crypto::{Argon2MinParams, Argon2Version, Argon2idParams, RawKey};
use ks_proto::schema::encrypted_key_storage::KdfParameters;
use ks_proto::{schema as proto, Argon2Version as ProtoArgon2Version};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Expected schema version {expected}, got {actual}")]
    SchemaVersion { expected: u32, actual: u32 },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Field must not be empty: {0}")]
    EmptyField(&'static str),

    #[error("Field {field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid identity: {0:?}")]
    InvalidIdentity(String),

    #[error("Invalid server group: {0:?}")]
    InvalidServerGroup(String),

    #[error("Unknown Argon2 version: {0}")]
    UnknownArgon2Version(i32),

    #[error("KDF parameters below the accepted minimum: {0}")]
    WeakKdfParameters(String),

    #[error("KDF parameters out of range: {0}")]
    KdfParametersOutOfRange(String),
}

// ── Identity and server group ────────────────────────────────────────────────

/// An 8 character identity, e.g. `ECHOECHO` or `*SUPPORT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityString(String);

impl IdentityString {
    pub const LENGTH: usize = 8;

    pub fn new(identity: impl Into<String>) -> Result<Self, ValidationError> {
        let identity = identity.into();
        let bytes = identity.as_bytes();
        let valid = bytes.len() == Self::LENGTH
            && (bytes[0] == b'*' || is_upper_alphanumeric(bytes[0]))
            && bytes[1..].iter().copied().all(is_upper_alphanumeric);
        if !valid {
            return Err(ValidationError::InvalidIdentity(identity));
        }
        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_upper_alphanumeric(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit()
}

/// Server group, a short alphanumeric string such as `"0a"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerGroup(String);

impl ServerGroup {
    pub fn new(group: impl Into<String>) -> Result<Self, ValidationError> {
        let group = group.into();
        if group.is_empty() || !group.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidServerGroup(group));
        }
        Ok(Self(group))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Secrets ──────────────────────────────────────────────────────────────────

/// 16 byte cookie identifying this device towards the chat server.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceCookie([u8; 16]);

impl DeviceCookie {
    pub const LENGTH: usize = 16;

    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for DeviceCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceCookie(<redacted>)")
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WorkCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for WorkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── Plain data ───────────────────────────────────────────────────────────────

/// Cached on-premises provisioning configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnPremConfig {
    pub oppf_url: String,
    /// Unix timestamp in milliseconds.
    pub last_updated: u64,
    pub oppf_cached_config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    pub d2m_device_id: u64,
    pub csp_device_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityData {
    pub identity: IdentityString,
    pub ck: RawKey,
    pub server_group: ServerGroup,
}

/// Validated contents of the inner layer at the current schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStorageContents {
    pub schema_version: u32,
    pub identity_data: IdentityData,
    pub dgk: RawKey,
    pub database_key: RawKey,
    pub device_ids: DeviceIds,
    pub device_cookie: Option<DeviceCookie>,
    pub work_credentials: Option<WorkCredentials>,
    pub on_prem_config: Option<OnPremConfig>,
}

impl KeyStorageContents {
    /// Validate a decoded (and migrated) inner layer.
    pub fn from_schema(
        schema: &proto::DecryptedKeyStorage,
        expected_version: u32,
    ) -> Result<Self, ValidationError> {
        if schema.schema_version != expected_version {
            return Err(ValidationError::SchemaVersion {
                expected: expected_version,
                actual: schema.schema_version,
            });
        }

        let identity_data = schema
            .identity_data
            .as_ref()
            .ok_or(ValidationError::MissingField("identity_data"))?;
        let device_ids = schema
            .device_ids
            .as_ref()
            .ok_or(ValidationError::MissingField("device_ids"))?;

        let device_cookie = match schema.device_cookie.as_deref() {
            None => None,
            Some(bytes) => {
                let cookie: [u8; 16] = bytes.try_into().map_err(|_| ValidationError::InvalidLength {
                    field: "device_cookie",
                    expected: DeviceCookie::LENGTH,
                    actual: bytes.len(),
                })?;
                Some(DeviceCookie::new(cookie))
            }
        };

        let work_credentials = match &schema.work_credentials {
            None => None,
            Some(creds) => {
                if creds.username.is_empty() {
                    return Err(ValidationError::EmptyField("work_credentials.username"));
                }
                Some(WorkCredentials {
                    username: creds.username.clone(),
                    password: creds.password.clone(),
                })
            }
        };

        let on_prem_config = match &schema.on_prem_config {
            None => None,
            Some(config) => {
                if config.oppf_url.is_empty() {
                    return Err(ValidationError::EmptyField("on_prem_config.oppf_url"));
                }
                Some(OnPremConfig {
                    oppf_url: config.oppf_url.clone(),
                    last_updated: config.last_updated,
                    oppf_cached_config: config.oppf_cached_config.clone(),
                })
            }
        };

        Ok(Self {
            schema_version: schema.schema_version,
            identity_data: IdentityData {
                identity: IdentityString::new(identity_data.identity.as_str())?,
                ck: raw_key("identity_data.ck", &identity_data.ck)?,
                server_group: ServerGroup::new(identity_data.server_group.as_str())?,
            },
            dgk: raw_key("dgk", &schema.dgk)?,
            database_key: raw_key("database_key", &schema.database_key)?,
            device_ids: DeviceIds {
                d2m_device_id: device_ids.d2m_device_id,
                csp_device_id: device_ids.csp_device_id,
            },
            device_cookie,
            work_credentials,
            on_prem_config,
        })
    }

    /// Build the wire message for this version. The numeric server group is
    /// no longer written.
    pub fn to_schema(&self) -> proto::DecryptedKeyStorage {
        proto::DecryptedKeyStorage {
            schema_version: self.schema_version,
            identity_data: Some(proto::IdentityData {
                identity: self.identity_data.identity.as_str().to_owned(),
                ck: self.identity_data.ck.as_bytes().to_vec(),
                deprecated_server_group: 0,
                server_group: self.identity_data.server_group.as_str().to_owned(),
            }),
            dgk: self.dgk.as_bytes().to_vec(),
            database_key: self.database_key.as_bytes().to_vec(),
            device_ids: Some(proto::DeviceIds {
                d2m_device_id: self.device_ids.d2m_device_id,
                csp_device_id: self.device_ids.csp_device_id,
            }),
            work_credentials: self.work_credentials.as_ref().map(|creds| proto::WorkCredentials {
                username: creds.username.clone(),
                password: creds.password.clone(),
            }),
            on_prem_config: self.on_prem_config.as_ref().map(|config| proto::OnPremConfig {
                oppf_url: config.oppf_url.clone(),
                last_updated: config.last_updated,
                oppf_cached_config: config.oppf_cached_config.clone(),
            }),
            device_cookie: self.device_cookie.as_ref().map(|c| c.as_bytes().to_vec()),
        }
    }
}

fn raw_key(field: &'static str, bytes: &[u8]) -> Result<RawKey, ValidationError> {
    RawKey::from_slice(bytes).map_err(|_| ValidationError::InvalidLength {
        field,
        expected: RawKey::LENGTH,
        actual: bytes.len(),
    })
}

// ── Outer layer ──────────────────────────────────────────────────────────────

/// Validated outer layer: ciphertext plus usable KDF parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEncryptedKeyStorage {
    pub schema_version: u32,
    /// `nonce || ciphertext`
    pub encrypted_key_storage: Vec<u8>,
    pub kdf_params: Argon2idParams,
}

impl ValidatedEncryptedKeyStorage {
    pub fn from_schema(
        schema: &proto::EncryptedKeyStorage,
        expected_version: u32,
        accept: &Argon2MinParams,
    ) -> Result<Self, ValidationError> {
        if schema.schema_version != expected_version {
            return Err(ValidationError::SchemaVersion {
                expected: expected_version,
                actual: schema.schema_version,
            });
        }

        let min_length = NONCE_LENGTH + MAC_LENGTH;
        if schema.encrypted_key_storage.len() < min_length {
            return Err(ValidationError::InvalidLength {
                field: "encrypted_key_storage",
                expected: min_length,
                actual: schema.encrypted_key_storage.len(),
            });
        }

        let kdf_params = match &schema.kdf_parameters {
            Some(KdfParameters::Argon2id(params)) => kdf_params_from_schema(params)?,
            None => return Err(ValidationError::MissingField("kdf_parameters")),
        };
        let summary = || {
            format!(
                "salt={}B m={} t={} p={}",
                kdf_params.salt.len(),
                kdf_params.memory_bytes,
                kdf_params.iterations,
                kdf_params.parallelism
            )
        };
        if !accept.is_satisfied_by(&kdf_params) {
            return Err(ValidationError::WeakKdfParameters(summary()));
        }
        if !kdf_params.is_within_limits() {
            return Err(ValidationError::KdfParametersOutOfRange(summary()));
        }

        Ok(Self {
            schema_version: schema.schema_version,
            encrypted_key_storage: schema.encrypted_key_storage.clone(),
            kdf_params,
        })
    }
}

pub fn kdf_params_from_schema(
    params: &proto::Argon2idParameters,
) -> Result<Argon2idParams, ValidationError> {
    let version = match ProtoArgon2Version::try_from(params.version) {
        Ok(ProtoArgon2Version::Version13) => Argon2Version::V0x13,
        Err(_) => return Err(ValidationError::UnknownArgon2Version(params.version)),
    };
    Ok(Argon2idParams {
        version,
        salt: params.salt.clone(),
        memory_bytes: params.memory_bytes,
        iterations: params.iterations,
        parallelism: params.parallelism,
    })
}

pub fn kdf_params_to_schema(params: &Argon2idParams) -> proto::Argon2idParameters {
    let version = match params.version {
        Argon2Version::V0x13 => ProtoArgon2Version::Version13,
    };
    proto::Argon2idParameters {
        version: version as i32,
        salt: params.salt.clone(),
        memory_bytes: params.memory_bytes,
        iterations: params.iterations,
        parallelism: params.parallelism,
    }
}
