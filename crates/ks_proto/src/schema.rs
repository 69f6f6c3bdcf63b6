//! Protobuf messages of the key storage file.
//!
//! Messages that carry secrets zeroize them on drop and redact them in their
//! `Debug` output.

use std::fmt;

use zeroize::Zeroize;

/// Access to the `schema_version` field shared by both layers.
pub trait VersionedSchema {
    /// Name used in log output.
    const NAME: &'static str;

    fn schema_version(&self) -> u32;

    fn set_schema_version(&mut self, version: u32);
}

// ── Outer layer ──────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EncryptedKeyStorage {
    /// Schema version of this (outer) layer.
    #[prost(uint32, tag = "3")]
    pub schema_version: u32,
    /// `nonce || ciphertext` of the encoded [`DecryptedKeyStorage`], encrypted
    /// with a 32-byte key derived from the user's password.
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_key_storage: Vec<u8>,
    #[prost(oneof = "encrypted_key_storage::KdfParameters", tags = "2")]
    pub kdf_parameters: Option<encrypted_key_storage::KdfParameters>,
}

pub mod encrypted_key_storage {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum KdfParameters {
        #[prost(message, tag = "2")]
        Argon2id(super::Argon2idParameters),
    }
}

/// Argon2id parameters.
///
/// Recommended minimums: 16 byte salt, 128 MiB memory, 3 iterations,
/// parallelism 1.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Argon2idParameters {
    #[prost(enumeration = "argon2id_parameters::Argon2Version", tag = "1")]
    pub version: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub salt: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub memory_bytes: u64,
    #[prost(uint32, tag = "4")]
    pub iterations: u32,
    #[prost(uint32, tag = "5")]
    pub parallelism: u32,
}

pub mod argon2id_parameters {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Argon2Version {
        Version13 = 0,
    }
}

impl VersionedSchema for EncryptedKeyStorage {
    const NAME: &'static str = "encrypted";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn set_schema_version(&mut self, version: u32) {
        self.schema_version = version;
    }
}

// ── Inner layer ──────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
#[prost(skip_debug)]
pub struct IdentityData {
    #[prost(string, tag = "1")]
    pub identity: String,
    /// Permanent client key (32 bytes).
    #[prost(bytes = "vec", tag = "2")]
    pub ck: Vec<u8>,
    /// Numeric server group, replaced by `server_group` in schema version 2.
    #[prost(uint32, tag = "3")]
    pub deprecated_server_group: u32,
    #[prost(string, tag = "4")]
    pub server_group: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceIds {
    /// Device ID towards the mediator server.
    #[prost(uint64, tag = "1")]
    pub d2m_device_id: u64,
    /// Device ID towards the chat server.
    #[prost(uint64, tag = "2")]
    pub csp_device_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
#[prost(skip_debug)]
pub struct WorkCredentials {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OnPremConfig {
    #[prost(string, tag = "1")]
    pub oppf_url: String,
    #[prost(uint64, tag = "2")]
    pub last_updated: u64,
    #[prost(string, tag = "3")]
    pub oppf_cached_config: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
#[prost(skip_debug)]
pub struct DecryptedKeyStorage {
    /// Schema version of this (inner) layer.
    #[prost(uint32, tag = "5")]
    pub schema_version: u32,
    #[prost(message, optional, tag = "1")]
    pub identity_data: Option<IdentityData>,
    /// Device group key (32 bytes).
    #[prost(bytes = "vec", tag = "2")]
    pub dgk: Vec<u8>,
    /// Local database encryption key (32 bytes).
    #[prost(bytes = "vec", tag = "3")]
    pub database_key: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub device_ids: Option<DeviceIds>,
    #[prost(message, optional, tag = "6")]
    pub work_credentials: Option<WorkCredentials>,
    #[prost(message, optional, tag = "7")]
    pub on_prem_config: Option<OnPremConfig>,
    /// Device cookie (16 bytes).
    #[prost(bytes = "vec", optional, tag = "8")]
    pub device_cookie: Option<Vec<u8>>,
}

impl VersionedSchema for DecryptedKeyStorage {
    const NAME: &'static str = "decrypted";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }

    fn set_schema_version(&mut self, version: u32) {
        self.schema_version = version;
    }
}

impl Drop for IdentityData {
    fn drop(&mut self) {
        self.ck.zeroize();
    }
}

impl Drop for WorkCredentials {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl Drop for DecryptedKeyStorage {
    fn drop(&mut self) {
        self.dgk.zeroize();
        self.database_key.zeroize();
        self.device_cookie.zeroize();
    }
}

impl fmt::Debug for IdentityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityData")
            .field("identity", &self.identity)
            .field("ck", &"<redacted>")
            .field("deprecated_server_group", &self.deprecated_server_group)
            .field("server_group", &self.server_group)
            .finish()
    }
}

impl fmt::Debug for WorkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for DecryptedKeyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedKeyStorage")
            .field("schema_version", &self.schema_version)
            .field("identity_data", &self.identity_data)
            .field("dgk", &"<redacted>")
            .field("database_key", &"<redacted>")
            .field("device_ids", &self.device_ids)
            .field("work_credentials", &self.work_credentials)
            .field("on_prem_config", &self.on_prem_config)
            .field("device_cookie", &self.device_cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
