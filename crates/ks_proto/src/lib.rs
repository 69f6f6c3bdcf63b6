//! ks_proto: on-disk schemas of the key storage file
//!
//! The key storage file is exactly one protobuf-encoded [`EncryptedKeyStorage`].
//! Its `encrypted_key_storage` field holds the AEAD-encrypted encoding of a
//! [`DecryptedKeyStorage`]. Both messages carry an independent
//! `schema_version` so that each layer can be migrated on its own.
//!
//! The message types are written with `prost` derives. Field numbers must
//! never change, files already on disk depend on them.

pub mod codec;
pub mod schema;

pub use codec::CodecError;
pub use schema::{
    argon2id_parameters::Argon2Version, encrypted_key_storage::KdfParameters, Argon2idParameters,
    DecryptedKeyStorage, DeviceIds, EncryptedKeyStorage, IdentityData, OnPremConfig,
    VersionedSchema, WorkCredentials,
};
