use std::path::Path;

use ks_crypto::kdf::{derive_key, MIB};
use ks_crypto::{aead, Argon2MinParams, Argon2Version, Argon2idParams, KdfTargetRuntime, RawKey};
use ks_proto::{codec, DecryptedKeyStorage, EncryptedKeyStorage, KdfParameters};
use ks_store::contents::{kdf_params_from_schema, kdf_params_to_schema};
use ks_store::{
    DeviceCookie, DeviceIds, IdentityData, IdentityString, KdfConfig, KeyStorageConfig,
    KeyStorageContents, ServerGroup,
};
use tracing_subscriber::EnvFilter;

pub const PASSWORD: &str = "correct horse battery staple";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 1 MiB / 1 iteration floor so that every KDF run takes milliseconds.
pub fn fast_config() -> KeyStorageConfig {
    let min = Argon2MinParams {
        salt_length_bytes: 16,
        memory_bytes: MIB,
        iterations: 1,
        parallelism: 1,
    };
    KeyStorageConfig {
        kdf: KdfConfig {
            accept: min,
            create: min,
            target_runtime: KdfTargetRuntime {
                min_ms: 0,
                target_ms: 1,
                max_ms: 10_000,
            },
        },
    }
}

pub fn sample_contents() -> KeyStorageContents {
    KeyStorageContents {
        schema_version: 2,
        identity_data: IdentityData {
            identity: IdentityString::new("ECHOECHO").unwrap(),
            ck: RawKey::new([0x11; 32]),
            server_group: ServerGroup::new("0a").unwrap(),
        },
        dgk: RawKey::new([0x22; 32]),
        database_key: RawKey::new([0x33; 32]),
        device_ids: DeviceIds {
            d2m_device_id: 0x0123_4567_89ab_cdef,
            csp_device_id: u64::MAX,
        },
        device_cookie: Some(DeviceCookie::new([0x44; 16])),
        work_credentials: None,
        on_prem_config: None,
    }
}

/// Parameters matching [`fast_config`] with a fixed salt.
pub fn fixed_params() -> Argon2idParams {
    Argon2idParams {
        version: Argon2Version::V0x13,
        salt: vec![7; 16],
        memory_bytes: MIB,
        iterations: 1,
        parallelism: 1,
    }
}

/// Encrypt arbitrary inner bytes into an encoded outer layer, bypassing the
/// engine.
pub fn seal(inner: &[u8], password: &str, outer_version: u32) -> Vec<u8> {
    let params = fixed_params();
    let key = derive_key(password.as_bytes(), &params, None).unwrap();
    let outer = EncryptedKeyStorage {
        schema_version: outer_version,
        encrypted_key_storage: aead::encrypt(key.as_bytes(), inner).unwrap(),
        kdf_parameters: Some(KdfParameters::Argon2id(kdf_params_to_schema(&params))),
    };
    codec::encode(&outer)
}

pub fn read_outer(path: &Path) -> EncryptedKeyStorage {
    codec::decode(&std::fs::read(path).unwrap()).unwrap()
}

/// Decrypt the inner layer of a file without migrating or validating it.
pub fn open(path: &Path, password: &str) -> (EncryptedKeyStorage, DecryptedKeyStorage) {
    let outer = read_outer(path);
    let Some(KdfParameters::Argon2id(params)) = &outer.kdf_parameters else {
        panic!("no KDF parameters in {}", path.display());
    };
    let params = kdf_params_from_schema(params).unwrap();
    let key = derive_key(password.as_bytes(), &params, None).unwrap();
    let plaintext = aead::decrypt(key.as_bytes(), &outer.encrypted_key_storage).unwrap();
    let inner = codec::decode(&plaintext).unwrap();
    (outer, inner)
}
