mod common;

use common::{fast_config, init_tracing, open, read_outer, sample_contents, seal, PASSWORD};
use ks_proto::{
    codec, Argon2idParameters, DecryptedKeyStorage, DeviceIds, EncryptedKeyStorage, IdentityData,
    KdfParameters,
};
use ks_store::migrations::{Migration, DECRYPTED_KEY_STORAGE_MIGRATIONS};
use ks_store::{
    FileSystemKeyStorage, KeyStorage, KeyStorageErrorKind, MigrationError, MigrationHelper,
    OnPremConfig, WorkCredentials,
};
use tempfile::TempDir;

fn setup() -> (TempDir, FileSystemKeyStorage) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let storage =
        FileSystemKeyStorage::new(dir.path().join("key-storage.pb"), fast_config()).unwrap();
    (dir, storage)
}

fn legacy_inner(version: u32, deprecated_server_group: u32) -> DecryptedKeyStorage {
    DecryptedKeyStorage {
        schema_version: version,
        identity_data: Some(IdentityData {
            identity: "ECHOECHO".into(),
            ck: vec![0x11; 32],
            deprecated_server_group,
            server_group: String::new(),
        }),
        dgk: vec![0x22; 32],
        database_key: vec![0x33; 32],
        device_ids: Some(DeviceIds {
            d2m_device_id: 1,
            csp_device_id: 2,
        }),
        work_credentials: None,
        on_prem_config: None,
        device_cookie: None,
    }
}

#[tokio::test]
async fn write_then_read_returns_the_same_contents() {
    let (_dir, storage) = setup();
    assert!(!storage.is_present().await);

    let mut contents = sample_contents();
    contents.work_credentials = Some(WorkCredentials {
        username: "alice".into(),
        password: "work-secret".into(),
    });
    contents.on_prem_config = Some(OnPremConfig {
        oppf_url: "https://example.com/prov/config.oppf".into(),
        last_updated: 1_700_000_000_000,
        oppf_cached_config: "{}".into(),
    });
    storage.write(PASSWORD, &contents).await.unwrap();

    assert!(storage.is_present().await);
    assert_eq!(storage.read(PASSWORD).await.unwrap(), contents);

    let (outer, inner) = open(storage.path(), PASSWORD);
    assert_eq!(outer.schema_version, 1);
    assert_eq!(inner.schema_version, 2);
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let (_dir, storage) = setup();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::NotFound);
    assert!(err.kind().is_user_recoverable());
}

#[test]
fn missing_directory_is_not_found() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = FileSystemKeyStorage::new(dir.path().join("nope").join("key-storage.pb"), fast_config())
        .err()
        .unwrap();
    assert_eq!(err.kind(), KeyStorageErrorKind::NotFound);
}

#[tokio::test]
async fn wrong_password_is_undecryptable() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();
    let err = storage.read("not the password").await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Undecryptable);
}

#[tokio::test]
async fn tampered_ciphertext_is_undecryptable() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();

    let written = read_outer(storage.path());
    let last = written.encrypted_key_storage.len() - 1;
    // first nonce byte, first ciphertext byte, last tag byte
    for index in [0, 24, last] {
        let mut outer = written.clone();
        outer.encrypted_key_storage[index] ^= 0x01;
        std::fs::write(storage.path(), codec::encode(&outer)).unwrap();

        let err = storage.read(PASSWORD).await.unwrap_err();
        assert_eq!(err.kind(), KeyStorageErrorKind::Undecryptable, "byte {index}");
    }
}

#[tokio::test]
async fn unrunnable_kdf_parameters_are_invalid() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();
    let written = read_outer(storage.path());

    let tweaks: [fn(&mut Argon2idParameters); 3] = [
        |params| params.parallelism = 0x0100_0000,
        |params| params.memory_bytes = 1 << 50,
        |params| params.parallelism = 100_000,
    ];
    for tweak in tweaks {
        let mut outer = written.clone();
        if let Some(KdfParameters::Argon2id(params)) = outer.kdf_parameters.as_mut() {
            tweak(params);
        }
        std::fs::write(storage.path(), codec::encode(&outer)).unwrap();

        let err = storage.read(PASSWORD).await.unwrap_err();
        assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
    }
}

#[tokio::test]
async fn empty_or_garbage_file_is_malformed() {
    let (_dir, storage) = setup();

    std::fs::write(storage.path(), b"").unwrap();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Malformed);

    std::fs::write(storage.path(), [0xff, 0xff, 0xff]).unwrap();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Malformed);
}

#[tokio::test]
async fn undecodable_inner_layer_is_malformed() {
    let (_dir, storage) = setup();
    std::fs::write(storage.path(), seal(&[1, 2, 3, 4], PASSWORD, 1)).unwrap();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Malformed);
}

#[tokio::test]
async fn directory_in_place_of_the_file() {
    let (_dir, storage) = setup();
    std::fs::create_dir(storage.path()).unwrap();

    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::NotReadable);

    let err = storage.write(PASSWORD, &sample_contents()).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::NotWritable);
}

#[tokio::test]
async fn invalid_inner_contents_are_rejected() {
    let (_dir, storage) = setup();
    let mut inner = legacy_inner(2, 0);
    if let Some(identity_data) = inner.identity_data.as_mut() {
        identity_data.server_group = "0a".into();
    }
    inner.dgk.truncate(16);
    std::fs::write(storage.path(), seal(&codec::encode_secret(&inner), PASSWORD, 1)).unwrap();

    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
}

#[tokio::test]
async fn kdf_parameters_below_the_floor_are_rejected() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();

    let mut strict = fast_config();
    strict.kdf.accept.iterations = 1_000;
    let strict = FileSystemKeyStorage::new(storage.path(), strict).unwrap();
    let err = strict.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
}

#[tokio::test]
async fn change_password_replaces_the_password() {
    let (_dir, storage) = setup();
    storage.write("old", &sample_contents()).await.unwrap();

    storage.change_password("old", "new").await.unwrap();

    let err = storage.read("old").await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Undecryptable);
    assert_eq!(storage.read("new").await.unwrap(), sample_contents());
}

#[tokio::test]
async fn change_password_with_wrong_password_leaves_file_untouched() {
    let (_dir, storage) = setup();
    storage.write("old", &sample_contents()).await.unwrap();
    let before = std::fs::read(storage.path()).unwrap();

    let err = storage.change_password("wrong", "new").await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Undecryptable);
    assert_eq!(std::fs::read(storage.path()).unwrap(), before);
}

#[tokio::test]
async fn change_work_credentials_only_touches_credentials() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();

    let credentials = WorkCredentials {
        username: "bob".into(),
        password: "pa55".into(),
    };
    storage
        .change_work_credentials(PASSWORD, credentials.clone())
        .await
        .unwrap();

    let mut expected = sample_contents();
    expected.work_credentials = Some(credentials);
    assert_eq!(storage.read(PASSWORD).await.unwrap(), expected);
}

#[tokio::test]
async fn change_cached_on_prem_config_only_touches_config() {
    let (_dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();

    let config = OnPremConfig {
        oppf_url: "https://onprem.example.com/prov/config.oppf".into(),
        last_updated: 42,
        oppf_cached_config: "{\"version\":\"1.0\"}".into(),
    };
    storage
        .change_cached_on_prem_config(PASSWORD, config.clone())
        .await
        .unwrap();

    let mut expected = sample_contents();
    expected.on_prem_config = Some(config);
    assert_eq!(storage.read(PASSWORD).await.unwrap(), expected);
}

#[tokio::test]
async fn stale_contents_are_not_written() {
    let (_dir, storage) = setup();
    let mut contents = sample_contents();
    contents.schema_version = 1;
    let err = storage.write(PASSWORD, &contents).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::InternalError);
    assert!(!storage.is_present().await);
}

#[tokio::test]
async fn numeric_server_group_is_migrated_and_rewritten() {
    let (_dir, storage) = setup();
    let inner = codec::encode_secret(&legacy_inner(1, 0x0A));
    let original = seal(&inner, PASSWORD, 1);
    std::fs::write(storage.path(), &original).unwrap();

    let contents = storage.read(PASSWORD).await.unwrap();
    assert_eq!(contents.schema_version, 2);
    assert_eq!(contents.identity_data.server_group.as_str(), "0a");

    assert_ne!(std::fs::read(storage.path()).unwrap(), original);
    let (outer, inner) = open(storage.path(), PASSWORD);
    assert_eq!(outer.schema_version, 1);
    assert_eq!(inner.schema_version, 2);
    let identity_data = inner.identity_data.as_ref().unwrap();
    assert_eq!(identity_data.server_group, "0a");
    assert_eq!(identity_data.deprecated_server_group, 0);

    // A second read finds nothing to migrate.
    let rewritten = std::fs::read(storage.path()).unwrap();
    assert_eq!(storage.read(PASSWORD).await.unwrap(), contents);
    assert_eq!(std::fs::read(storage.path()).unwrap(), rewritten);
}

#[tokio::test]
async fn unversioned_inner_layer_is_migrated() {
    let (_dir, storage) = setup();
    let inner = codec::encode_secret(&legacy_inner(0, 0xff));
    std::fs::write(storage.path(), seal(&inner, PASSWORD, 1)).unwrap();

    let contents = storage.read(PASSWORD).await.unwrap();
    assert_eq!(contents.identity_data.server_group.as_str(), "ff");
}

#[tokio::test]
async fn failing_inner_migration_is_invalid() {
    let (_dir, storage) = setup();
    let inner = codec::encode_secret(&legacy_inner(1, 0x100));
    std::fs::write(storage.path(), seal(&inner, PASSWORD, 1)).unwrap();

    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
}

#[tokio::test]
async fn unversioned_outer_layer_is_rewritten() {
    let (_dir, storage) = setup();
    let inner = codec::encode_secret(&sample_contents().to_schema());
    std::fs::write(storage.path(), seal(&inner, PASSWORD, 0)).unwrap();
    let before = read_outer(storage.path());

    assert_eq!(storage.read(PASSWORD).await.unwrap(), sample_contents());

    let after = read_outer(storage.path());
    assert_eq!(after.schema_version, 1);
    assert_eq!(after.encrypted_key_storage, before.encrypted_key_storage);
    assert_eq!(after.kdf_parameters, before.kdf_parameters);
}

#[tokio::test]
async fn newer_versions_are_invalid() {
    let (_dir, storage) = setup();
    let inner = codec::encode_secret(&sample_contents().to_schema());
    std::fs::write(storage.path(), seal(&inner, PASSWORD, 2)).unwrap();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);

    let mut newer = sample_contents().to_schema();
    newer.schema_version = 3;
    std::fs::write(
        storage.path(),
        seal(&codec::encode_secret(&newer), PASSWORD, 1),
    )
    .unwrap();
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
}

fn keep(_schema: &mut EncryptedKeyStorage) -> Result<(), MigrationError> {
    Ok(())
}

fn drop_kdf_parameters(schema: &mut EncryptedKeyStorage) -> Result<(), MigrationError> {
    schema.kdf_parameters = None;
    Ok(())
}

const TWO_OUTER_MIGRATIONS: &[Migration<EncryptedKeyStorage>] = &[keep, keep];
const BROKEN_OUTER_MIGRATIONS: &[Migration<EncryptedKeyStorage>] = &[keep, drop_kdf_parameters];

#[tokio::test]
async fn injected_migrations_upgrade_the_file() {
    let (dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();

    let upgraded = FileSystemKeyStorage::with_migrations(
        dir.path().join("key-storage.pb"),
        fast_config(),
        MigrationHelper::new(TWO_OUTER_MIGRATIONS, DECRYPTED_KEY_STORAGE_MIGRATIONS),
    )
    .unwrap();
    assert_eq!(upgraded.read(PASSWORD).await.unwrap(), sample_contents());
    assert_eq!(read_outer(storage.path()).schema_version, 2);

    // The older engine cannot go back.
    let err = storage.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::Invalid);
}

#[tokio::test]
async fn broken_outer_migration_is_an_internal_error() {
    let (dir, storage) = setup();
    storage.write(PASSWORD, &sample_contents()).await.unwrap();
    let before = std::fs::read(storage.path()).unwrap();

    let broken = FileSystemKeyStorage::with_migrations(
        dir.path().join("key-storage.pb"),
        fast_config(),
        MigrationHelper::new(BROKEN_OUTER_MIGRATIONS, DECRYPTED_KEY_STORAGE_MIGRATIONS),
    )
    .unwrap();
    let err = broken.read(PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), KeyStorageErrorKind::InternalError);
    assert_eq!(std::fs::read(storage.path()).unwrap(), before);
}
