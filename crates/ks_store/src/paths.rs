use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "ch";
pub const APP_ORG: &str = "threema";
pub const APP_NAME: &str = "desktop";

pub const KEY_STORAGE_FILE_NAME: &str = "key-storage.pb";

/// Overrides the full path of the key storage file.
pub const ENV_KEY_STORAGE_PATH: &str = "KS_KEY_STORAGE_PATH";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn key_storage_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(ENV_KEY_STORAGE_PATH) {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join(KEY_STORAGE_FILE_NAME))
}
