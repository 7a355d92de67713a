use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_USERS_PATH: &str = "users.json";
pub const DEFAULT_STATES_PATH: &str = "states.json";
pub const DEFAULT_DB_PATH: &str = "users.db";
pub const DEFAULT_LOCK_PATH: &str = "sync.lock";
pub const DEFAULT_LOCK_STALE_AFTER_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Everything one reconciliation pass needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub users_path: PathBuf,
    pub states_path: PathBuf,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    /// Age after which a lock marker is reclaimed. `None` disables the age check.
    pub lock_stale_after: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            users_path: PathBuf::from(DEFAULT_USERS_PATH),
            states_path: PathBuf::from(DEFAULT_STATES_PATH),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            lock_stale_after: stale_after_from_secs(DEFAULT_LOCK_STALE_AFTER_SECS),
        }
    }
}

impl SyncConfig {
    /// All four paths resolved against `root`.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            users_path: root.join(DEFAULT_USERS_PATH),
            states_path: root.join(DEFAULT_STATES_PATH),
            db_path: root.join(DEFAULT_DB_PATH),
            lock_path: root.join(DEFAULT_LOCK_PATH),
            ..Self::default()
        }
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(path) = file.users_path {
            self.users_path = path;
        }
        if let Some(path) = file.states_path {
            self.states_path = path;
        }
        if let Some(path) = file.db_path {
            self.db_path = path;
        }
        if let Some(path) = file.lock_path {
            self.lock_path = path;
        }
        if let Some(secs) = file.lock_stale_after_secs {
            self.lock_stale_after = stale_after_from_secs(secs);
        }
    }
}

/// On-disk TOML overrides; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub users_path: Option<PathBuf>,
    pub states_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub lock_path: Option<PathBuf>,
    pub lock_stale_after_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `0` means "never expire by age".
pub fn stale_after_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_bot_file_names() {
        let config = SyncConfig::default();
        assert_eq!(config.users_path, PathBuf::from("users.json"));
        assert_eq!(config.states_path, PathBuf::from("states.json"));
        assert_eq!(config.lock_stale_after, Some(Duration::from_secs(600)));
    }

    #[test]
    fn file_overrides_only_present_keys() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("regsync.toml");
        fs::write(
            &path,
            "db_path = \"/srv/bot/users.db\"\nlock_stale_after_secs = 0\n",
        )
        .expect("write");

        let mut config = SyncConfig::in_dir(dir.path());
        config.apply_file(FileConfig::load(&path).expect("load"));

        assert_eq!(config.db_path, PathBuf::from("/srv/bot/users.db"));
        assert_eq!(config.users_path, dir.path().join("users.json"));
        assert_eq!(config.lock_stale_after, None);
    }

    #[test]
    fn unknown_keys_and_missing_files_are_errors() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("regsync.toml");
        fs::write(&path, "database = \"x\"\n").expect("write");

        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            FileConfig::load(dir.path().join("absent.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
