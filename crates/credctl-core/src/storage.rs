//! On-disk persistence of provider records.
//!
//! Each provider is stored as one JSON file, `<dir>/<name>.json`:
//!
//! ```json
//! {"name": "github", "type": "command", "data": {"command": "gh auth token"}}
//! ```
//!
//! The directory is created with mode 0700 and files are written with mode
//! 0600 through a temporary file and an atomic rename, so a crash never
//! leaves a half-written record behind. Token material is never persisted;
//! `data` only holds what a provider's `metadata()` returns.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::Metadata;

/// Provider type assumed for records written before the `type` field existed.
const LEGACY_PROVIDER_TYPE: &str = "command";

const MAX_NAME_LEN: usize = 128;

/// A persisted provider: the `(name, type, metadata)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProvider {
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default)]
    pub data: Metadata,
}

impl StoredProvider {
    pub fn new(name: impl Into<String>, provider_type: impl Into<String>, data: Metadata) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
            data,
        }
    }
}

/// Errors returned by [`ProviderStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid provider name '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidName(String),

    #[error("provider not found: {0}")]
    NotFound(String),

    #[error("provider '{0}' already exists (use --force to overwrite)")]
    AlreadyExists(String),

    #[error("provider store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed provider record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Directory of provider records.
#[derive(Debug, Clone)]
pub struct ProviderStore {
    dir: PathBuf,
}

impl ProviderStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check that a provider name is usable as a file name.
    pub fn validate_name(name: &str) -> Result<(), StorageError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if valid {
            Ok(())
        } else {
            Err(StorageError::InvalidName(name.to_string()))
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        Self::validate_name(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Whether a record with this name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Persist a record.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if a record with the same
    /// name exists and `overwrite` is false.
    pub fn save(&self, record: &StoredProvider, overwrite: bool) -> Result<(), StorageError> {
        let path = self.path_for(&record.name)?;
        if !overwrite && path.exists() {
            return Err(StorageError::AlreadyExists(record.name.clone()));
        }

        self.ensure_dir()?;

        let json = serde_json::to_vec_pretty(record)?;
        let tmp_path = self.dir.join(format!(".{}.json.tmp", record.name));

        let result = (|| -> io::Result<()> {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(name = %record.name, provider_type = %record.provider_type, "Saved provider record");
        Ok(())
    }

    /// Load a record by name.
    ///
    /// Records without a `type` field predate typed providers; their whole
    /// body is treated as `command` provider metadata.
    pub fn load(&self, name: &str) -> Result<StoredProvider, StorageError> {
        let path = self.path_for(name)?;
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let value: Value = serde_json::from_slice(&contents)?;
        let has_type = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty());

        if has_type {
            let mut record: StoredProvider = serde_json::from_value(value)?;
            // The file name is authoritative.
            record.name = name.to_string();
            return Ok(record);
        }

        match value {
            Value::Object(data) => {
                warn!(name = %name, "Reading legacy provider record as command provider");
                Ok(StoredProvider::new(name, LEGACY_PROVIDER_TYPE, data))
            }
            _ => Err(StorageError::Malformed(serde::de::Error::custom(
                "provider record is not a JSON object",
            ))),
        }
    }

    /// Names of all stored providers, sorted.
    ///
    /// A missing directory is an empty store.
    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if Self::validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a record.
    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(name = %name, "Deleted provider record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            debug!(path = %self.dir.display(), "Created providers directory");
        }
        fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn metadata(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path().join("providers"));

        let record = StoredProvider::new("github", "command", metadata(json!({"command": "gh auth token"})));
        store.save(&record, false).unwrap();

        assert!(store.exists("github"));
        assert_eq!(store.load("github").unwrap(), record);
    }

    #[test]
    fn save_refuses_overwrite_without_flag() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path());

        let first = StoredProvider::new("x", "command", metadata(json!({"command": "echo 1"})));
        let second = StoredProvider::new("x", "command", metadata(json!({"command": "echo 2"})));

        store.save(&first, false).unwrap();
        let err = store.save(&second, false).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(ref n) if n == "x"));

        store.save(&second, true).unwrap();
        assert_eq!(store.load("x").unwrap().data["command"], json!("echo 2"));
    }

    #[test]
    fn files_and_directory_are_private() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path().join("providers"));
        store
            .save(&StoredProvider::new("p", "command", Metadata::new()), false)
            .unwrap();

        let dir_mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        let file_mode = fs::metadata(store.dir().join("p.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn list_is_sorted_and_skips_foreign_files() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path());
        for name in ["zeta", "alpha", "mid"] {
            store
                .save(&StoredProvider::new(name, "command", Metadata::new()), false)
                .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn list_of_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path());
        store
            .save(&StoredProvider::new("gone", "command", Metadata::new()), false)
            .unwrap();

        store.delete("gone").unwrap();
        assert!(!store.exists("gone"));
        assert!(matches!(store.delete("gone"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path());
        assert!(matches!(store.load("absent"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn legacy_record_is_read_as_command() {
        let dir = tempdir().unwrap();
        let store = ProviderStore::new(dir.path());
        fs::write(
            dir.path().join("old.json"),
            r#"{"command": "pass show aws", "format": "env"}"#,
        )
        .unwrap();

        let record = store.load("old").unwrap();
        assert_eq!(record.provider_type, "command");
        assert_eq!(record.data["command"], json!("pass show aws"));
    }

    #[test]
    fn rejects_path_traversal_names() {
        for name in ["", "../etc/passwd", "a/b", ".hidden", "sp ace"] {
            assert!(
                matches!(ProviderStore::validate_name(name), Err(StorageError::InvalidName(_))),
                "name {:?} should be rejected",
                name
            );
        }
        assert!(ProviderStore::validate_name("my-provider_1.prod").is_ok());
    }
}
