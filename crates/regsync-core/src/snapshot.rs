use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A point-in-time JSON mapping of `chat_id` text to a value, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Map<String, Value>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads a snapshot, treating a missing, unreadable or malformed file as
    /// empty. Never fails.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::read(path) {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "snapshot missing; treating as empty");
                Self::empty()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "snapshot unusable; treating as empty");
                Self::empty()
            }
        }
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses a JSON document. Any top-level value other than an object (the
    /// bot seeds fresh files with `[]`) yields an empty snapshot.
    pub fn parse(content: &str) -> Result<Self, SnapshotError> {
        match serde_json::from_str::<Value>(content)? {
            Value::Object(entries) => Ok(Self { entries }),
            _ => Ok(Self::empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl From<Map<String, Value>> for Snapshot {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}
