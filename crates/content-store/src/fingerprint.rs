use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Hash-and-line summary of a file at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Path the fingerprint was captured from
    pub path: PathBuf,

    /// Hex-encoded sha256 of the file content
    pub sha256: String,

    /// Modification time at capture
    pub mtime: DateTime<Utc>,

    /// Size in bytes
    pub size: u64,

    /// Number of lines in the content
    pub line_count: usize,
}

/// Outcome of a drift check against a registered fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftStatus {
    /// Current content matches the registered fingerprint
    NoDrift,
    /// Content has changed since registration
    Drifted {
        old: Box<Fingerprint>,
        new: Box<Fingerprint>,
    },
    /// Path was never registered
    NotTracked,
}

/// Read a file and compute its fingerprint
pub fn capture(path: impl AsRef<Path>) -> Result<Fingerprint> {
    let path = path.as_ref();
    let content = std::fs::read(path)?;
    let metadata = std::fs::metadata(path)?;

    let sha256 = format!("{:x}", Sha256::digest(&content));
    let mtime = metadata.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
    let line_count = content.iter().filter(|&&b| b == b'\n').count()
        + usize::from(!content.is_empty() && !content.ends_with(b"\n"));

    Ok(Fingerprint {
        path: path.to_path_buf(),
        sha256,
        mtime,
        size: content.len() as u64,
        line_count,
    })
}

/// Registry of fingerprints for drift detection
///
/// Fingerprints are registered at first index and only replaced by an
/// explicit [`FingerprintStore::recapture`].
#[derive(Debug, Default)]
pub struct FingerprintStore {
    registered: Mutex<HashMap<PathBuf, Fingerprint>>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fingerprint; returns the previous entry for the path if any
    pub fn register(&self, fp: Fingerprint) -> Option<Fingerprint> {
        let mut map = self.registered.lock().expect("fingerprint store poisoned");
        map.insert(fp.path.clone(), fp)
    }

    /// Get the registered fingerprint for a path
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Fingerprint> {
        let map = self.registered.lock().expect("fingerprint store poisoned");
        map.get(path.as_ref()).cloned()
    }

    /// Check whether a path is tracked
    pub fn is_tracked(&self, path: impl AsRef<Path>) -> bool {
        let map = self.registered.lock().expect("fingerprint store poisoned");
        map.contains_key(path.as_ref())
    }

    /// Compare the current file content against the registered fingerprint
    pub fn check_drift(&self, path: impl AsRef<Path>) -> Result<DriftStatus> {
        let path = path.as_ref();
        let old = {
            let map = self.registered.lock().expect("fingerprint store poisoned");
            match map.get(path) {
                Some(fp) => fp.clone(),
                None => return Ok(DriftStatus::NotTracked),
            }
        };

        let new = capture(path)?;
        if new.sha256 == old.sha256 {
            Ok(DriftStatus::NoDrift)
        } else {
            log::debug!("Drift detected for {:?}", path);
            Ok(DriftStatus::Drifted {
                old: Box::new(old),
                new: Box::new(new),
            })
        }
    }

    /// Re-capture a path and replace its registered fingerprint
    pub fn recapture(&self, path: impl AsRef<Path>) -> Result<Fingerprint> {
        let fp = capture(path)?;
        self.register(fp.clone());
        Ok(fp)
    }

    /// Drop a path from the registry
    pub fn untrack(&self, path: impl AsRef<Path>) -> bool {
        let mut map = self.registered.lock().expect("fingerprint store poisoned");
        map.remove(path.as_ref()).is_some()
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.registered.lock().expect("fingerprint store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_with(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_capture_is_deterministic() {
        let file = temp_with("fn main() {}\n");
        let a = capture(file.path()).unwrap();
        let b = capture(file.path()).unwrap();
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.size, 13);
        assert_eq!(a.line_count, 1);
    }

    #[test]
    fn test_line_count_without_trailing_newline() {
        let file = temp_with("one\ntwo\nthree");
        let fp = capture(file.path()).unwrap();
        assert_eq!(fp.line_count, 3);
    }

    #[test]
    fn test_check_drift_not_tracked() {
        let store = FingerprintStore::new();
        let file = temp_with("data\n");
        assert_eq!(store.check_drift(file.path()).unwrap(), DriftStatus::NotTracked);
    }

    #[test]
    fn test_check_drift_no_drift() {
        let store = FingerprintStore::new();
        let file = temp_with("data\n");
        store.register(capture(file.path()).unwrap());
        assert_eq!(store.check_drift(file.path()).unwrap(), DriftStatus::NoDrift);
    }

    #[test]
    fn test_check_drift_after_change() {
        let store = FingerprintStore::new();
        let mut file = temp_with("before\n");
        let original = capture(file.path()).unwrap();
        store.register(original.clone());

        file.write_all(b"after\n").unwrap();
        file.flush().unwrap();

        match store.check_drift(file.path()).unwrap() {
            DriftStatus::Drifted { old, new } => {
                assert_eq!(old.sha256, original.sha256);
                assert_ne!(new.sha256, original.sha256);
            }
            other => panic!("expected drift, got {:?}", other),
        }
    }

    #[test]
    fn test_recapture_replaces_registration() {
        let store = FingerprintStore::new();
        let mut file = temp_with("v1\n");
        store.register(capture(file.path()).unwrap());

        file.write_all(b"v2\n").unwrap();
        file.flush().unwrap();

        store.recapture(file.path()).unwrap();
        assert_eq!(store.check_drift(file.path()).unwrap(), DriftStatus::NoDrift);
    }
}
