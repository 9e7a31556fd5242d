//! Whole-document JSON persistence.
//!
//! Every shared document is replaced, never edited in place: the new content
//! goes to a temp file in the same directory, is fsynced, then renamed over
//! the canonical path. Readers in other processes therefore see either the old
//! or the new document, never a torn one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use super::RetryPolicy;
use crate::error::{ForemanError, Result};

/// A persisted document type.
pub trait Document: Serialize + DeserializeOwned + Default {
    /// Short name used in logs and errors.
    const KIND: &'static str;

    /// Drop individually bad entries after parsing, returning one message per
    /// dropped entry. Runs before [`validate`](Self::validate).
    fn repair(&mut self) -> Vec<String> {
        Vec::new()
    }

    /// Structural checks beyond what deserialization enforces.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// What to do when the document on disk fails to parse or validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Move the bad file aside, write a fresh default and carry on.
    Reinitialize,
    /// Use defaults for this read; never touch the file.
    DefaultInMemory,
    /// Surface `CorruptState` to the caller.
    Strict,
}

pub struct JsonDocument<T> {
    path: PathBuf,
    recovery: Recovery,
    retry: RetryPolicy,
    // serializes read-modify-write cycles within this process
    guard: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Document> JsonDocument<T> {
    pub fn new(path: impl Into<PathBuf>, recovery: Recovery, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            recovery,
            retry,
            guard: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<T> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.read_unlocked()
    }

    pub fn write(&self, doc: &T) -> Result<()> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.write_unlocked(doc)
    }

    /// Read, mutate and replace the document in one step.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.read_unlocked()?;
        let result = mutate(&mut doc);
        self.write_unlocked(&doc)?;
        Ok(result)
    }

    /// Like [`update`](Self::update), but the document is only written back
    /// when `mutate` reports a change.
    pub fn update_if_changed<R>(&self, mutate: impl FnOnce(&mut T) -> (R, bool)) -> Result<R> {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.read_unlocked()?;
        let (result, changed) = mutate(&mut doc);
        if changed {
            self.write_unlocked(&doc)?;
        }
        Ok(result)
    }

    fn read_unlocked(&self) -> Result<T> {
        let bytes = match self.retry.run(&self.path, || fs::read(&self.path)) {
            Ok(bytes) => bytes,
            Err(ForemanError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(T::default());
            }
            Err(err) => return Err(err),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        let parsed = serde_json::from_slice::<T>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|mut doc| {
                for dropped in doc.repair() {
                    warn!(kind = T::KIND, path = %self.path.display(), %dropped, "skipping invalid entry");
                }
                doc.validate().map(|()| doc)
            });

        match parsed {
            Ok(doc) => Ok(doc),
            Err(reason) => self.recover(reason),
        }
    }

    fn recover(&self, reason: String) -> Result<T> {
        match self.recovery {
            Recovery::Reinitialize => {
                let quarantine = quarantine_path(&self.path);
                warn!(
                    kind = T::KIND,
                    path = %self.path.display(),
                    quarantine = %quarantine.display(),
                    %reason,
                    "corrupt document, reinitializing"
                );
                if let Err(e) = fs::rename(&self.path, &quarantine) {
                    warn!(path = %self.path.display(), error = %e, "could not quarantine corrupt document");
                }
                let doc = T::default();
                self.write_unlocked(&doc)?;
                Ok(doc)
            }
            Recovery::DefaultInMemory => {
                warn!(kind = T::KIND, path = %self.path.display(), %reason, "invalid document, using defaults");
                Ok(T::default())
            }
            Recovery::Strict => {
                error!(kind = T::KIND, path = %self.path.display(), %reason, "corrupt document");
                Err(ForemanError::CorruptState {
                    kind: T::KIND,
                    path: self.path.clone(),
                    reason,
                })
            }
        }
    }

    fn write_unlocked(&self, doc: &T) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(doc)?;
        bytes.push(b'\n');
        self.retry
            .run(&self.path, || write_atomically(&self.path, &bytes))
    }
}

/// Write `bytes` to a uniquely named sibling temp file, fsync it, then rename
/// it over `path`.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp = dir.join(format!(
        ".{file_name}.{}.{:016x}.tmp",
        std::process::id(),
        rand::random::<u64>()
    ));

    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{stamp}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    impl Document for Counter {
        const KIND: &'static str = "counter";

        fn validate(&self) -> std::result::Result<(), String> {
            if self.value > 100 {
                return Err(format!("value {} out of range", self.value));
            }
            Ok(())
        }
    }

    fn doc(dir: &Path, recovery: Recovery) -> JsonDocument<Counter> {
        JsonDocument::new(dir.join("counter.json"), recovery, RetryPolicy::default())
    }

    #[test]
    fn missing_document_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Reinitialize);
        assert_eq!(d.read().unwrap(), Counter::default());
        assert!(!d.path().exists());
    }

    #[test]
    fn update_persists_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Reinitialize);

        let seen = d.update(|c| {
            c.value += 3;
            c.value
        });
        assert_eq!(seen.unwrap(), 3);
        d.update(|c| c.value += 1).unwrap();
        assert_eq!(d.read().unwrap().value, 4);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["counter.json".to_string()]);
    }

    #[test]
    fn unchanged_update_skips_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Reinitialize);

        let value = d.update_if_changed(|c| (c.value, false)).unwrap();
        assert_eq!(value, 0);
        assert!(!d.path().exists());

        d.update_if_changed(|c| {
            c.value = 9;
            ((), true)
        })
        .unwrap();
        assert_eq!(d.read().unwrap().value, 9);
    }

    #[test]
    fn corrupt_document_is_quarantined_and_reinitialized() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Reinitialize);
        fs::write(d.path(), "{ not json").unwrap();

        assert_eq!(d.read().unwrap(), Counter::default());
        let on_disk: Counter = serde_json::from_slice(&fs::read(d.path()).unwrap()).unwrap();
        assert_eq!(on_disk, Counter::default());

        let quarantined = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }

    #[test]
    fn failed_validation_counts_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Strict);
        fs::write(d.path(), r#"{"value": 500}"#).unwrap();

        let err = d.read().unwrap_err();
        assert!(matches!(err, ForemanError::CorruptState { kind: "counter", .. }));
        // strict mode leaves the evidence in place
        assert!(fs::read_to_string(d.path()).unwrap().contains("500"));
    }

    #[test]
    fn default_in_memory_never_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::DefaultInMemory);
        fs::write(d.path(), "garbage").unwrap();

        assert_eq!(d.read().unwrap(), Counter::default());
        assert_eq!(fs::read_to_string(d.path()).unwrap(), "garbage");
    }

    #[test]
    fn blank_document_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path(), Recovery::Strict);
        fs::write(d.path(), "  \n").unwrap();
        assert_eq!(d.read().unwrap(), Counter::default());
    }
}
