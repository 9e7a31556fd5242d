//! Append-only JSON Lines logs (action history, escalation audit).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::RetryPolicy;
use crate::error::{ForemanError, Result};

pub struct JsonLines<T> {
    path: PathBuf,
    retry: RetryPolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonLines<T> {
    pub fn new(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            retry,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line with a single write.
    pub fn append(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.retry.run(&self.path, || {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            file.write_all(&line)
        })
    }

    /// All well-formed records in file order. Malformed lines, including
    /// torn writes that are not valid UTF-8, are skipped.
    pub fn read_all(&self) -> Result<Vec<T>> {
        let raw = match self.retry.run(&self.path, || fs::read(&self.path)) {
            Ok(raw) => raw,
            Err(ForemanError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut records = Vec::new();
        for (index, line) in raw.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), line = index + 1, error = %e, "skipping malformed log line");
                }
            }
        }
        Ok(records)
    }
}
