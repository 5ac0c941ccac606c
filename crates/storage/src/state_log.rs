// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only state log, one file per node.
//!
//! Every state transition (PREPARED, COMMITTED, ABORTED) is appended as
//! one compact JSON line and flushed before the caller takes any visible
//! effect. The last record is authoritative at recovery; a PREPARED tail
//! is historical and the most recent COMMITTED record is served instead.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use canary_core::{RoutingState, RoutingStatus};
use thiserror::Error;
use tracing::debug;

/// Errors from the durable state log.
#[derive(Debug, Error)]
pub enum StateLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt log line {line} in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// What a full log scan recovered.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// The last record in the log, regardless of status.
    pub last: Option<RoutingState>,
    /// The most recent COMMITTED record, the state a node serves after a
    /// restart that left a PREPARED record dangling.
    pub last_committed: Option<RoutingState>,
}

/// Append-only NDJSON log of routing state transitions for one node.
pub struct StateLog {
    path: PathBuf,
    file: File,
}

impl StateLog {
    /// Open (creating if needed) `<dir>/<node_id>.log` for appending.
    pub fn open(dir: &Path, node_id: &str) -> Result<Self, StateLogError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", node_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened state log");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to disk.
    ///
    /// On failure the record is not durable; the caller must not send any
    /// message whose visibility depends on it.
    pub fn append(&mut self, state: &RoutingState) -> Result<(), StateLogError> {
        let mut line = serde_json::to_string(state)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// The last non-empty record, or `None` for a missing or empty log.
    pub fn last_state(&self) -> Result<Option<RoutingState>, StateLogError> {
        Ok(self.scan()?.last)
    }

    /// Single forward scan returning both the last record and the most
    /// recent COMMITTED record.
    pub fn recover(&self) -> Result<Recovery, StateLogError> {
        self.scan()
    }

    fn scan(&self) -> Result<Recovery, StateLogError> {
        if !self.path.exists() {
            return Ok(Recovery::default());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut recovery = Recovery::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let state: RoutingState =
                serde_json::from_str(trimmed).map_err(|source| StateLogError::Corrupt {
                    path: self.path.clone(),
                    line: idx + 1,
                    source,
                })?;
            if state.status == RoutingStatus::Committed {
                recovery.last_committed = Some(state.clone());
            }
            recovery.last = Some(state);
        }
        Ok(recovery)
    }
}

#[cfg(test)]
#[path = "state_log_tests.rs"]
mod tests;
