// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools as _;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the chunk, restore and commitment engines.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing parameter, raised before any file is touched.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Chunking parameters that cannot produce a DAG.
    #[error("degenerate chunking parameters: {0}")]
    Size(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Malformed archive.
    #[error("malformed archive: {0}")]
    Format(String),
    /// Hash mismatch, unresolved link, cycle or reconstruction gap.
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("cannot compute a piece commitment over empty input")]
    EmptyInput,
    #[error("slice callback failed: {0:#}")]
    Callback(anyhow::Error),
    /// Independent units of a batch that failed; the rest of the batch completed.
    #[error("{} unit(s) failed: {}", .0.len(), .0.iter().join("; "))]
    Batch(Vec<Failure>),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if this error, or any failure aggregated in it, is an
    /// integrity violation.
    pub fn is_integrity(&self) -> bool {
        match self {
            Error::Integrity(_) => true,
            Error::Batch(failures) => failures.iter().any(|f| f.error.is_integrity()),
            _ => false,
        }
    }
}

/// A single failed unit (file, archive or fragment group) of a batch.
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Attaches the offending path to [`io::Error`]s.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| Error::io(path.as_ref(), source))
    }
}

impl From<fvm_ipld_encoding::Error> for Error {
    fn from(e: fvm_ipld_encoding::Error) -> Self {
        Error::Format(e.to_string())
    }
}
