// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The `manifest.csv` record of sealed slices.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt as _, Result};

pub const MANIFEST_FILE: &str = "manifest.csv";

/// One row per sealed slice. `detail` is a JSON list of the source files the
/// slice carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub payload_cid: String,
    pub filename: String,
    pub piece_cid: Option<String>,
    pub payload_size: u64,
    pub piece_size: Option<u64>,
    pub detail: String,
}

/// Append-only CSV manifest. Rows are appended under a lock and the header is
/// written only when the file is empty.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Manifest {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            path: output_dir.as_ref().join(MANIFEST_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &ManifestRow) -> Result<()> {
        let _guard = self.lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_path(&self.path)?;
        let empty = file.metadata().with_path(&self.path)?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(empty)
            .from_writer(file);
        writer
            .serialize(row)
            .map_err(|e| Error::io(&self.path, e.into()))?;
        writer.flush().with_path(&self.path)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Vec<ManifestRow>> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path).map_err(|e| Error::io(path, e.into()))?;
        reader
            .deserialize()
            .map(|row| row.map_err(|e| Error::io(path, e.into())))
            .collect()
    }
}

/// JSON list of `paths`, the `detail` column.
pub fn detail_json(paths: &[PathBuf]) -> String {
    let paths: Vec<_> = paths.iter().map(|p| p.to_string_lossy()).collect();
    serde_json::to_string(&paths).unwrap_or_else(|_| "[]".into())
}
