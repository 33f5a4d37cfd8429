// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Post-processing of sealed slices.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use cid::Cid;
use tracing::info;

use crate::commp::compute_file_commitment;
use crate::manifest::{Manifest, ManifestRow, detail_json};

/// What the chunk engine reports for every slice, whether or not it could be
/// written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSlice {
    /// 1-based position of the slice.
    pub index: usize,
    pub total: usize,
    /// File name of the archive.
    pub name: String,
    pub archive_path: PathBuf,
    /// Root directory node; `None` when the slice failed before sealing.
    pub root_cid: Option<Cid>,
    /// Archive size in bytes.
    pub payload_size: u64,
    pub source_files: Vec<PathBuf>,
    pub error: Option<String>,
}

/// Invoked exactly once per slice, in slice order. An error stops the run.
pub trait SliceCallback: Sync {
    fn on_slice_sealed(&self, slice: &SealedSlice) -> anyhow::Result<()>;
}

impl<F> SliceCallback for F
where
    F: Fn(&SealedSlice) -> anyhow::Result<()> + Sync,
{
    fn on_slice_sealed(&self, slice: &SealedSlice) -> anyhow::Result<()> {
        self(slice)
    }
}

/// The built-in slice callbacks.
#[derive(Debug)]
pub enum Callback {
    /// Computes the piece commitment of every archive and records it in the
    /// manifest. With `rename` the archive is renamed to `{piece_cid}.car`;
    /// with `add_padding` it is zero padded to its unpadded piece size.
    ComputeCommitment {
        manifest: Manifest,
        rename: bool,
        add_padding: bool,
    },
    /// Records every archive in the manifest, without a commitment.
    RecordManifest { manifest: Manifest },
    /// Only surfaces slice errors.
    PropagateErrorOnly,
}

impl Callback {
    pub fn compute_commitment(
        output_dir: impl AsRef<Path>,
        rename: bool,
        add_padding: bool,
    ) -> Self {
        Callback::ComputeCommitment {
            manifest: Manifest::new(output_dir),
            rename,
            add_padding,
        }
    }

    pub fn record_manifest(output_dir: impl AsRef<Path>) -> Self {
        Callback::RecordManifest {
            manifest: Manifest::new(output_dir),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn payload_cid(slice: &SealedSlice) -> anyhow::Result<String> {
    slice
        .root_cid
        .map(|cid| cid.to_string())
        .with_context(|| format!("slice {} has no root", slice.name))
}

impl SliceCallback for Callback {
    fn on_slice_sealed(&self, slice: &SealedSlice) -> anyhow::Result<()> {
        if let Some(error) = &slice.error {
            anyhow::bail!("slice {} failed: {error}", slice.name);
        }
        match self {
            Callback::ComputeCommitment {
                manifest,
                rename,
                add_padding,
            } => {
                let commp = compute_file_commitment(&slice.archive_path, *add_padding)
                    .with_context(|| {
                        format!("computing commP of {}", slice.archive_path.display())
                    })?;
                let mut archive = slice.archive_path.clone();
                if *rename {
                    let renamed = archive.with_file_name(format!("{}.car", commp.piece_cid));
                    fs::rename(&archive, &renamed).with_context(|| {
                        format!("renaming {} to {}", archive.display(), renamed.display())
                    })?;
                    archive = renamed;
                }
                info!(
                    "piece {} of {}: piece size {}",
                    commp.piece_cid, slice.name, commp.piece_size
                );
                manifest.append(&ManifestRow {
                    payload_cid: payload_cid(slice)?,
                    filename: file_name(&archive),
                    piece_cid: Some(commp.piece_cid.to_string()),
                    payload_size: commp.payload_size,
                    piece_size: Some(commp.piece_size),
                    detail: detail_json(&slice.source_files),
                })?;
            }
            Callback::RecordManifest { manifest } => {
                manifest.append(&ManifestRow {
                    payload_cid: payload_cid(slice)?,
                    filename: file_name(&slice.archive_path),
                    piece_cid: None,
                    payload_size: slice.payload_size,
                    piece_size: None,
                    detail: detail_json(&slice.source_files),
                })?;
            }
            Callback::PropagateErrorOnly => {}
        }
        Ok(())
    }
}
