// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::thread_pool;
use crate::error::{Error, Failure, IoResultExt as _, Result};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Files reassembled.
    pub files: usize,
    /// Fragments consumed.
    pub fragments: usize,
    pub bytes: u64,
}

#[derive(Debug)]
struct Piece {
    path: PathBuf,
    offset: u64,
    file_size: u64,
}

/// Parses `<name>.gsfrag-<offset>-<file_size>`.
fn parse_fragment(file_name: &str) -> Option<(&str, u64, u64)> {
    let (_, name, offset, file_size) =
        lazy_regex::regex_captures!(r"^(.+)\.gsfrag-(\d{20})-(\d{20})$", file_name)?;
    Some((name, offset.parse().ok()?, file_size.parse().ok()?))
}

/// Fragments under `root`, grouped by the file they belong to.
fn find_fragments(root: &Path) -> Result<BTreeMap<PathBuf, Vec<Piece>>> {
    let mut groups: BTreeMap<PathBuf, Vec<Piece>> = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some((name, offset, file_size)) = entry.file_name().to_str().and_then(parse_fragment)
        else {
            continue;
        };
        let target = entry.path().with_file_name(name);
        groups.entry(target).or_default().push(Piece {
            path: entry.path().to_path_buf(),
            offset,
            file_size,
        });
    }
    Ok(groups)
}

/// Joins the fragments written by [`restore`](super::restore) back into whole
/// files, `parallelism` files at a time.
///
/// Fragments of a file must agree on the file size and cover it exactly; a
/// gap or an overlap is an [`Error::Integrity`] and leaves the fragments in
/// place. A final file that already exists is never overwritten.
pub fn merge(output_dir: impl AsRef<Path>, parallelism: usize) -> Result<MergeSummary> {
    let output_dir = output_dir.as_ref();
    let pool = thread_pool(parallelism)?;
    let groups = find_fragments(output_dir)?;
    info!("merging {} fragmented file(s)", groups.len());

    let results: Vec<_> = pool.install(|| {
        groups
            .into_par_iter()
            .map(|(target, pieces)| {
                let count = pieces.len();
                let result = merge_file(&target, pieces);
                (target, count, result)
            })
            .collect()
    });
    let mut summary = MergeSummary::default();
    let mut failures = Vec::new();
    for (target, count, result) in results {
        match result {
            Ok(bytes) => {
                summary.files += 1;
                summary.fragments += count;
                summary.bytes += bytes;
            }
            Err(error) => {
                warn!("cannot merge {}: {error}", target.display());
                failures.push(Failure {
                    path: target,
                    error,
                });
            }
        }
    }
    if !failures.is_empty() {
        return Err(Error::Batch(failures));
    }
    Ok(summary)
}

fn merge_file(target: &Path, mut pieces: Vec<Piece>) -> Result<u64> {
    let file_size = pieces.first().map_or(0, |p| p.file_size);
    if let Some(odd) = pieces.iter().find(|p| p.file_size != file_size) {
        return Err(Error::Integrity(format!(
            "{} records file size {}, other fragments {file_size}",
            odd.path.display(),
            odd.file_size
        )));
    }
    pieces.sort_by_key(|p| p.offset);

    let mut expected = 0u64;
    for piece in &pieces {
        if piece.offset != expected {
            let kind = if piece.offset > expected { "gap" } else { "overlap" };
            return Err(Error::Integrity(format!(
                "{kind} at offset {expected}: next fragment starts at {}",
                piece.offset
            )));
        }
        expected += fs::metadata(&piece.path).with_path(&piece.path)?.len();
    }
    if expected != file_size {
        return Err(Error::Integrity(format!(
            "fragments cover {expected} of {file_size} bytes"
        )));
    }

    let dir = target.parent().unwrap_or(Path::new("."));
    let tmp = NamedTempFile::new_in(dir).with_path(dir)?;
    let mut writer = BufWriter::new(tmp);
    for piece in &pieces {
        let mut fragment = File::open(&piece.path).with_path(&piece.path)?;
        io::copy(&mut fragment, &mut writer).with_path(target)?;
    }
    let tmp = writer
        .into_inner()
        .map_err(|e| Error::io(target, e.into_error()))?;
    tmp.as_file().sync_all().with_path(target)?;
    tmp.persist_noclobber(target)
        .map_err(|e| Error::io(target, e.error))?;
    for piece in &pieces {
        fs::remove_file(&piece.path).with_path(&piece.path)?;
    }
    Ok(file_size)
}
