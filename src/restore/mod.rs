// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Rebuilding the original tree from slice archives.
//!
//! [`restore`] writes every file entry of every archive below the output
//! directory. Entries that hold a whole file are written to their recorded
//! path; fragments of split files are written next to it with a
//! `.gsfrag-<offset>-<file_size>` suffix and joined by [`merge`]. Final
//! files are written once: an existing file is never replaced.

mod merge;

pub use merge::{MergeSummary, merge};

use std::fs;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use cid::Cid;
use fvm_ipld_encoding::{DAG_CBOR, from_slice};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::car::CarArchive;
use crate::dag::{BlockSource, DirNode, FileEntry, Link, MAX_DEPTH, resolve_file};
use crate::error::{Error, Failure, IoResultExt as _, Result};

const FRAGMENT_MARKER: &str = ".gsfrag-";

/// Name under which a fragment of `name` is restored.
pub fn fragment_file_name(name: &str, offset: u64, file_size: u64) -> String {
    format!("{name}{FRAGMENT_MARKER}{offset:020}-{file_size:020}")
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub archives: usize,
    /// Whole files written.
    pub files: usize,
    /// Fragments written, to be merged.
    pub fragments: usize,
    pub bytes: u64,
}

impl RestoreSummary {
    fn absorb(&mut self, other: RestoreSummary) {
        self.archives += other.archives;
        self.files += other.files;
        self.fragments += other.fragments;
        self.bytes += other.bytes;
    }
}

pub(crate) fn thread_pool(parallelism: usize) -> Result<rayon::ThreadPool> {
    if parallelism == 0 {
        return Err(Error::Config("parallelism must be positive".into()));
    }
    rayon::ThreadPoolBuilder::new()
        .thread_name(|id| format!("graphsplit worker: {id}"))
        .num_threads(parallelism)
        .build()
        .map_err(|e| Error::Config(e.to_string()))
}

/// Archives at `source`: the file itself, or the `*.car` files of a
/// directory in name order.
fn list_archives(source: &Path) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        return Err(Error::Config(format!(
            "archive source {} does not exist",
            source.display()
        )));
    }
    let mut archives = Vec::new();
    for entry in fs::read_dir(source).with_path(source)? {
        let path = entry.with_path(source)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "car") {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Restores every archive at `source` into `output_dir`, `parallelism`
/// archives at a time.
///
/// Archives are independent: one that fails does not stop the others. Within
/// an archive, a file that cannot be written is skipped and the remaining
/// files are still restored, while an integrity violation abandons the
/// archive. All failures are reported together as [`Error::Batch`].
pub fn restore(
    source: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    parallelism: usize,
) -> Result<RestoreSummary> {
    let (source, output_dir) = (source.as_ref(), output_dir.as_ref());
    let pool = thread_pool(parallelism)?;
    let archives = list_archives(source)?;
    fs::create_dir_all(output_dir).with_path(output_dir)?;
    info!(
        "restoring {} archive(s) from {} into {}",
        archives.len(),
        source.display(),
        output_dir.display()
    );

    let results: Vec<_> = pool.install(|| {
        archives
            .par_iter()
            .map(|path| (path, restore_archive(path, output_dir)))
            .collect()
    });
    let mut summary = RestoreSummary::default();
    let mut failures = Vec::new();
    for (path, result) in results {
        match result {
            Ok((restored, skipped)) => {
                summary.absorb(restored);
                failures.extend(skipped);
            }
            Err(error) => failures.push(Failure {
                path: path.clone(),
                error,
            }),
        }
    }
    if !failures.is_empty() {
        return Err(Error::Batch(failures));
    }
    Ok(summary)
}

/// Restores one archive, returning the files that could not be written.
fn restore_archive(path: &Path, output_dir: &Path) -> Result<(RestoreSummary, Vec<Failure>)> {
    let archive = CarArchive::open(path)?;
    let mut summary = RestoreSummary {
        archives: 1,
        ..Default::default()
    };
    let mut failures = Vec::new();
    for root in archive.roots() {
        restore_tree(&archive, root, output_dir, &mut summary, &mut failures)?;
    }
    debug!(
        "restored {}: {} file(s), {} fragment(s)",
        path.display(),
        summary.files,
        summary.fragments
    );
    Ok((summary, failures))
}

/// Rejects names that would escape or alias their directory.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(Error::Integrity(format!("invalid entry name {name:?}")));
    }
    Ok(())
}

fn restore_tree(
    source: &impl BlockSource,
    root: &Cid,
    output_dir: &Path,
    summary: &mut RestoreSummary,
    failures: &mut Vec<Failure>,
) -> Result<()> {
    let mut stack = vec![(*root, output_dir.to_path_buf(), 0)];
    while let Some((cid, dir, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(Error::Integrity(format!(
                "directory nesting exceeds {MAX_DEPTH} at {cid}"
            )));
        }
        if cid.codec() != DAG_CBOR {
            return Err(Error::Format(format!(
                "directory node {cid} has codec {:#x}",
                cid.codec()
            )));
        }
        let data = source
            .block(&cid)
            .ok_or_else(|| Error::Integrity(format!("unresolved directory {cid}")))?;
        let node: DirNode = from_slice(data)?;
        for entry in &node.files {
            check_name(&entry.name)?;
            let target = entry_target(entry, &dir);
            match restore_entry(source, entry, &dir, &target) {
                Ok(()) => {}
                Err(error @ Error::Io { .. }) => {
                    warn!("skipping {}: {error}", target.display());
                    failures.push(Failure {
                        path: target,
                        error,
                    });
                    continue;
                }
                Err(error) => return Err(error),
            }
            if entry.is_whole() {
                summary.files += 1;
            } else {
                summary.fragments += 1;
            }
            summary.bytes += entry.size;
        }
        for link in node.dirs.into_iter().rev() {
            check_name(&link.name)?;
            stack.push((link.cid, dir.join(&link.name), depth + 1));
        }
    }
    Ok(())
}

fn entry_target(entry: &FileEntry, dir: &Path) -> PathBuf {
    if entry.is_whole() {
        dir.join(&entry.name)
    } else {
        dir.join(fragment_file_name(&entry.name, entry.offset, entry.file_size))
    }
}

fn restore_entry(
    source: &impl BlockSource,
    entry: &FileEntry,
    dir: &Path,
    target: &Path,
) -> Result<()> {
    if entry.offset.checked_add(entry.size).is_none_or(|end| end > entry.file_size) {
        return Err(Error::Integrity(format!(
            "{}: {} bytes at offset {} exceed the file size {}",
            entry.name, entry.size, entry.offset, entry.file_size
        )));
    }
    fs::create_dir_all(dir).with_path(dir)?;
    let tmp = NamedTempFile::new_in(dir).with_path(dir)?;
    let mut writer = BufWriter::new(tmp);
    let link = Link {
        cid: entry.cid,
        size: entry.size,
    };
    resolve_file(source, &link, |data| writer.write_all(data).with_path(target))?;
    let tmp = writer
        .into_inner()
        .map_err(|e| Error::io(target, e.into_error()))?;
    tmp.persist_noclobber(target)
        .map_err(|e| Error::io(target, e.error))?;
    Ok(())
}
