// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;
use walkdir::WalkDir;

use super::extra::ExtraFileSource;
use crate::dag::{DagParams, estimate_archive_bytes};
use crate::error::{Error, Result};

/// Upper bound on the CAR header plus the root directory node framing.
pub const SLICE_OVERHEAD: u64 = 192;
/// Upper bound on the directory bytes per path component, excluding the name.
const ENTRY_OVERHEAD: u64 = 128;

/// A regular file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path recorded in the archive, relative to the parent path.
    pub record: PathBuf,
    pub size: u64,
}

/// `size` bytes at `offset` of a source file, built as one DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub source: PathBuf,
    pub record: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub file_size: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    pub fragments: Vec<Fragment>,
    /// Estimated archive bytes of the fragments.
    pub estimate: u64,
}

impl SlicePlan {
    fn push(&mut self, fragment: Fragment, cost: u64) {
        self.estimate += cost;
        self.fragments.push(fragment);
    }

    /// Distinct source files, in fragment order.
    pub fn source_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::new();
        for fragment in &self.fragments {
            if files.last() != Some(&fragment.source) {
                files.push(fragment.source.clone());
            }
        }
        files
    }
}

/// Regular files under `root` in lexicographic order. Paths are recorded
/// relative to `parent`; with `rename` the recorded file name is replaced by
/// a random UUID that keeps the extension.
pub fn walk(root: &Path, parent: &Path, rename: bool) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(path, e.into())
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            warn!("skipping {}: not a regular file", entry.path().display());
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| Error::io(entry.path(), e.into()))?
            .len();
        let mut record = entry
            .path()
            .strip_prefix(parent)
            .map_err(|_| {
                Error::Config(format!(
                    "{} is not under the parent path {}",
                    entry.path().display(),
                    parent.display()
                ))
            })?
            .to_path_buf();
        if rename {
            record = random_name(&record);
        }
        files.push(SourceFile {
            path: entry.into_path(),
            record,
            size,
        });
    }
    Ok(files)
}

fn random_name(record: &Path) -> PathBuf {
    let name = match record.extension() {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext.to_string_lossy()),
        None => Uuid::new_v4().to_string(),
    };
    record.with_file_name(name)
}

fn entry_cost(record: &Path) -> u64 {
    record
        .components()
        .map(|c| c.as_os_str().len() as u64 + ENTRY_OVERHEAD)
        .sum()
}

/// Upper bound on the archive bytes of a fragment, its directory entries
/// included.
pub fn fragment_cost(record: &Path, size: u64, params: &DagParams) -> u64 {
    estimate_archive_bytes(size, params) + entry_cost(record)
}

/// Largest prefix of `remaining` bytes ending on a leaf boundary whose cost
/// stays within `budget`. Zero when not even one leaf fits.
pub fn fit(record: &Path, remaining: u64, budget: u64, params: &DagParams) -> u64 {
    let size = |leaves: u64| (leaves * params.chunk_size).min(remaining);
    let (mut lo, mut hi) = (0, remaining.div_ceil(params.chunk_size));
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if fragment_cost(record, size(mid), params) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    size(lo)
}

/// Greedy assignment of files to slices.
pub struct Planner<'a> {
    params: &'a DagParams,
    slice_size: u64,
    extra: Option<&'a mut ExtraFileSource>,
    slices: Vec<SlicePlan>,
    current: SlicePlan,
}

impl<'a> Planner<'a> {
    pub fn new(
        params: &'a DagParams,
        slice_size: u64,
        extra: Option<&'a mut ExtraFileSource>,
    ) -> Self {
        Self {
            params,
            slice_size,
            extra,
            slices: Vec::new(),
            current: SlicePlan::default(),
        }
    }

    fn budget(&self) -> u64 {
        self.slice_size
            .saturating_sub(SLICE_OVERHEAD + self.current.estimate)
    }

    /// Places `file`, splitting it at leaf boundaries across as many slices
    /// as needed.
    pub fn add_file(&mut self, file: &SourceFile) {
        let mut offset = 0;
        loop {
            let remaining = file.size - offset;
            let budget = self.budget();
            let size = if fragment_cost(&file.record, remaining, self.params) <= budget {
                remaining
            } else {
                match fit(&file.record, remaining, budget, self.params) {
                    0 if self.current.fragments.is_empty() => {
                        // oversized but valid: one leaf per slice
                        remaining.min(self.params.chunk_size)
                    }
                    0 => {
                        self.seal();
                        continue;
                    }
                    size => size,
                }
            };
            let cost = fragment_cost(&file.record, size, self.params);
            self.current.push(
                Fragment {
                    source: file.path.clone(),
                    record: file.record.clone(),
                    offset,
                    size,
                    file_size: file.size,
                },
                cost,
            );
            offset += size;
            if offset >= file.size {
                return;
            }
            self.seal();
        }
    }

    fn seal(&mut self) {
        let mut slice = std::mem::take(&mut self.current);
        if let Some(extra) = self.extra.as_deref_mut() {
            for (fragment, cost) in extra.next_batch(self.params) {
                slice.push(fragment, cost);
            }
        }
        self.slices.push(slice);
    }

    pub fn finish(mut self) -> Vec<SlicePlan> {
        if !self.current.fragments.is_empty() {
            self.seal();
        }
        self.slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::multihash::MultihashCode;
    use quickcheck_macros::quickcheck;

    fn params(chunk_size: u64) -> DagParams {
        DagParams {
            chunk_size,
            max_links: 4,
            hasher: MultihashCode::Sha2_256,
        }
    }

    fn file(name: &str, size: u64) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/data").join(name),
            record: PathBuf::from("data").join(name),
            size,
        }
    }

    fn plan(files: &[SourceFile], slice_size: u64, params: &DagParams) -> Vec<SlicePlan> {
        let mut planner = Planner::new(params, slice_size, None);
        for f in files {
            planner.add_file(f);
        }
        planner.finish()
    }

    #[test]
    fn small_files_share_a_slice() {
        let p = params(256);
        let slices = plan(&[file("a", 10), file("b", 20)], 4096, &p);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].fragments.len(), 2);
        assert!(slices[0].fragments.iter().all(|f| f.offset == 0 && f.size == f.file_size));
    }

    #[test]
    fn large_file_splits_on_leaf_boundaries() {
        let p = params(256);
        let slices = plan(&[file("big", 10_000)], 2048, &p);
        assert!(slices.len() > 1);
        let mut offset = 0;
        for slice in &slices {
            assert_eq!(slice.fragments.len(), 1);
            let fragment = &slice.fragments[0];
            assert_eq!(fragment.offset, offset);
            assert_eq!(fragment.offset % 256, 0);
            assert!(slice.estimate + SLICE_OVERHEAD <= 2048);
            offset += fragment.size;
        }
        assert_eq!(offset, 10_000);
    }

    #[test]
    fn tiny_slice_still_takes_one_leaf() {
        let p = params(256);
        let slices = plan(&[file("big", 1000)], 1, &p);
        assert_eq!(slices.len(), 4);
        assert_eq!(
            slices.iter().map(|s| s.fragments[0].size).collect::<Vec<_>>(),
            vec![256, 256, 256, 232]
        );
    }

    #[test]
    fn empty_files_are_planned() {
        let p = params(256);
        let slices = plan(&[file("empty", 0)], 1, &p);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].fragments[0].size, 0);
    }

    #[test]
    fn random_names_keep_extension() {
        let renamed = random_name(Path::new("data/photo.jpg"));
        assert_eq!(renamed.parent(), Some(Path::new("data")));
        assert_eq!(renamed.extension().unwrap(), "jpg");
        assert_ne!(renamed.file_name().unwrap(), "photo.jpg");
        assert_eq!(random_name(Path::new("README")).to_string_lossy().len(), 36);
    }

    #[test]
    fn walk_is_sorted_and_relative() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.txt"), b"bb").unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("sub/c.txt"), b"ccc").unwrap();

        let files = walk(&root, dir.path(), false).unwrap();
        let records: Vec<_> = files.iter().map(|f| f.record.clone()).collect();
        assert_eq!(
            records,
            vec![
                PathBuf::from("data/a.txt"),
                PathBuf::from("data/b.txt"),
                PathBuf::from("data/sub/c.txt")
            ]
        );
        assert_eq!(files.iter().map(|f| f.size).sum::<u64>(), 6);
        assert!(matches!(
            walk(&root, &dir.path().join("elsewhere"), false),
            Err(Error::Config(_))
        ));
    }

    #[quickcheck]
    fn plan_covers_every_byte_once(sizes: Vec<u16>, slice_size: u16) {
        let p = params(64);
        let files: Vec<_> = sizes
            .iter()
            .take(20)
            .enumerate()
            .map(|(i, size)| file(&format!("f{i}"), u64::from(*size)))
            .collect();
        let slice_size = u64::from(slice_size);
        let slices = plan(&files, slice_size, &p);
        for f in &files {
            let mut offset = 0;
            let fragments = slices
                .iter()
                .flat_map(|s| &s.fragments)
                .filter(|x| x.source == f.path);
            for fragment in fragments {
                assert_eq!(fragment.offset, offset);
                offset += fragment.size;
            }
            assert_eq!(offset, f.size);
        }
        for slice in &slices {
            let forced = slice.fragments.len() == 1 && slice.fragments[0].size <= 64;
            assert!(forced || slice.estimate + SLICE_OVERHEAD <= slice_size);
        }
    }
}
