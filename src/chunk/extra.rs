// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use tracing::debug;

use super::plan::{Fragment, SourceFile, fit, fragment_cost, walk};
use crate::dag::DagParams;
use crate::error::{Error, Result};

/// Filler content appended to every slice, up to `slice_quota` archive bytes.
///
/// The files under the extra path are consumed in walk order through a cursor
/// that persists across slices and across runs sharing this source. Once the
/// cursor reaches the end, no more filler is added.
#[derive(Debug)]
pub struct ExtraFileSource {
    files: Vec<SourceFile>,
    slice_quota: u64,
    cursor: usize,
    offset: u64,
}

impl ExtraFileSource {
    /// Indexes the extra path. Files are recorded under the extra path's own
    /// name.
    pub fn new(path: impl AsRef<Path>, slice_quota: u64) -> Result<Self> {
        let path = path.as_ref();
        let parent = path.parent().unwrap_or(path);
        if path.file_name().is_none() {
            return Err(Error::Config(format!(
                "extra file path {} has no name",
                path.display()
            )));
        }
        Ok(Self {
            files: walk(path, parent, false)?,
            slice_quota,
            cursor: 0,
            offset: 0,
        })
    }

    pub fn slice_quota(&self) -> u64 {
        self.slice_quota
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.files.len()
    }

    /// Total size of the files under the extra path.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// First of `files` recorded under the same path as an extra file.
    pub(super) fn collision<'a>(&self, files: &'a [SourceFile]) -> Option<&'a Path> {
        let records: ahash::HashSet<&Path> =
            self.files.iter().map(|f| f.record.as_path()).collect();
        files
            .iter()
            .map(|f| f.record.as_path())
            .find(|record| records.contains(record))
    }

    /// Fragments filling at most one slice quota, with their estimated cost.
    pub(super) fn next_batch(&mut self, params: &DagParams) -> Vec<(Fragment, u64)> {
        let mut budget = self.slice_quota;
        let mut batch = Vec::new();
        while let Some(file) = self.files.get(self.cursor) {
            let remaining = file.size - self.offset;
            let size = if fragment_cost(&file.record, remaining, params) <= budget {
                remaining
            } else {
                fit(&file.record, remaining, budget, params)
            };
            let cost = fragment_cost(&file.record, size, params);
            if (size == 0 && remaining > 0) || cost > budget {
                break;
            }
            batch.push((
                Fragment {
                    source: file.path.clone(),
                    record: file.record.clone(),
                    offset: self.offset,
                    size,
                    file_size: file.size,
                },
                cost,
            ));
            budget -= cost;
            self.offset += size;
            if self.offset < file.size {
                break;
            }
            self.cursor += 1;
            self.offset = 0;
        }
        if !batch.is_empty() {
            debug!("appending {} extra fragment(s)", batch.len());
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::multihash::MultihashCode;

    fn params() -> DagParams {
        DagParams {
            chunk_size: 64,
            max_links: 4,
            hasher: MultihashCode::Sha2_256,
        }
    }

    fn source(sizes: &[usize], quota: u64) -> (tempfile::TempDir, ExtraFileSource) {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("filler");
        std::fs::create_dir(&extra).unwrap();
        for (i, size) in sizes.iter().enumerate() {
            std::fs::write(extra.join(format!("{i:02}.bin")), vec![i as u8; *size]).unwrap();
        }
        let source = ExtraFileSource::new(&extra, quota).unwrap();
        (dir, source)
    }

    #[test]
    fn batches_respect_quota_and_advance() {
        let (_dir, mut extra) = source(&[100, 100, 100], 700);
        assert_eq!(extra.total_size(), 300);

        let mut seen = 0;
        let mut batches = 0;
        while !extra.is_exhausted() {
            let batch = extra.next_batch(&params());
            assert!(!batch.is_empty());
            assert!(batch.iter().map(|(_, cost)| cost).sum::<u64>() <= 700);
            for (fragment, _) in &batch {
                assert!(fragment.record.starts_with("filler"));
                seen += fragment.size;
            }
            batches += 1;
        }
        assert_eq!(seen, 300);
        assert!(batches > 1);
        assert!(extra.next_batch(&params()).is_empty());
    }

    #[test]
    fn quota_too_small_adds_nothing() {
        let (_dir, mut extra) = source(&[100], 10);
        assert!(extra.next_batch(&params()).is_empty());
        assert!(!extra.is_exhausted());
    }
}
