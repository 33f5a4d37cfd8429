// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Splitting a directory tree into size-bounded CAR slices.
//!
//! Files are walked in lexicographic order and assigned to slices greedily;
//! a file that does not fit is split at a leaf boundary and continues in the
//! next slice. Each slice becomes one archive whose single root is a
//! directory node recording, for every fragment, its name, DAG root, offset
//! and the size of the original file.
//!
//! Slices are processed one after another. Within a slice, fragment DAGs are
//! built in parallel, each into its own spool file, and concatenated in plan
//! order when the archive is sealed, so the output does not depend on
//! scheduling.

mod extra;
mod plan;
mod slice;

pub use extra::ExtraFileSource;

use std::path::{Path, PathBuf};

use cid::Cid;
use human_repr::HumanCount as _;
use rand::seq::SliceRandom as _;
use rayon::ThreadPool;
use rayon::prelude::*;
use smart_default::SmartDefault;
use tracing::{info, warn};

use crate::callback::{SealedSlice, SliceCallback};
use crate::dag::DagParams;
use crate::error::{Error, Result};
use crate::utils::io::exist_dir;
use plan::{Planner, SlicePlan};
use slice::{SliceAccumulator, build_fragment, write_archive};

/// Largest archive, filler included, a slice may be planned for.
pub const MAX_PIECE_PAYLOAD: u64 = 32 << 30;
pub const DEFAULT_SLICE_SIZE: u64 = 16 << 30;
pub const DEFAULT_PARALLELISM: usize = 2;

#[derive(Debug, Clone, SmartDefault)]
pub struct ChunkOptions {
    /// File or directory to chunk.
    pub input: PathBuf,
    /// Paths are recorded relative to this directory. Defaults to the parent
    /// of `input`.
    pub parent_path: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Target archive size in bytes.
    #[default(DEFAULT_SLICE_SIZE)]
    pub slice_size: u64,
    #[default(DEFAULT_PARALLELISM)]
    pub parallelism: usize,
    pub graph_name: String,
    /// Record random file names instead of the real ones.
    pub random_rename: bool,
    /// Visit files in random order.
    pub random_select: bool,
    pub dag: DagParams,
}

impl ChunkOptions {
    pub fn validate(&self, extra_quota: u64) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be positive".into()));
        }
        if self.slice_size == 0 {
            return Err(Error::Config("slice size must be positive".into()));
        }
        if self.graph_name.trim().is_empty() {
            return Err(Error::Config("graph name is required".into()));
        }
        if self.graph_name.contains(std::path::is_separator) {
            return Err(Error::Config(format!(
                "graph name {:?} contains a path separator",
                self.graph_name
            )));
        }
        self.dag.validate()?;
        match self.slice_size.checked_add(extra_quota) {
            Some(total) if total <= MAX_PIECE_PAYLOAD => {}
            _ => {
                return Err(Error::Config(format!(
                    "slice size {} plus extra file quota {extra_quota} exceeds {MAX_PIECE_PAYLOAD}",
                    self.slice_size
                )));
            }
        }
        if !self.input.exists() {
            return Err(Error::Config(format!(
                "input {} does not exist",
                self.input.display()
            )));
        }
        if !self.input.starts_with(self.parent_path()) {
            return Err(Error::Config(format!(
                "input {} is not under the parent path {}",
                self.input.display(),
                self.parent_path().display()
            )));
        }
        if !exist_dir(&self.output_dir) {
            return Err(Error::Config(format!(
                "output directory {} does not exist",
                self.output_dir.display()
            )));
        }
        Ok(())
    }

    fn parent_path(&self) -> PathBuf {
        self.parent_path
            .clone()
            .or_else(|| self.input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.input.clone())
    }

    pub fn slice_name(&self, index: usize, total: usize) -> String {
        format!("{}-total-{total}-part-{index}.car", self.graph_name)
    }
}

#[derive(Debug, Default)]
pub struct ChunkSummary {
    /// Number of source files visited.
    pub files: usize,
    pub slices: Vec<SealedSlice>,
}

impl ChunkSummary {
    pub fn payload_size(&self) -> u64 {
        self.slices.iter().map(|s| s.payload_size).sum()
    }
}

/// Chunks `options.input` into archives in `options.output_dir`, invoking
/// `callback` once per slice in order.
///
/// Parameters are checked before any file is read. A slice that cannot be
/// written is still reported to the callback, with its error set, before the
/// error is returned. A callback error stops the run; archives written so far
/// are kept.
pub fn chunk(
    options: &ChunkOptions,
    callback: &dyn SliceCallback,
    extra: Option<&mut ExtraFileSource>,
) -> Result<ChunkSummary> {
    options.validate(extra.as_ref().map_or(0, |e| e.slice_quota()))?;

    let mut files = plan::walk(
        &options.input,
        &options.parent_path(),
        options.random_rename,
    )?;
    if let Some(record) = extra.as_deref().and_then(|e| e.collision(&files)) {
        return Err(Error::Config(format!(
            "{} is recorded by both the input and the extra file path",
            record.display()
        )));
    }
    if options.random_select {
        files.shuffle(&mut rand::thread_rng());
    }
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();

    let mut planner = Planner::new(&options.dag, options.slice_size, extra);
    for file in &files {
        planner.add_file(file);
    }
    let slices = planner.finish();
    let total = slices.len();
    info!(
        "chunking {} file(s), {}, into {total} slice(s)",
        files.len(),
        total_bytes.human_count_bytes()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .thread_name(|id| format!("graphsplit worker: {id}"))
        .num_threads(options.parallelism)
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    let mut summary = ChunkSummary {
        files: files.len(),
        slices: Vec::with_capacity(total),
    };
    for (i, plan) in slices.iter().enumerate() {
        let index = i + 1;
        let name = options.slice_name(index, total);
        let archive_path = options.output_dir.join(&name);
        let result = seal_slice(&pool, options, plan, &archive_path);

        let mut sealed = SealedSlice {
            index,
            total,
            name,
            archive_path,
            root_cid: None,
            payload_size: 0,
            source_files: plan.source_files(),
            error: None,
        };
        match &result {
            Ok((root, size)) => {
                sealed.root_cid = Some(*root);
                sealed.payload_size = *size;
            }
            Err(e) => sealed.error = Some(e.to_string()),
        }

        let reported = callback.on_slice_sealed(&sealed);
        if let Err(e) = result {
            if let Err(callback_error) = reported {
                warn!("callback for failed slice {}: {callback_error:#}", sealed.name);
            }
            return Err(e);
        }
        reported.map_err(Error::Callback)?;
        info!(
            "sealed {} ({}/{total}): {} in {} fragment(s)",
            sealed.name,
            index,
            sealed.payload_size.human_count_bytes(),
            plan.fragments.len()
        );
        summary.slices.push(sealed);
    }
    Ok(summary)
}

fn seal_slice(
    pool: &ThreadPool,
    options: &ChunkOptions,
    plan: &SlicePlan,
    path: &Path,
) -> Result<(Cid, u64)> {
    let acc = SliceAccumulator::new(plan.fragments.len());
    pool.install(|| {
        plan.fragments
            .par_iter()
            .enumerate()
            .try_for_each(|(i, fragment)| -> Result<()> {
                let spool = build_fragment(fragment, &options.dag, &options.output_dir)?;
                acc.register(i, spool);
                Ok(())
            })
    })?;
    let spools = acc.into_spools().ok_or_else(|| {
        Error::io(path, std::io::Error::other("a fragment of the slice was not built"))
    })?;
    write_archive(
        path,
        &options.output_dir,
        &plan.fragments,
        spools,
        options.dag.hasher,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callback;
    use crate::car::CarArchive;
    use crate::dag::{DirNode, FileEntry};
    use crate::utils::multihash::MultihashCode;
    use fvm_ipld_encoding::from_slice;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn dataset(root: &Path) -> PathBuf {
        let data = root.join("data");
        fs::create_dir_all(data.join("nested/deeper")).unwrap();
        fs::write(data.join("small.txt"), b"hello graphsplit").unwrap();
        fs::write(data.join("empty.bin"), b"").unwrap();
        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(data.join("nested/big.bin"), big).unwrap();
        fs::write(data.join("nested/deeper/leaf.md"), b"# leaf").unwrap();
        data
    }

    fn options(input: &Path, output_dir: &Path, slice_size: u64) -> ChunkOptions {
        ChunkOptions {
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            slice_size,
            parallelism: 4,
            graph_name: "graph".into(),
            dag: DagParams {
                chunk_size: 1024,
                max_links: 8,
                hasher: MultihashCode::Sha2_256,
            },
            ..Default::default()
        }
    }

    fn entries(archive: &CarArchive<memmap2::Mmap>, cid: &Cid, out: &mut Vec<FileEntry>) {
        let node: DirNode = from_slice(archive.get(cid).unwrap()).unwrap();
        out.extend(node.files);
        for dir in node.dirs {
            entries(archive, &dir.cid, out);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let (out_a, out_b) = (dir.path().join("a"), dir.path().join("b"));
        fs::create_dir_all(&out_a).unwrap();
        fs::create_dir_all(&out_b).unwrap();

        let run = |out: &Path| {
            chunk(&options(&data, out, 8192), &Callback::PropagateErrorOnly, None).unwrap()
        };
        let (a, b) = (run(&out_a), run(&out_b));
        assert_eq!(a.files, 4);
        assert!(a.slices.len() > 1);
        assert_eq!(a.slices.len(), b.slices.len());
        for (x, y) in a.slices.iter().zip(&b.slices) {
            assert_eq!(x.root_cid, y.root_cid);
            assert_eq!(x.name, y.name);
            assert_eq!(
                fs::read(&x.archive_path).unwrap(),
                fs::read(&y.archive_path).unwrap()
            );
        }
    }

    #[test]
    fn archives_respect_slice_size() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let summary =
            chunk(&options(&data, &out, 4096), &Callback::PropagateErrorOnly, None).unwrap();
        let total = summary.slices.len();
        for (i, slice) in summary.slices.iter().enumerate() {
            assert_eq!(slice.index, i + 1);
            assert_eq!(slice.name, format!("graph-total-{total}-part-{}.car", i + 1));
            let len = fs::metadata(&slice.archive_path).unwrap().len();
            assert_eq!(len, slice.payload_size);
            assert!(len <= 4096, "{} is {len} bytes", slice.name);
        }
    }

    #[test]
    fn fragments_cover_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let summary =
            chunk(&options(&data, &out, 6000), &Callback::PropagateErrorOnly, None).unwrap();

        let mut all = Vec::new();
        for slice in &summary.slices {
            let archive = CarArchive::open(&slice.archive_path).unwrap();
            entries(&archive, &archive.roots()[0], &mut all);
        }
        let big: Vec<_> = all.iter().filter(|e| e.name == "big.bin").collect();
        assert!(big.len() > 1);
        assert_eq!(big.iter().map(|e| e.size).sum::<u64>(), 20_000);
        assert!(big.iter().all(|e| e.file_size == 20_000 && e.offset % 1024 == 0));
        assert!(all.iter().any(|e| e.name == "empty.bin" && e.size == 0));
    }

    #[test]
    fn callback_sees_every_slice_once() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let seen = Mutex::new(Vec::new());
        let callback = |s: &SealedSlice| {
            assert!(s.error.is_none());
            assert!(s.archive_path.exists());
            seen.lock().push((s.index, s.total));
            Ok::<_, anyhow::Error>(())
        };
        let summary = chunk(&options(&data, &out, 8192), &callback, None).unwrap();
        let total = summary.slices.len();
        assert_eq!(*seen.lock(), (1..=total).map(|i| (i, total)).collect::<Vec<_>>());
    }

    #[test]
    fn callback_error_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let callback = |_: &SealedSlice| Err::<(), _>(anyhow::anyhow!("stop"));
        let err = chunk(&options(&data, &out, 4096), &callback, None).unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
        // the first archive stays on disk
        let written: Vec<_> = fs::read_dir(&out).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn invalid_parameters_touch_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let base = options(&data, &out, 4096);

        let cases = [
            ChunkOptions {
                parallelism: 0,
                ..base.clone()
            },
            ChunkOptions {
                slice_size: 0,
                ..base.clone()
            },
            ChunkOptions {
                graph_name: " ".into(),
                ..base.clone()
            },
            ChunkOptions {
                slice_size: MAX_PIECE_PAYLOAD + 1,
                ..base.clone()
            },
            ChunkOptions {
                output_dir: dir.path().join("missing"),
                ..base.clone()
            },
            ChunkOptions {
                parent_path: Some(dir.path().join("elsewhere")),
                ..base.clone()
            },
        ];
        for options in &cases {
            assert!(matches!(
                chunk(options, &Callback::PropagateErrorOnly, None),
                Err(Error::Config(_))
            ));
        }
        let degenerate = ChunkOptions {
            dag: DagParams {
                chunk_size: 0,
                ..base.dag
            },
            ..base.clone()
        };
        assert!(matches!(
            chunk(&degenerate, &Callback::PropagateErrorOnly, None),
            Err(Error::Size(_))
        ));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn extra_quota_counts_against_the_bound() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let filler = dir.path().join("filler");
        fs::create_dir(&filler).unwrap();
        fs::write(filler.join("pad.bin"), vec![0xee; 600]).unwrap();

        let mut extra = ExtraFileSource::new(&filler, MAX_PIECE_PAYLOAD).unwrap();
        let too_big = options(&data, &out, 4096);
        assert!(matches!(
            chunk(&too_big, &Callback::PropagateErrorOnly, Some(&mut extra)),
            Err(Error::Config(_))
        ));

        let mut extra = ExtraFileSource::new(&filler, 2048).unwrap();
        let summary = chunk(
            &options(&data, &out, 4096),
            &Callback::PropagateErrorOnly,
            Some(&mut extra),
        )
        .unwrap();
        assert!(extra.is_exhausted());
        let first = CarArchive::open(&summary.slices[0].archive_path).unwrap();
        let root: DirNode = from_slice(first.get(&first.roots()[0]).unwrap()).unwrap();
        assert!(root.dirs.iter().any(|d| d.name == "filler"));
        for slice in &summary.slices {
            assert!(slice.payload_size <= 4096 + 2048);
        }
    }

    #[test]
    fn random_rename_keeps_sources() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let opts = ChunkOptions {
            random_rename: true,
            random_select: true,
            ..options(&data, &out, 1 << 20)
        };
        let summary = chunk(&opts, &Callback::PropagateErrorOnly, None).unwrap();
        assert_eq!(summary.slices.len(), 1);
        assert!(data.join("small.txt").exists());
        let mut sources = summary.slices[0].source_files.clone();
        sources.sort();
        assert_eq!(sources.len(), 4);

        let archive = CarArchive::open(&summary.slices[0].archive_path).unwrap();
        let mut all = Vec::new();
        entries(&archive, &archive.roots()[0], &mut all);
        assert!(all.iter().all(|e| e.name != "small.txt"));
        assert!(all.iter().any(|e| e.name.ends_with(".md")));
    }

    #[test]
    fn single_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("one.bin");
        fs::write(&input, vec![0xab; 300]).unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let opts = ChunkOptions {
            dag: DagParams {
                chunk_size: 256,
                ..Default::default()
            },
            ..options(&input, &out, 1 << 20)
        };
        let summary = chunk(&opts, &Callback::PropagateErrorOnly, None).unwrap();
        let archive = CarArchive::open(&summary.slices[0].archive_path).unwrap();
        assert_eq!(archive.len(), 4);
        let root: DirNode = from_slice(archive.get(&archive.roots()[0]).unwrap()).unwrap();
        assert_eq!(root.files[0].name, "one.bin");
        assert!(root.dirs.is_empty());
    }

    #[test]
    fn failed_slice_is_reported_before_the_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = dataset(dir.path());
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let taken = out.join("graph-total-1-part-1.car");
        fs::write(&taken, b"not ours").unwrap();

        let seen = Mutex::new(Vec::new());
        let callback = |s: &SealedSlice| {
            seen.lock().push((s.index, s.root_cid, s.error.clone()));
            Ok::<_, anyhow::Error>(())
        };
        let err = chunk(&options(&data, &out, 1 << 20), &callback, None).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err}");

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 1);
        let (index, root, error) = &seen[0];
        assert_eq!(*index, 1);
        assert!(root.is_none());
        assert!(error.is_some());
        assert_eq!(fs::read(&taken).unwrap(), b"not ours");
    }

    #[test]
    fn extra_files_may_not_shadow_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("in/data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("a.txt"), b"real dataset content").unwrap();
        let filler = dir.path().join("fill/data");
        fs::create_dir_all(&filler).unwrap();
        fs::write(filler.join("a.txt"), b"filler").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let mut extra = ExtraFileSource::new(&filler, 4096).unwrap();
        let err = chunk(
            &options(&data, &out, 1 << 20),
            &Callback::PropagateErrorOnly,
            Some(&mut extra),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);

        // distinct names coexist
        fs::rename(filler.join("a.txt"), filler.join("b.txt")).unwrap();
        let mut extra = ExtraFileSource::new(&filler, 4096).unwrap();
        let summary = chunk(
            &options(&data, &out, 1 << 20),
            &Callback::PropagateErrorOnly,
            Some(&mut extra),
        )
        .unwrap();
        let archive = CarArchive::open(&summary.slices[0].archive_path).unwrap();
        let mut all = Vec::new();
        entries(&archive, &archive.roots()[0], &mut all);
        let mut names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }
}
