// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read as _, Seek as _, SeekFrom};
use std::path::{Component, Path};

use cid::Cid;
use fvm_ipld_encoding::{DAG_CBOR, to_vec};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use super::plan::Fragment;
use crate::car::{CarBlock, CarWriter};
use crate::dag::{BlockSink, DagParams, DirLink, DirNode, FileEntry, Link, build_file_dag};
use crate::error::{Error, IoResultExt as _, Result};
use crate::utils::cid::CidHashSet;
use crate::utils::multihash::MultihashCode;

/// Framed CAR records of one fragment, spooled to an anonymous file.
#[derive(Debug)]
pub struct Spool {
    file: File,
    pub root: Link,
    pub blocks: u64,
}

struct SpoolSink {
    writer: BufWriter<File>,
    seen: CidHashSet,
    blocks: u64,
}

impl BlockSink for SpoolSink {
    fn put(&mut self, block: CarBlock) -> Result<()> {
        if self.seen.insert(block.cid) {
            block
                .write(&mut self.writer)
                .map_err(|e| Error::io("<spool>", e))?;
            self.blocks += 1;
        }
        Ok(())
    }
}

/// Builds the DAG of `fragment` into a spool created in `spool_dir`.
pub fn build_fragment(fragment: &Fragment, params: &DagParams, spool_dir: &Path) -> Result<Spool> {
    let mut source = File::open(&fragment.source).with_path(&fragment.source)?;
    source
        .seek(SeekFrom::Start(fragment.offset))
        .with_path(&fragment.source)?;
    let mut sink = SpoolSink {
        writer: BufWriter::new(tempfile::tempfile_in(spool_dir).with_path(spool_dir)?),
        seen: CidHashSet::default(),
        blocks: 0,
    };
    let root = build_file_dag(
        source.take(fragment.size),
        &fragment.source,
        params,
        &mut sink,
    )?;
    if root.size != fragment.size {
        return Err(Error::io(
            &fragment.source,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "expected {} bytes at offset {}, read {}",
                    fragment.size, fragment.offset, root.size
                ),
            ),
        ));
    }
    let mut file = sink
        .writer
        .into_inner()
        .map_err(|e| Error::io(spool_dir, e.into_error()))?;
    file.rewind().with_path(spool_dir)?;
    debug!(
        "built {} at offset {}: {} block(s), root {}",
        fragment.record.display(),
        fragment.offset,
        sink.blocks,
        root.cid
    );
    Ok(Spool {
        file,
        root,
        blocks: sink.blocks,
    })
}

/// Collects the spools of one slice from the worker threads. Spools are
/// keyed by fragment index so that the archive layout does not depend on
/// completion order.
pub struct SliceAccumulator {
    spools: Mutex<Vec<Option<Spool>>>,
}

impl SliceAccumulator {
    pub fn new(fragments: usize) -> Self {
        Self {
            spools: Mutex::new((0..fragments).map(|_| None).collect()),
        }
    }

    pub fn register(&self, index: usize, spool: Spool) {
        if let Some(slot) = self.spools.lock().get_mut(index) {
            *slot = Some(spool);
        }
    }

    /// Spools in fragment order, or `None` if any fragment is missing.
    pub fn into_spools(self) -> Option<Vec<Spool>> {
        self.spools.into_inner().into_iter().collect()
    }
}

#[derive(Default)]
struct DirTree {
    files: Vec<FileEntry>,
    dirs: BTreeMap<String, DirTree>,
}

impl DirTree {
    fn insert(&mut self, fragment: &Fragment, root: &Link) -> Result<()> {
        let mut names = Vec::new();
        for component in fragment.record.components() {
            match component {
                Component::Normal(name) => names.push(name.to_string_lossy().into_owned()),
                _ => {
                    return Err(Error::Config(format!(
                        "cannot record {} in an archive",
                        fragment.record.display()
                    )));
                }
            }
        }
        let Some(name) = names.pop() else {
            return Err(Error::Config("empty record path".into()));
        };
        let mut dir = self;
        for component in names {
            dir = dir.dirs.entry(component).or_default();
        }
        if dir.files.iter().any(|f| f.name == name) {
            return Err(Error::Config(format!(
                "{} is recorded twice in one slice",
                fragment.record.display()
            )));
        }
        dir.files.push(FileEntry {
            name,
            cid: root.cid,
            offset: fragment.offset,
            size: fragment.size,
            file_size: fragment.file_size,
        });
        Ok(())
    }

    /// Encodes the tree bottom-up. The root node is the last block.
    fn seal(self, hasher: MultihashCode, blocks: &mut Vec<CarBlock>) -> Result<Cid> {
        let mut dirs = Vec::with_capacity(self.dirs.len());
        for (name, child) in self.dirs {
            let cid = child.seal(hasher, blocks)?;
            dirs.push(DirLink { name, cid });
        }
        let node = DirNode {
            files: self.files,
            dirs,
        };
        let block = CarBlock::new(DAG_CBOR, hasher, to_vec(&node)?);
        let cid = block.cid;
        blocks.push(block);
        Ok(cid)
    }
}

/// Directory blocks for the fragments of a slice, root last.
pub fn directory_blocks(
    fragments: &[Fragment],
    spools: &[Spool],
    hasher: MultihashCode,
) -> Result<(Cid, Vec<CarBlock>)> {
    let mut tree = DirTree::default();
    for (fragment, spool) in fragments.iter().zip(spools) {
        tree.insert(fragment, &spool.root)?;
    }
    let mut blocks = Vec::new();
    let root = tree.seal(hasher, &mut blocks)?;
    Ok((root, blocks))
}

/// Writes the archive of a slice to a temporary file in `output_dir` and
/// persists it as `path` without overwriting an existing file. Returns the
/// root CID and archive size.
pub fn write_archive(
    path: &Path,
    output_dir: &Path,
    fragments: &[Fragment],
    spools: Vec<Spool>,
    hasher: MultihashCode,
) -> Result<(Cid, u64)> {
    let (root, dir_blocks) = directory_blocks(fragments, &spools, hasher)?;
    let tmp = NamedTempFile::new_in(output_dir).with_path(output_dir)?;
    let mut writer = CarWriter::new(BufWriter::new(tmp), &[root]).with_path(path)?;
    let mut seen = CidHashSet::default();
    for block in dir_blocks.iter().rev() {
        if seen.insert(block.cid) {
            writer.write_block(block).with_path(path)?;
        }
    }
    for mut spool in spools {
        writer.write_framed(&mut spool.file).with_path(path)?;
    }
    let (writer, written) = writer.finish().with_path(path)?;
    let tmp = writer
        .into_inner()
        .map_err(|e| Error::io(path, e.into_error()))?;
    tmp.as_file().sync_all().with_path(path)?;
    tmp.persist_noclobber(path)
        .map_err(|e| Error::io(path, e.error))?;
    Ok((root, written))
}
