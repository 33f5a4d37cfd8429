// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Merkle-DAG layout of chunked files.
//!
//! A file is a balanced tree: `raw` leaves of at most
//! [`DagParams::chunk_size`] bytes, grouped by `dag-cbor` [`FileNode`]s of at
//! most [`DagParams::max_links`] children. Each slice additionally carries a
//! tree of [`DirNode`]s recording which file fragments it holds.

mod builder;
mod resolver;

pub use builder::{BlockSink, DagBuilder, build_file_dag, estimate_archive_bytes};
pub use resolver::{BlockSource, MAX_DEPTH, resolve_file};

use cid::Cid;
use fvm_ipld_encoding::tuple::*;
use smart_default::SmartDefault;

use crate::error::{Error, Result};
use crate::utils::multihash::MultihashCode;

/// Default leaf size, 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;
/// Default fan-out of internal nodes.
pub const DEFAULT_MAX_LINKS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, SmartDefault)]
pub struct DagParams {
    /// Maximum leaf payload in bytes.
    #[default(DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,
    /// Maximum number of links in an internal node.
    #[default(DEFAULT_MAX_LINKS)]
    pub max_links: usize,
    #[default(MultihashCode::Sha2_256)]
    pub hasher: MultihashCode,
}

impl DagParams {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Size("chunk size must be positive".into()));
        }
        if usize::try_from(self.chunk_size).is_err() {
            return Err(Error::Size(format!(
                "chunk size {} does not fit in memory",
                self.chunk_size
            )));
        }
        if self.max_links < 2 {
            return Err(Error::Size(format!(
                "internal nodes need room for at least 2 links, got {}",
                self.max_links
            )));
        }
        Ok(())
    }
}

/// Reference to a subtree: its root and the number of file bytes below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct Link {
    pub cid: Cid,
    pub size: u64,
}

/// Internal node of a file DAG. `size` is the sum of the link sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct FileNode {
    pub size: u64,
    pub links: Vec<Link>,
}

impl FileNode {
    pub fn new(links: Vec<Link>) -> Self {
        let size = links.iter().map(|l| l.size).sum();
        Self { size, links }
    }
}

/// A file, or a fragment of one, stored in a slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct FileEntry {
    pub name: String,
    /// Root of the fragment DAG.
    pub cid: Cid,
    /// Position of the fragment inside the original file.
    pub offset: u64,
    /// Fragment length.
    pub size: u64,
    /// Length of the original file.
    pub file_size: u64,
}

impl FileEntry {
    /// `true` if the entry covers the whole original file.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.size == self.file_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DirLink {
    pub name: String,
    pub cid: Cid,
}

/// Directory layout of a slice. Entries are sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct DirNode {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirLink>,
}
