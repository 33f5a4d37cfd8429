// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io::Read;
use std::mem;
use std::path::Path;

use fvm_ipld_encoding::{DAG_CBOR, IPLD_RAW, to_vec};

use super::{DagParams, FileNode, Link};
use crate::car::CarBlock;
use crate::error::{Error, IoResultExt as _, Result};
use crate::utils::io::read_chunk;

/// Upper bound of an encoded CID for the supported hash functions.
const MAX_CID_LEN: u64 = 40;
/// Upper bound of a varint length prefix.
const MAX_PREFIX_LEN: u64 = 10;
/// Upper bound of one encoded [`Link`]: array header, CID tag, byte string
/// header, multibase prefix, CID and size.
const MAX_LINK_LEN: u64 = 1 + 2 + 2 + 1 + MAX_CID_LEN + 9;
/// Framing and CBOR headers of one [`FileNode`], excluding its links.
const NODE_OVERHEAD: u64 = MAX_PREFIX_LEN + MAX_CID_LEN + 1 + 9 + 9;
const LEAF_OVERHEAD: u64 = MAX_PREFIX_LEN + MAX_CID_LEN;

/// Receives blocks as soon as the builder produces them.
pub trait BlockSink {
    fn put(&mut self, block: CarBlock) -> Result<()>;
}

impl BlockSink for Vec<CarBlock> {
    fn put(&mut self, block: CarBlock) -> Result<()> {
        self.push(block);
        Ok(())
    }
}

/// Incremental balanced DAG builder.
///
/// Holds at most `max_links` pending links per tree level; full groups are
/// turned into [`FileNode`]s and emitted immediately.
pub struct DagBuilder<'a, S: ?Sized> {
    params: DagParams,
    sink: &'a mut S,
    levels: Vec<Vec<Link>>,
    leaves: u64,
}

impl<'a, S: BlockSink + ?Sized> DagBuilder<'a, S> {
    pub fn new(params: DagParams, sink: &'a mut S) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            sink,
            levels: Vec::new(),
            leaves: 0,
        })
    }

    pub fn push_leaf(&mut self, data: Vec<u8>) -> Result<()> {
        debug_assert!(data.len() as u64 <= self.params.chunk_size);
        let block = CarBlock::new(IPLD_RAW, self.params.hasher, data);
        let link = Link {
            cid: block.cid,
            size: block.data.len() as u64,
        };
        self.sink.put(block)?;
        self.leaves += 1;
        self.push_link(0, link)
    }

    fn push_link(&mut self, mut level: usize, mut link: Link) -> Result<()> {
        loop {
            if self.levels.len() == level {
                self.levels.push(Vec::with_capacity(self.params.max_links));
            }
            self.levels[level].push(link);
            if self.levels[level].len() < self.params.max_links {
                return Ok(());
            }
            let full = mem::take(&mut self.levels[level]);
            link = self.emit_node(full)?;
            level += 1;
        }
    }

    fn emit_node(&mut self, links: Vec<Link>) -> Result<Link> {
        let node = FileNode::new(links);
        let block = CarBlock::new(DAG_CBOR, self.params.hasher, to_vec(&node)?);
        let link = Link {
            cid: block.cid,
            size: node.size,
        };
        self.sink.put(block)?;
        Ok(link)
    }

    /// Closes the partial groups bottom-up and returns the root link.
    /// A stream without leaves becomes a single empty leaf.
    pub fn finish(mut self) -> Result<Link> {
        if self.leaves == 0 {
            self.push_leaf(Vec::new())?;
        }
        let levels = mem::take(&mut self.levels);
        let highest = levels.iter().rposition(|links| !links.is_empty());
        let mut carry: Option<Link> = None;
        for (level, mut links) in levels.into_iter().enumerate() {
            links.extend(carry.take());
            match links.len() {
                0 => {}
                1 if highest.is_none_or(|h| level >= h) => return Ok(links[0]),
                _ => carry = Some(self.emit_node(links)?),
            }
        }
        carry.ok_or_else(|| Error::Size("DAG without leaves".into()))
    }
}

/// Splits `reader` into fixed-size leaves and builds a balanced DAG over
/// them, emitting every block into `sink`. `path` only labels IO errors.
pub fn build_file_dag<S: BlockSink + ?Sized>(
    mut reader: impl Read,
    path: &Path,
    params: &DagParams,
    sink: &mut S,
) -> Result<Link> {
    let mut builder = DagBuilder::new(*params, sink)?;
    let capacity = params.chunk_size as usize;
    let mut buf = Vec::with_capacity(capacity);
    loop {
        let n = read_chunk(&mut reader, &mut buf, params.chunk_size).with_path(path)?;
        if n == 0 {
            break;
        }
        builder.push_leaf(mem::replace(&mut buf, Vec::with_capacity(capacity)))?;
        if (n as u64) < params.chunk_size {
            break;
        }
    }
    builder.finish()
}

/// Upper bound on the archive bytes (blocks and their framing) a DAG over
/// `len` bytes occupies.
pub fn estimate_archive_bytes(len: u64, params: &DagParams) -> u64 {
    let leaves = len.div_ceil(params.chunk_size).max(1);
    let fanout = params.max_links as u64;
    let mut total = len + leaves * LEAF_OVERHEAD;
    let mut count = leaves;
    while count > 1 {
        let nodes = count.div_ceil(fanout);
        total += count * MAX_LINK_LEN + nodes * NODE_OVERHEAD;
        count = nodes;
    }
    total
}
