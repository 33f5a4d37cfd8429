// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::{DAG_CBOR, IPLD_RAW, from_slice};

use super::{FileNode, Link};
use crate::error::{Error, Result};
use crate::utils::cid::{CidHashMap, CidHashSet};

/// Maximum nesting of internal nodes accepted while resolving a file.
pub const MAX_DEPTH: usize = 64;

/// Read access to blocks by CID.
pub trait BlockSource {
    fn block(&self, cid: &Cid) -> Option<&[u8]>;
}

impl BlockSource for CidHashMap<Vec<u8>> {
    fn block(&self, cid: &Cid) -> Option<&[u8]> {
        self.get(cid).map(Vec::as_slice)
    }
}

struct Frame {
    cid: Option<Cid>,
    links: Vec<Link>,
    next: usize,
}

/// Walks the DAG under `root` depth-first and hands every leaf payload, in
/// file order, to `emit`. Returns the number of bytes emitted.
///
/// The walk uses an explicit stack. A node that links back to one of its
/// ancestors, a missing block or a size that disagrees with the recorded link
/// size is an [`Error::Integrity`].
pub fn resolve_file<S: BlockSource + ?Sized>(
    source: &S,
    root: &Link,
    mut emit: impl FnMut(&[u8]) -> Result<()>,
) -> Result<u64> {
    let mut written = 0u64;
    let mut ancestors = CidHashSet::default();
    let mut stack = vec![Frame {
        cid: None,
        links: vec![*root],
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(link) = frame.links.get(frame.next).copied() else {
            if let Some(cid) = frame.cid {
                ancestors.remove(&cid);
            }
            stack.pop();
            continue;
        };
        frame.next += 1;

        let data = source
            .block(&link.cid)
            .ok_or_else(|| Error::Integrity(format!("unresolved link {}", link.cid)))?;
        match link.cid.codec() {
            IPLD_RAW => {
                if data.len() as u64 != link.size {
                    return Err(Error::Integrity(format!(
                        "leaf {} holds {} bytes, its link records {}",
                        link.cid,
                        data.len(),
                        link.size
                    )));
                }
                emit(data)?;
                written += link.size;
            }
            DAG_CBOR => {
                if !ancestors.insert(link.cid) {
                    return Err(Error::Integrity(format!("cycle through {}", link.cid)));
                }
                if stack.len() > MAX_DEPTH {
                    return Err(Error::Integrity(format!(
                        "DAG under {} is deeper than {MAX_DEPTH} levels",
                        root.cid
                    )));
                }
                let node: FileNode = from_slice(data)?;
                let total = node
                    .links
                    .iter()
                    .try_fold(0u64, |acc, l| acc.checked_add(l.size));
                if total != Some(node.size) || node.size != link.size {
                    return Err(Error::Integrity(format!(
                        "node {} records {} bytes, its link {} and its children {:?}",
                        link.cid, node.size, link.size, total
                    )));
                }
                stack.push(Frame {
                    cid: Some(link.cid),
                    links: node.links,
                    next: 0,
                });
            }
            codec => {
                return Err(Error::Format(format!(
                    "unexpected codec {codec:#x} for {}",
                    link.cid
                )));
            }
        }
    }

    if written != root.size {
        return Err(Error::Integrity(format!(
            "file {} restored to {written} bytes, expected {}",
            root.cid, root.size
        )));
    }
    Ok(written)
}
