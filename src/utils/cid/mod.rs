// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;

use crate::utils::multihash::prelude::*;

pub type CidHashSet = ahash::HashSet<Cid>;
pub type CidHashMap<V> = ahash::HashMap<Cid, V>;

/// Extension methods for addressing archive blocks.
pub trait CidBlockExt {
    /// Version 1 CID of `data` under `codec`, hashed with `code`.
    ///
    /// Identical payloads and codecs always produce identical CIDs.
    fn for_block(codec: u64, code: MultihashCode, data: &[u8]) -> Cid {
        Cid::new_v1(codec, code.digest(data))
    }

    /// Recomputes the CID of `data` with the codec and hash function recorded
    /// in `self`. Returns `None` when the hash function is not supported.
    fn recompute(&self, data: &[u8]) -> Option<Cid>;
}

impl CidBlockExt for Cid {
    fn recompute(&self, data: &[u8]) -> Option<Cid> {
        let code = MultihashCode::try_from(self.hash().code()).ok()?;
        Some(Cid::for_block(self.codec(), code, data))
    }
}
