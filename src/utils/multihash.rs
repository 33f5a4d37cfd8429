// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//!
//! Hash functions usable for block CIDs. A narrowed-down version of
//! [`multihash_codetable::Code`] so that archives only ever carry codes we can
//! verify on restore.
//!

pub mod prelude {
    pub use super::MultihashCode;
    pub use multihash_codetable::MultihashDigest as _;
}

use multihash_derive::MultihashDigest;

#[derive(Clone, Copy, Debug, Eq, MultihashDigest, PartialEq, Hash, strum::EnumString)]
#[mh(alloc_size = 64)]
#[strum(serialize_all = "kebab-case")]
pub enum MultihashCode {
    /// SHA-256 (32-byte hash size)
    #[mh(code = 0x12, hasher = multihash_codetable::Sha2_256)]
    #[strum(serialize = "sha2-256")]
    Sha2_256,
    /// BLAKE2b-256 (32-byte hash size)
    #[mh(code = 0xb220, hasher = multihash_codetable::Blake2b256)]
    #[strum(serialize = "blake2b-256")]
    Blake2b256,
    /// BLAKE3-256 (32-byte hash size)
    #[mh(code = 0x1e, hasher = multihash_codetable::Blake3_256)]
    #[strum(serialize = "blake3")]
    Blake3_256,
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::str::FromStr as _;

    #[test]
    fn code_roundtrips_through_u64() {
        for code in [
            MultihashCode::Sha2_256,
            MultihashCode::Blake2b256,
            MultihashCode::Blake3_256,
        ] {
            let mh = code.digest(b"graphsplit");
            assert_eq!(MultihashCode::try_from(mh.code()).unwrap(), code);
            assert_eq!(mh.size(), 32);
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!(
            MultihashCode::from_str("sha2-256").unwrap(),
            MultihashCode::Sha2_256
        );
        assert_eq!(
            MultihashCode::from_str("blake3").unwrap(),
            MultihashCode::Blake3_256
        );
        assert!(MultihashCode::from_str("md5").is_err());
    }

    #[test]
    fn unknown_code_is_rejected() {
        // sha2-256-trunc254-padded is only used for piece CIDs
        assert!(MultihashCode::try_from(0x1012).is_err());
    }
}
