// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Piece commitment (`CommP`) calculation.
//!
//! Payload bytes are fr32 padded (every 127 bytes become four 254-bit field
//! elements stored in 32-byte slots) and merkleized with a binary
//! `sha2-256-trunc254-padded` tree. Missing leaves up to the next power of two
//! are filled with the roots of all-zero subtrees.
//!
//! See <https://spec.filecoin.io/systems/filecoin_files/piece/>

mod fr32;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::mem;
use std::path::Path;
use std::sync::LazyLock;

use cid::Cid;
use fvm_shared4::commcid::data_commitment_v1_to_cid;
use fvm_shared4::piece::{PaddedPieceSize, UnpaddedPieceSize};
use sha2::{Digest as _, Sha256};

use crate::error::{Error, IoResultExt as _, Result};
pub use fr32::{PADDED_CHUNK, UNPADDED_CHUNK, fr32_pad};
pub use fvm_shared4::commcid::{FIL_COMMITMENT_UNSEALED, SHA2_256_TRUNC254_PADDED};

/// Smallest padded piece, one fr32 chunk.
pub const MIN_PIECE_SIZE: u64 = PADDED_CHUNK as u64;

const NODE_SIZE: usize = 32;
type Node = [u8; NODE_SIZE];

/// `ZERO_COMMS[i]` is the root of a tree of `2^i` zero leaves.
static ZERO_COMMS: LazyLock<Vec<Node>> = LazyLock::new(|| {
    let mut comms = vec![[0u8; NODE_SIZE]];
    for level in 0..63 {
        let next = hash_pair(&comms[level], &comms[level]);
        comms.push(next);
    }
    comms
});

fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; NODE_SIZE];
    out.copy_from_slice(&hasher.finalize());
    // keep the node inside the BLS12-381 scalar field
    out[NODE_SIZE - 1] &= 0b0011_1111;
    out
}

/// Padded size of the piece holding `payload_size` bytes: a power of two,
/// at least [`MIN_PIECE_SIZE`].
pub fn padded_piece_size(payload_size: u64) -> u64 {
    let chunks = payload_size.div_ceil(UNPADDED_CHUNK as u64).max(1);
    let PaddedPieceSize(padded) = UnpaddedPieceSize(chunks * UNPADDED_CHUNK as u64).padded();
    padded.next_power_of_two()
}

/// Number of payload bytes a padded piece of `piece_size` bytes can hold.
pub fn unpadded_piece_size(piece_size: u64) -> u64 {
    PaddedPieceSize(piece_size).unpadded().0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceCommitment {
    pub piece_cid: Cid,
    /// Padded piece size, a power of two.
    pub piece_size: u64,
    pub payload_size: u64,
}

impl PieceCommitment {
    /// The raw 32-byte commitment.
    pub fn root(&self) -> &[u8] {
        self.piece_cid.hash().digest()
    }

    pub fn unpadded_size(&self) -> u64 {
        unpadded_piece_size(self.piece_size)
    }
}

/// Streaming `CommP` calculator. Memory use is bounded by the tree depth.
#[derive(Debug, Default)]
pub struct CommPCalculator {
    pending: Vec<u8>,
    layers: Vec<Option<Node>>,
    payload_size: u64,
}

impl CommPCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.payload_size += data.len() as u64;
        if !self.pending.is_empty() {
            let take = (UNPADDED_CHUNK - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < UNPADDED_CHUNK {
                return;
            }
            let chunk = mem::take(&mut self.pending);
            self.absorb(&chunk);
        }
        let mut chunks = data.chunks_exact(UNPADDED_CHUNK);
        for chunk in &mut chunks {
            self.absorb(chunk);
        }
        self.pending.extend_from_slice(chunks.remainder());
    }

    fn absorb(&mut self, chunk: &[u8]) {
        let mut padded = [0u8; PADDED_CHUNK];
        fr32_pad(chunk, &mut padded);
        for leaf in padded.chunks_exact(NODE_SIZE) {
            let mut node = [0u8; NODE_SIZE];
            node.copy_from_slice(leaf);
            self.push(node);
        }
    }

    fn push(&mut self, mut node: Node) {
        let mut level = 0;
        loop {
            if self.layers.len() == level {
                self.layers.push(None);
            }
            match self.layers[level].take() {
                Some(left) => {
                    node = hash_pair(&left, &node);
                    level += 1;
                }
                None => {
                    self.layers[level] = Some(node);
                    return;
                }
            }
        }
    }

    pub fn finish(mut self) -> Result<PieceCommitment> {
        if self.payload_size == 0 {
            return Err(Error::EmptyInput);
        }
        if !self.pending.is_empty() {
            let mut chunk = mem::take(&mut self.pending);
            chunk.resize(UNPADDED_CHUNK, 0);
            self.absorb(&chunk);
        }

        let piece_size = padded_piece_size(self.payload_size);
        let depth = (piece_size / NODE_SIZE as u64).trailing_zeros() as usize;
        let layer = |level: usize| self.layers.get(level).copied().flatten();
        let mut acc: Option<Node> = None;
        for level in 0..depth {
            acc = match (layer(level), acc) {
                (Some(left), Some(right)) => Some(hash_pair(&left, &right)),
                (Some(left), None) => Some(hash_pair(&left, &ZERO_COMMS[level])),
                (None, Some(left)) => Some(hash_pair(&left, &ZERO_COMMS[level])),
                (None, None) => None,
            };
        }
        let root = acc
            .or_else(|| layer(depth))
            .ok_or_else(|| Error::Integrity("piece tree has no root".into()))?;

        let piece_cid =
            data_commitment_v1_to_cid(&root).map_err(|e| Error::Format(e.to_string()))?;
        Ok(PieceCommitment {
            piece_cid,
            piece_size,
            payload_size: self.payload_size,
        })
    }
}

impl Write for CommPCalculator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Piece commitment of an in-memory payload.
pub fn compute_commitment(bytes: &[u8]) -> Result<PieceCommitment> {
    let mut calc = CommPCalculator::new();
    calc.update(bytes);
    calc.finish()
}

/// Piece commitment of the file at `path`. With `add_padding` the file is
/// extended with zeros to the unpadded piece size, which leaves the
/// commitment unchanged and makes the file a ready-to-seal piece.
pub fn compute_file_commitment(
    path: impl AsRef<Path>,
    add_padding: bool,
) -> Result<PieceCommitment> {
    let path = path.as_ref();
    let file = File::open(path).with_path(path)?;
    let mut calc = CommPCalculator::new();
    io::copy(&mut BufReader::with_capacity(1 << 20, file), &mut calc).with_path(path)?;
    let commp = calc.finish()?;
    if add_padding {
        pad_file(path, commp.unpadded_size())?;
    }
    Ok(commp)
}

fn pad_file(path: &Path, target: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path).with_path(path)?;
    let len = file.metadata().with_path(path)?.len();
    if len < target {
        file.set_len(target).with_path(path)?;
        file.sync_all().with_path(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    /// Whole-tree reference implementation.
    fn naive_root(payload: &[u8]) -> Node {
        let piece_size = padded_piece_size(payload.len() as u64);
        let mut unpadded = payload.to_vec();
        unpadded.resize(unpadded_piece_size(piece_size) as usize, 0);
        let mut nodes: Vec<Node> = Vec::new();
        for chunk in unpadded.chunks_exact(UNPADDED_CHUNK) {
            let mut padded = [0u8; PADDED_CHUNK];
            fr32_pad(chunk, &mut padded);
            for leaf in padded.chunks_exact(NODE_SIZE) {
                nodes.push(leaf.try_into().unwrap());
            }
        }
        while nodes.len() > 1 {
            nodes = nodes
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        nodes[0]
    }

    #[rstest]
    #[case(1, 128)]
    #[case(127, 128)]
    #[case(128, 256)]
    #[case(254, 256)]
    #[case(255, 512)]
    #[case(1016, 1024)]
    #[case(1017, 2048)]
    fn piece_sizes(#[case] payload: u64, #[case] expected: u64) {
        assert_eq!(padded_piece_size(payload), expected);
        assert!(unpadded_piece_size(expected) >= payload);
        assert!(UnpaddedPieceSize(unpadded_piece_size(expected)).validate().is_ok());
    }

    #[quickcheck]
    fn piece_size_law(payload: u64) -> bool {
        let payload = payload % (1 << 40) + 1;
        let size = padded_piece_size(payload);
        size.is_power_of_two() && u128::from(size) * 127 >= u128::from(payload) * 128
    }

    #[quickcheck]
    fn streaming_matches_reference(payload: Vec<u8>, split: usize) -> bool {
        if payload.is_empty() {
            return true;
        }
        let mut calc = CommPCalculator::new();
        let (a, b) = payload.split_at(split % payload.len());
        calc.update(a);
        calc.update(b);
        let commp = calc.finish().unwrap();
        commp.root() == naive_root(&payload)
            && commp.piece_size == padded_piece_size(payload.len() as u64)
    }

    #[test]
    fn larger_payload_matches_reference() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i * 31 % 251) as u8).collect();
        let commp = compute_commitment(&payload).unwrap();
        assert_eq!(commp.root(), naive_root(&payload));
        assert_eq!(commp.piece_size, 8192);
    }

    #[test]
    fn zero_payload_is_zero_comm() {
        let commp = compute_commitment(&[0u8; 127]).unwrap();
        assert_eq!(commp.root(), ZERO_COMMS[2]);
        let commp = compute_commitment(&[0u8; 1016]).unwrap();
        assert_eq!(commp.root(), ZERO_COMMS[5]);
    }

    #[test]
    fn piece_cid_is_tagged() {
        let commp = compute_commitment(b"hello piece").unwrap();
        assert_eq!(commp.piece_cid.codec(), FIL_COMMITMENT_UNSEALED);
        assert_eq!(commp.piece_cid.hash().code(), SHA2_256_TRUNC254_PADDED);
        assert_eq!(commp.root().len(), 32);
        assert_eq!(commp.root()[31] & 0b1100_0000, 0);
        assert!(commp.piece_cid.to_string().starts_with("baga6ea4sea"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(compute_commitment(&[]), Err(Error::EmptyInput)));
    }

    #[test]
    fn appending_a_byte_changes_the_root() {
        let a = compute_commitment(b"payload").unwrap();
        let b = compute_commitment(b"payload!").unwrap();
        assert_ne!(a.piece_cid, b.piece_cid);
        assert_eq!(a.piece_size, b.piece_size);
    }

    #[test]
    fn padding_file_keeps_commitment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.car");
        let payload: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        std::fs::write(&path, &payload).unwrap();

        let before = compute_file_commitment(&path, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 700);
        assert_eq!(before, compute_commitment(&payload).unwrap());

        let padded = compute_file_commitment(&path, true).unwrap();
        assert_eq!(padded, before);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            unpadded_piece_size(before.piece_size)
        );

        let after = compute_file_commitment(&path, false).unwrap();
        assert_eq!(after.piece_cid, before.piece_cid);
        assert_eq!(after.piece_size, before.piece_size);
    }

    #[test]
    fn file_name_does_not_matter() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.car");
        let b = dir.path().join("renamed.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(
            compute_file_commitment(&a, false).unwrap(),
            compute_file_commitment(&b, false).unwrap()
        );
    }
}
