// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Reading and writing CAR v1 archives.
//!
//! An archive is a varint framed DAG-CBOR header `{roots, version}` followed by
//! varint framed `cid || payload` records. See
//! <https://ipld.io/specs/transport/car/carv1/>.

use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::path::Path;

use cid::Cid;
use fvm_ipld_encoding::{from_slice, to_vec};
use integer_encoding::VarInt;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::dag::BlockSource;
use crate::error::{Error, IoResultExt as _, Result};
use crate::utils::cid::{CidBlockExt as _, CidHashMap};
use crate::utils::multihash::MultihashCode;

pub const CAR_VERSION: u64 = 1;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarV1Header {
    // The roots array must contain one or more CIDs,
    // each of which should be present somewhere in the remainder of the CAR.
    // See <https://ipld.io/specs/transport/car/carv1/#constraints>
    pub roots: Vec<Cid>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl CarBlock {
    /// Addresses `data` under `codec` with a version 1 CID.
    pub fn new(codec: u64, code: MultihashCode, data: Vec<u8>) -> Self {
        let cid = Cid::for_block(codec, code, &data);
        Self { cid, data }
    }

    // Write a varint frame containing the cid and the data
    pub fn write(&self, writer: &mut impl Write) -> io::Result<()> {
        let frame_length = self.cid.encoded_len() + self.data.len();
        writer.write_all(&frame_length.encode_var_vec())?;
        self.cid
            .write_bytes(&mut *writer)
            .map_err(io::Error::other)?;
        writer.write_all(&self.data)
    }

    /// Number of bytes [`CarBlock::write`] emits, length prefix included.
    pub fn frame_len(&self) -> u64 {
        let body = self.cid.encoded_len() + self.data.len();
        (body.required_space() + body) as u64
    }

    pub fn validate(&self) -> Result<()> {
        validate_block(&self.cid, &self.data)
    }
}

fn validate_block(cid: &Cid, data: &[u8]) -> Result<()> {
    let actual = cid.recompute(data).ok_or_else(|| {
        Error::Format(format!(
            "unsupported multihash code {:#x} in {cid}",
            cid.hash().code()
        ))
    })?;
    if actual != *cid {
        return Err(Error::Integrity(format!(
            "CID/Block mismatch for block {cid}, actual: {actual}"
        )));
    }
    Ok(())
}

/// Varint framed header for `roots`.
fn encode_header(roots: &[Cid]) -> io::Result<Vec<u8>> {
    if roots.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a CAR header needs at least one root",
        ));
    }
    let header = CarV1Header {
        roots: roots.to_vec(),
        version: CAR_VERSION,
    };
    let body = to_vec(&header).map_err(io::Error::other)?;
    let mut frame = body.len().encode_var_vec();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Streaming CAR writer. Tracks the number of bytes written so far.
pub struct CarWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CarWriter<W> {
    pub fn new(mut inner: W, roots: &[Cid]) -> io::Result<Self> {
        let header = encode_header(roots)?;
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            written: header.len() as u64,
        })
    }

    pub fn write_block(&mut self, block: &CarBlock) -> io::Result<()> {
        block.write(&mut self.inner)?;
        self.written += block.frame_len();
        Ok(())
    }

    /// Appends records that were already framed with [`CarBlock::write`].
    pub fn write_framed(&mut self, framed: &mut impl Read) -> io::Result<()> {
        self.written += io::copy(framed, &mut self.inner)?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}

/// Serializes `roots` and `blocks` into an in-memory archive.
pub fn encode<'a>(
    roots: &[Cid],
    blocks: impl IntoIterator<Item = &'a CarBlock>,
) -> Result<Vec<u8>> {
    if roots.is_empty() {
        return Err(Error::Format("a CAR header needs at least one root".into()));
    }
    let mut writer = CarWriter::new(Vec::new(), roots).map_err(|e| Error::Format(e.to_string()))?;
    for block in blocks {
        writer
            .write_block(block)
            .map_err(|e| Error::Format(e.to_string()))?;
    }
    Ok(writer.inner)
}

/// Decodes an in-memory archive.
pub fn decode(bytes: &[u8]) -> Result<CarArchive<&[u8]>> {
    CarArchive::new(bytes)
}

/// Returns the payload of the frame starting at `pos` and the offset of the
/// next frame, or `None` at the end of the buffer.
fn read_frame(bytes: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>> {
    if pos == bytes.len() {
        return Ok(None);
    }
    let (len, prefix) = u64::decode_var(&bytes[pos..])
        .ok_or_else(|| Error::Format(format!("truncated length prefix at offset {pos}")))?;
    if len == 0 {
        return Err(Error::Format(format!("empty frame at offset {pos}")));
    }
    let start = pos + prefix;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            Error::Format(format!(
                "frame at offset {pos} declares {len} bytes but only {} remain",
                bytes.len() - start
            ))
        })?;
    Ok(Some((&bytes[start..end], end)))
}

/// A decoded archive: its header plus an index from CID to payload.
///
/// Every block is verified against its CID while indexing.
pub struct CarArchive<B> {
    header: CarV1Header,
    buf: B,
    index: CidHashMap<Range<usize>>,
    order: Vec<Cid>,
}

impl<B: AsRef<[u8]>> CarArchive<B> {
    pub fn new(buf: B) -> Result<Self> {
        let bytes = buf.as_ref();
        let (header_frame, mut pos) =
            read_frame(bytes, 0)?.ok_or_else(|| Error::Format("missing CAR header".into()))?;
        let header: CarV1Header = from_slice(header_frame)
            .map_err(|e| Error::Format(format!("invalid header block: {e}")))?;
        if header.version != CAR_VERSION {
            return Err(Error::Format(format!(
                "CAR file version must be {CAR_VERSION}, got {}",
                header.version
            )));
        }
        if header.roots.is_empty() {
            return Err(Error::Format("empty CAR file".into()));
        }

        let mut index = CidHashMap::default();
        let mut order = Vec::new();
        while let Some((frame, next)) = read_frame(bytes, pos)? {
            let mut cursor = io::Cursor::new(frame);
            let cid = Cid::read_bytes(&mut cursor)
                .map_err(|e| Error::Format(format!("invalid CID at offset {pos}: {e}")))?;
            let cid_len = cursor.position() as usize;
            validate_block(&cid, &frame[cid_len..])?;
            let payload = next - frame.len() + cid_len..next;
            // duplicates are legal; the first occurrence wins
            if let Entry::Vacant(entry) = index.entry(cid) {
                entry.insert(payload);
                order.push(cid);
            }
            pos = next;
        }

        Ok(Self {
            header,
            buf,
            index,
            order,
        })
    }

    pub fn header(&self) -> &CarV1Header {
        &self.header
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        let range = self.index.get(cid)?;
        Some(&self.buf.as_ref()[range.clone()])
    }

    /// Number of distinct blocks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Blocks in archive order.
    pub fn blocks(&self) -> impl Iterator<Item = (&Cid, &[u8])> + '_ {
        self.order.iter().filter_map(|cid| Some((cid, self.get(cid)?)))
    }
}

impl CarArchive<Mmap> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_path(path)?;
        if file.metadata().with_path(path)?.len() == 0 {
            return Err(Error::Format(format!("{} is empty", path.display())));
        }
        // SAFETY: archives are written once and not modified while they are read.
        let mmap = unsafe { Mmap::map(&file) }.with_path(path)?;
        Self::new(mmap)
    }
}

impl<B: AsRef<[u8]>> BlockSource for CarArchive<B> {
    fn block(&self, cid: &Cid) -> Option<&[u8]> {
        self.get(cid)
    }
}
