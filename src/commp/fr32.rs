// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub const UNPADDED_CHUNK: usize = 127;
pub const PADDED_CHUNK: usize = 128;

/// Spreads 127 input bytes (1016 bits) over four 254-bit field elements,
/// each stored little-endian in 32 bytes with the two high bits cleared.
pub fn fr32_pad(input: &[u8], out: &mut [u8; PADDED_CHUNK]) {
    debug_assert_eq!(input.len(), UNPADDED_CHUNK);

    out[..31].copy_from_slice(&input[..31]);
    let mut t = input[31] >> 6;
    out[31] = input[31] & 0x3f;

    let mut v = 0u8;
    for i in 32..64 {
        v = input[i];
        out[i] = (v << 2) | t;
        t = v >> 6;
    }
    t = v >> 4;
    out[63] &= 0x3f;

    for i in 64..96 {
        v = input[i];
        out[i] = (v << 4) | t;
        t = v >> 4;
    }
    t = v >> 2;
    out[95] &= 0x3f;

    for i in 96..127 {
        v = input[i];
        out[i] = (v << 6) | t;
        t = v >> 2;
    }
    out[127] = t & 0x3f;
}
