// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io::{self, Read};
use std::path::Path;

/// Converts a TOML file represented as a string to `S`
///
/// # Example
/// ```
/// use serde::Deserialize;
/// use graphsplit::utils::io::read_toml;
///
/// #[derive(Deserialize)]
/// struct Config {
///     slice_size: u64
/// };
///
/// let toml_string = "slice_size = 1024\n";
/// let config: Config = read_toml(toml_string).unwrap();
/// assert_eq!(config.slice_size, 1024);
/// ```
pub fn read_toml<S>(toml_string: &str) -> anyhow::Result<S>
where
    for<'de> S: serde::de::Deserialize<'de>,
{
    let new_struct: S = toml::from_str(toml_string)?;
    Ok(new_struct)
}

/// Reads up to `limit` bytes into `buf`, retrying short reads.
/// Returns the number of bytes read; fewer than requested means end of input.
pub fn read_chunk(reader: &mut impl Read, buf: &mut Vec<u8>, limit: u64) -> io::Result<usize> {
    buf.clear();
    reader.by_ref().take(limit).read_to_end(buf)
}

/// Returns `true` if `path` is an existing directory.
pub fn exist_dir(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_dir()
}
