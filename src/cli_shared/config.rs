// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::chunk::DEFAULT_SLICE_SIZE;
use crate::utils::io::read_toml;

/// Persistent settings of the `chunk` command. The loop driver bumps
/// `slice_size` after every run and writes the file back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ChunkConfig {
    #[default(DEFAULT_SLICE_SIZE)]
    pub slice_size: u64,
    /// Filler appended to every slice.
    pub extra_file_path: Option<PathBuf>,
    /// Archive bytes of filler per slice; required with `extra_file_path`.
    pub extra_file_slice_size: Option<u64>,
}

impl ChunkConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let toml = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        read_toml(&toml).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml = toml::to_string(self)?;
        std::fs::write(path, toml)
            .with_context(|| format!("writing config file {}", path.display()))
    }

    /// The filler path and its per-slice quota, if filler is configured.
    pub fn extra(&self) -> anyhow::Result<Option<(&Path, u64)>> {
        match (&self.extra_file_path, self.extra_file_slice_size) {
            (None, _) => Ok(None),
            (Some(path), Some(quota)) => Ok(Some((path, quota))),
            (Some(_), None) => anyhow::bail!(
                "extra_file_slice_size is required when extra_file_path is set"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: ChunkConfig = read_toml("").unwrap();
        assert_eq!(config, ChunkConfig::default());
        assert_eq!(config.slice_size, DEFAULT_SLICE_SIZE);
        assert!(config.extra().unwrap().is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ChunkConfig {
            slice_size: 1024,
            extra_file_path: Some(dir.path().join("filler")),
            extra_file_slice_size: Some(256),
        };
        config.save(&path).unwrap();
        let loaded = ChunkConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.extra().unwrap().unwrap().1, 256);
    }

    #[test]
    fn extra_path_needs_a_quota() {
        let config: ChunkConfig =
            read_toml("slice_size = 10\nextra_file_path = \"/tmp/x\"\n").unwrap();
        assert!(config.extra().is_err());
    }
}
