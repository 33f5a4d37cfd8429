// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{ArgAction, Args};
use human_repr::HumanCount as _;
use tracing::info;

use crate::callback::Callback;
use crate::chunk::{
    ChunkOptions, DEFAULT_PARALLELISM, DEFAULT_SLICE_SIZE, ExtraFileSource, chunk,
};
use crate::cli_shared::config::ChunkConfig;
use crate::dag::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LINKS, DagParams};
use crate::utils::multihash::MultihashCode;

/// Pause between two runs of `--loop`.
const LOOP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Args)]
pub struct ChunkCommand {
    /// File or directory to chunk
    input: PathBuf,
    /// Number of threads building file DAGs
    #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
    parallel: usize,
    /// Graph name, the prefix of every archive name
    #[arg(long)]
    graph_name: String,
    /// Output directory for the CAR files; must exist
    #[arg(long)]
    car_dir: PathBuf,
    /// Record paths relative to this directory (default: the parent of the input)
    #[arg(long)]
    parent_path: Option<PathBuf>,
    /// Target archive size in bytes, unless a config file is given
    #[arg(long, default_value_t = DEFAULT_SLICE_SIZE)]
    slice_size: u64,
    /// Write a `manifest.csv` mapping payload CIDs to archive names
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    save_manifest: bool,
    /// Also compute piece CIDs and sizes into the manifest
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    calc_commp: bool,
    /// Rename every archive to `<piece-cid>.car`; needs `--calc-commp`
    #[arg(long)]
    rename: bool,
    /// Record random names instead of the source file names
    #[arg(long)]
    random_rename_source_file: bool,
    /// Pad every archive to its unpadded piece size; needs `--calc-commp`
    #[arg(long)]
    add_padding: bool,
    /// TOML config with `slice_size`, `extra_file_path` and `extra_file_slice_size`
    #[arg(long)]
    config: Option<PathBuf>,
    /// Chunk again every minute, growing the slice size by one byte each run
    #[arg(long = "loop")]
    repeat: bool,
    /// Visit files in random order
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    random_select_file: bool,
    /// Maximum leaf size in bytes
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,
    /// Maximum number of links per internal node
    #[arg(long, default_value_t = DEFAULT_MAX_LINKS)]
    max_links: usize,
    /// Hash function of block CIDs
    #[arg(long, default_value = "sha2-256")]
    hash: MultihashCode,
}

impl ChunkCommand {
    fn callback(&self) -> Callback {
        if self.calc_commp {
            Callback::compute_commitment(&self.car_dir, self.rename, self.add_padding)
        } else if self.save_manifest {
            Callback::record_manifest(&self.car_dir)
        } else {
            Callback::PropagateErrorOnly
        }
    }

    fn options(&self, slice_size: u64, graph_name: String) -> ChunkOptions {
        ChunkOptions {
            input: self.input.clone(),
            parent_path: self.parent_path.clone(),
            output_dir: self.car_dir.clone(),
            slice_size,
            parallelism: self.parallel,
            graph_name,
            random_rename: self.random_rename_source_file,
            random_select: self.random_select_file,
            dag: DagParams {
                chunk_size: self.chunk_size,
                max_links: self.max_links,
                hasher: self.hash,
            },
        }
    }

    /// Grows the slice size of a loop run by one byte and persists it.
    fn advance(&self, config: &mut ChunkConfig) -> anyhow::Result<()> {
        config.slice_size += 1;
        if let Some(path) = &self.config {
            config.save(path)?;
        }
        info!("slice size is now {}", config.slice_size);
        Ok(())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => ChunkConfig::load(path)?,
            None => ChunkConfig {
                slice_size: self.slice_size,
                ..Default::default()
            },
        };
        info!("chunk config: {config:?}");
        let mut extra = match config.extra()? {
            Some((path, quota)) => Some(
                ExtraFileSource::new(path, quota)
                    .with_context(|| format!("indexing extra files under {}", path.display()))?,
            ),
            None => None,
        };
        let callback = Arc::new(self.callback());

        loop {
            if self.repeat {
                self.advance(&mut config)?;
            }
            // every run of a loop gets its own archive names
            let graph_name = match self.repeat {
                true => format!("{}-{}", self.graph_name, config.slice_size),
                false => self.graph_name.clone(),
            };
            let options = self.options(config.slice_size, graph_name);
            let task_callback = Arc::clone(&callback);
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = chunk(&options, &*task_callback, extra.as_mut());
                (extra, result)
            })
            .await?;
            extra = returned;
            let summary = result.context("chunking failed")?;
            println!(
                "{} file(s) chunked into {} archive(s), {}",
                summary.files,
                summary.slices.len(),
                summary.payload_size().human_count_bytes()
            );

            if !self.repeat {
                return Ok(());
            }
            info!("next run in {}s", LOOP_INTERVAL.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(LOOP_INTERVAL) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }
}
