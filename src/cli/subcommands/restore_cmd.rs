// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use clap::Args;
use human_repr::HumanCount as _;

use crate::restore::{merge, restore};

#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// Source CAR file, or a directory of CAR files
    #[arg(long)]
    car_path: PathBuf,
    /// Directory to restore into
    #[arg(long)]
    output_dir: PathBuf,
    /// Number of archives restored at a time
    #[arg(long, default_value_t = 4)]
    parallel: usize,
}

impl RestoreCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            car_path,
            output_dir,
            parallel,
        } = self;
        let (restored, merged) = tokio::task::spawn_blocking(move || {
            let restored = restore(&car_path, &output_dir, parallel)?;
            let merged = merge(&output_dir, parallel)?;
            anyhow::Ok((restored, merged))
        })
        .await??;
        println!(
            "restored {} archive(s): {} file(s), {} merged from {} fragment(s), {}",
            restored.archives,
            restored.files + merged.files,
            merged.files,
            merged.fragments,
            restored.bytes.human_count_bytes()
        );
        Ok(())
    }
}
