// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;

use crate::commp::compute_file_commitment;

#[derive(Debug, Args)]
pub struct CommPCommand {
    /// CAR file
    path: PathBuf,
    /// Rename the file to `<piece-cid>.car`
    #[arg(long)]
    rename: bool,
    /// Pad the file with zeros to its unpadded piece size
    #[arg(long)]
    add_padding: bool,
}

impl CommPCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            path,
            rename,
            add_padding,
        } = self;
        let commp = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || compute_file_commitment(&path, add_padding))
                .await??
        };
        if rename {
            let renamed = path.with_file_name(format!("{}.car", commp.piece_cid));
            std::fs::rename(&path, &renamed)
                .with_context(|| format!("renaming {} to {}", path.display(), renamed.display()))?;
        }
        println!("PieceCID: {}, PieceSize: {}", commp.piece_cid, commp.piece_size);
        Ok(())
    }
}
