// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ffi::OsString;

use clap::Parser as _;

use super::subcommands::{Cli, Subcommand};
use crate::cli_shared::logger::setup_minimal_logger;

pub fn main<ArgT>(args: impl IntoIterator<Item = ArgT>) -> anyhow::Result<()>
where
    ArgT: Into<OsString> + Clone,
{
    // Capture Cli inputs
    let Cli { color, cmd } = Cli::parse_from(args);
    setup_minimal_logger(&color);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            match cmd {
                Subcommand::Chunk(cmd) => cmd.run().await,
                Subcommand::Restore(cmd) => cmd.run().await,
                Subcommand::CommP(cmd) => cmd.run().await,
            }
        })
}
