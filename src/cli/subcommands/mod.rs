// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod chunk_cmd;
mod commp_cmd;
mod restore_cmd;

use clap::Parser;

use crate::utils::misc::LoggingColor;
pub(super) use self::{
    chunk_cmd::ChunkCommand, commp_cmd::CommPCommand, restore_cmd::RestoreCommand,
};

/// Command-line options for the `graphsplit` binary
#[derive(Parser)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    author = env!("CARGO_PKG_AUTHORS"),
    version,
    about = env!("CARGO_PKG_DESCRIPTION")
)]
pub struct Cli {
    /// Colorize log output: `always`, `auto` or `never`
    #[arg(long, default_value = "auto", global = true)]
    pub color: LoggingColor,
    #[command(subcommand)]
    pub cmd: Subcommand,
}

/// graphsplit sub-commands
#[derive(clap::Subcommand)]
pub enum Subcommand {
    /// Generate CAR files of the specified size
    Chunk(ChunkCommand),

    /// Restore files from CAR files
    Restore(RestoreCommand),

    /// Piece CID and piece size calculation
    #[command(name = "commP")]
    CommP(CommPCommand),
}
