// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Split a directory tree into size-bounded CAR slices, restore the tree from
//! those slices, and compute the Filecoin piece commitment of each slice.

pub mod callback;
pub mod car;
pub mod chunk;
mod cli;
mod cli_shared;
pub mod commp;
pub mod dag;
pub mod error;
pub mod manifest;
pub mod restore;
pub mod utils;

pub use callback::{Callback, SealedSlice, SliceCallback};
pub use chunk::{ChunkOptions, ChunkSummary, ExtraFileSource, MAX_PIECE_PAYLOAD, chunk};
pub use cli::main::main as graphsplit_main;
pub use commp::{PieceCommitment, compute_commitment, compute_file_commitment};
pub use dag::DagParams;
pub use error::{Error, Failure, Result};
pub use restore::{MergeSummary, RestoreSummary, merge, restore};
