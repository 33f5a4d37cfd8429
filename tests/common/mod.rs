// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use assert_cmd::{Command, cargo::cargo_bin_cmd};

pub fn graphsplit() -> Command {
    let mut cmd = cargo_bin_cmd!("graphsplit");
    cmd.arg("--color").arg("never");
    cmd
}

/// A small tree with one file large enough to span several slices.
pub fn create_dataset(root: &Path) -> PathBuf {
    let data = root.join("dataset");
    std::fs::create_dir_all(data.join("docs/deep")).unwrap();
    std::fs::write(data.join("hello.txt"), b"hello from graphsplit\n").unwrap();
    std::fs::write(data.join("docs/empty"), b"").unwrap();
    std::fs::write(data.join("docs/deep/notes.md"), b"# notes\n").unwrap();
    let blob: Vec<u8> = (0..40_000u32).map(|i| (i * 31 % 257) as u8).collect();
    std::fs::write(data.join("docs/blob.bin"), blob).unwrap();
    data
}

/// Relative path to contents of every regular file under `root`.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

pub fn car_files(dir: &Path) -> Vec<PathBuf> {
    let mut cars: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "car"))
        .collect();
    cars.sort();
    cars
}
