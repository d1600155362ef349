// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, path::Path};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};

use crate::storage::paths::RESULT_DIRECTORIES;

/// Opens a file with O_CREAT|O_EXCL|O_WRONLY, failing if it already exists.
///
/// Exclusive creation is the single-writer guarantee for artifacts and the
/// live log; it holds across process restarts because the coordination
/// lives in the filesystem, not in this process.
pub async fn open_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

/// Scaffolds the result directory tree for one task.
///
/// Called by the orchestrator before any VM traffic arrives. Tolerates
/// directories that already exist, so concurrent creation is harmless.
pub async fn create_task_dirs(root: &Path) -> Result<()> {
    for dir in RESULT_DIRECTORIES {
        let folder = root.join(dir);
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("unable to create folder: {folder:?}"))?;
    }
    Ok(())
}
