// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use netlog_server_rs::storage::sink::{ArtifactSink, TRUNCATED_MARKER, WriteLimiter};
use tempfile::tempdir;
use tokio::fs::File;

async fn scratch_file(dir: &tempfile::TempDir, name: &str) -> Result<File> {
    Ok(File::create(dir.path().join(name)).await?)
}

#[tokio::test]
async fn under_cap_writes_everything() -> Result<()> {
    let dir = tempdir()?;
    let fd = scratch_file(&dir, "under.bin").await?;

    let mut sink = WriteLimiter::new(fd, 100);
    sink.write(b"0123456789").await?;
    sink.flush().await?;
    assert_eq!(sink.written(), 10);

    let on_disk = tokio::fs::read(dir.path().join("under.bin")).await?;
    assert_eq!(on_disk, b"0123456789");
    Ok(())
}

#[tokio::test]
async fn exact_cap_leaves_no_marker() -> Result<()> {
    let dir = tempdir()?;
    let fd = scratch_file(&dir, "exact.bin").await?;

    let mut sink = WriteLimiter::new(fd, 10);
    sink.write(b"0123456789").await?;
    sink.flush().await?;

    let on_disk = tokio::fs::read(dir.path().join("exact.bin")).await?;
    assert_eq!(on_disk, b"0123456789");
    Ok(())
}

#[tokio::test]
async fn overflow_is_truncated_and_marked_once() -> Result<()> {
    let dir = tempdir()?;
    let fd = scratch_file(&dir, "over.bin").await?;

    let mut sink = WriteLimiter::new(fd, 10);
    sink.write(b"0123456").await?;
    sink.write(b"789abcdef").await?;
    sink.write(b"more data past the cap").await?;
    sink.flush().await?;
    assert_eq!(sink.written(), 10);

    let mut expected = b"0123456789".to_vec();
    expected.extend_from_slice(TRUNCATED_MARKER);
    let on_disk = tokio::fs::read(dir.path().join("over.bin")).await?;
    assert_eq!(on_disk, expected);
    Ok(())
}

#[tokio::test]
async fn empty_writes_do_not_trip_the_marker() -> Result<()> {
    let dir = tempdir()?;
    let fd = scratch_file(&dir, "empty.bin").await?;

    let mut sink = WriteLimiter::new(fd, 4);
    sink.write(b"abcd").await?;
    sink.write(b"").await?;
    sink.flush().await?;

    let on_disk = tokio::fs::read(dir.path().join("empty.bin")).await?;
    assert_eq!(on_disk, b"abcd");
    Ok(())
}
