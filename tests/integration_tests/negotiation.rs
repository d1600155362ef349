// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use serial_test::serial;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::timeout,
};

use crate::integration_tests::common::{send_and_close, start_server};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn unknown_command_is_closed_silently() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut stream = harness.connect().await?;
    let replies = send_and_close(&mut stream, b"SNIFF {\"x\":1}\n").await?;
    assert!(replies.is_empty(), "nothing is ever sent back");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn malformed_header_is_closed_silently() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut stream = harness.connect().await?;
    let replies = send_and_close(&mut stream, b"FILE {broken json\n").await?;
    assert!(replies.is_empty());
    assert!(!harness.task_dir(7).join("files.json").exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn overlong_negotiation_line_drops_the_connection() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    // Exactly the line cap, and still no newline in sight.
    let mut stream = harness.connect().await?;
    stream.write_all(&vec![b'A'; 4096]).await?;

    // The server must hang up on its own while we keep the socket open.
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
    match read {
        Ok(Ok(0)) => {},
        Ok(Ok(n)) => panic!("unexpected {n} reply bytes"),
        Ok(Err(_)) => {},
        Err(_) => panic!("server kept an overlong line pending"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn unregistered_source_address_is_turned_away() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    // No task registered for the loopback address.

    let mut stream = harness.connect().await?;
    let replies =
        send_and_close(&mut stream, b"FILE {\"store_as\":\"shots/x.jpg\"}\n")
            .await?;
    assert!(replies.is_empty());
    Ok(())
}
