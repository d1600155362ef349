// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::integration_tests::common::{send_and_close, start_server, wait_for};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn realtime_channel_relays_both_ways() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut stream = harness.connect().await?;
    stream.write_all(b"REALTIME\n").await?;

    let rt = harness.rt.clone();
    let started = wait_for(
        {
            let rt = rt.clone();
            move || rt.outbound().is_some()
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(started, "dispatcher must be notified of the new channel");

    // Guest to dispatcher.
    stream
        .write_all(b"{\"type\":\"subscribe\",\"rid\":1}\n")
        .await?;
    let relayed = wait_for(
        {
            let rt = rt.clone();
            move || !rt.messages().is_empty()
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(relayed);
    assert_eq!(rt.messages()[0], json!({"type": "subscribe", "rid": 1}));

    // Dispatcher to guest.
    let outbound = rt.outbound().context("outbound must be set")?;
    outbound.send(b"{\"rid\":1,\"success\":true}\n").await?;

    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    while stream.read(&mut byte).await? == 1 {
        reply.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    assert_eq!(reply, b"{\"rid\":1,\"success\":true}\n");

    stream.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn file_upload_with_rid_emits_a_response_envelope() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut request =
        b"FILE {\"store_as\":\"memory/block.dmp\",\"rid\":42,\"pids\":[9]}\n"
            .to_vec();
    request.extend_from_slice(b"memory dump bytes");
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &request).await?;

    let rt = harness.rt.clone();
    let delivered = wait_for(
        {
            let rt = rt.clone();
            move || !rt.messages().is_empty()
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(delivered, "the header envelope must reach the dispatcher");
    assert_eq!(
        rt.messages()[0],
        json!({"store_as": "memory/block.dmp", "rid": 42, "pids": [9]})
    );
    Ok(())
}
