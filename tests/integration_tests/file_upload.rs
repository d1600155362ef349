// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use serde_json::{Value, json};
use serial_test::serial;

use crate::integration_tests::common::{send_and_close, start_server};

fn journal_lines(raw: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).expect("journal line must be JSON"))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn uploads_a_file_and_journals_it() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let body = vec![0x5Au8; 1234];
    let mut request = b"FILE {\"store_as\":\"shots/0001.jpg\"}\n".to_vec();
    request.extend_from_slice(&body);

    let mut stream = harness.connect().await?;
    let replies = send_and_close(&mut stream, &request).await?;
    assert!(replies.is_empty(), "the server never writes back on FILE");

    let stored =
        tokio::fs::read(harness.task_dir(7).join("shots/0001.jpg")).await?;
    assert_eq!(stored, body);

    let journal = tokio::fs::read(harness.task_dir(7).join("files.json")).await?;
    let lines = journal_lines(&journal);
    assert_eq!(lines.len(), 1);
    assert_eq!(
        lines[0],
        json!({"path": "shots/0001.jpg", "filepath": null, "pids": []})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn second_upload_to_the_same_path_is_refused() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let original = vec![0xA5u8; 1234];
    let mut request = b"FILE {\"store_as\":\"shots/0001.jpg\"}\n".to_vec();
    request.extend_from_slice(&original);
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &request).await?;

    let mut second = b"FILE {\"store_as\":\"shots/0001.jpg\"}\n".to_vec();
    second.extend_from_slice(b"overwriting content");
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &second).await?;

    let stored =
        tokio::fs::read(harness.task_dir(7).join("shots/0001.jpg")).await?;
    assert_eq!(stored, original, "the first upload must stay intact");

    let journal = tokio::fs::read(harness.task_dir(7).join("files.json")).await?;
    assert_eq!(journal_lines(&journal).len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn oversized_upload_is_truncated_with_marker() -> Result<()> {
    let harness = start_server(10).await?;
    harness.register_task(7).await?;

    let body: Vec<u8> = (0u8..100).collect();
    let mut request = b"FILE {\"store_as\":\"buffer/huge.bin\"}\n".to_vec();
    request.extend_from_slice(&body);
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &request).await?;

    let mut expected = body[..10].to_vec();
    expected.extend_from_slice(b"... (truncated)");
    let stored =
        tokio::fs::read(harness.task_dir(7).join("buffer/huge.bin")).await?;
    assert_eq!(stored, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn banned_path_creates_nothing() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut stream = harness.connect().await?;
    send_and_close(
        &mut stream,
        b"FILE {\"store_as\":\"../etc/passwd\"}\nroot:x:0:0\n",
    )
    .await?;

    assert!(!harness.task_dir(7).join("files.json").exists());
    assert!(!harness.task_dir(7).parent().expect("root").join("etc").exists());

    // Tear-down still works after the refused upload.
    harness.server.del_task(7, crate::integration_tests::common::LOCAL_IP);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn legacy_v1_upload_reads_the_path_line() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut request = b"FILE\nshots/legacy.jpg\n".to_vec();
    request.extend_from_slice(b"v1 body bytes");
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &request).await?;

    let stored =
        tokio::fs::read(harness.task_dir(7).join("shots/legacy.jpg")).await?;
    assert_eq!(stored, b"v1 body bytes");

    let journal = tokio::fs::read(harness.task_dir(7).join("files.json")).await?;
    assert_eq!(
        journal_lines(&journal)[0],
        json!({"path": "shots/legacy.jpg", "filepath": null, "pids": []})
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn legacy_v2_upload_reads_three_header_lines() -> Result<()> {
    let harness = start_server(10 * 1024 * 1024).await?;
    harness.register_task(7).await?;

    let mut request =
        b"FILE 2\nfiles/v2.bin\nC:\\Users\\victim\\v2.bin\n123,456\n".to_vec();
    request.extend_from_slice(b"v2 body bytes");
    let mut stream = harness.connect().await?;
    send_and_close(&mut stream, &request).await?;

    let stored = tokio::fs::read(harness.task_dir(7).join("files/v2.bin")).await?;
    assert_eq!(stored, b"v2 body bytes");

    let journal = tokio::fs::read(harness.task_dir(7).join("files.json")).await?;
    assert_eq!(
        journal_lines(&journal)[0],
        json!({
            "path": "files/v2.bin",
            "filepath": "C:\\Users\\victim\\v2.bin",
            "pids": [123, 456]
        })
    );
    Ok(())
}
