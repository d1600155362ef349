// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::{io::AsyncWriteExt, net::tcp::OwnedWriteHalf, sync::Mutex};

/// The capability the core exposes to the real-time machinery of the wider
/// product. The core never interprets the messages it relays; it only
/// notifies the dispatcher when a `REALTIME` channel comes up and hands it
/// every inbound JSON object (plus the response envelope of a `FILE` upload
/// that carried a `rid`).
///
/// Keeping this a two-method trait lets tests substitute a recording double
/// for the real dispatcher.
pub trait RealtimeDispatcher: Send + Sync {
    /// Called exactly once when the `REALTIME` channel for the task has been
    /// established. `outbound` is the write path back into the VM and stays
    /// valid until the connection goes away.
    fn start(&self, outbound: RealtimeOutbound);

    /// Called for every inbound line on the `REALTIME` channel.
    fn on_message(&self, message: Value);
}

pub type SharedDispatcher = Arc<dyn RealtimeDispatcher>;

/// Write half of a VM connection, handed to the dispatcher so it can push
/// correlated replies back into the guest.
#[derive(Clone, Debug)]
pub struct RealtimeOutbound {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl RealtimeOutbound {
    pub(crate) fn new(writer: Arc<Mutex<OwnedWriteHalf>>) -> Self {
        Self { writer }
    }

    /// Queues the whole buffer on the socket; completes only once every byte
    /// has been accepted by the kernel.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(data).await?;
        w.flush().await?;
        Ok(())
    }
}
