// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::{
    rt::{RealtimeOutbound, SharedDispatcher},
    server::{connection::Connection, registry::TaskId},
};

/// Per-connection state: the task binding, the transport, and whatever the
/// negotiated handler learned about the peer.
///
/// A session owns its socket and carry buffer exclusively; the registry only
/// ever touches its cancellation token.
pub struct Session {
    pub task_id: TaskId,
    /// The directory where artifacts of this task are stored.
    pub storage_path: PathBuf,
    pub conn: Connection,
    /// Negotiated sub-protocol name, for diagnostics.
    pub command: Option<&'static str>,
    /// Opaque tag from a `FILE` header; present when the dispatcher expects
    /// a response envelope once the upload finishes.
    pub response_id: Option<Value>,
    /// Dispatcher of the task this session belongs to, captured at accept
    /// time.
    pub rt: SharedDispatcher,
    /// Per-`FILE` byte cap, from configuration.
    pub upload_max_size: u64,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        task_id: TaskId,
        storage_path: PathBuf,
        stream: TcpStream,
        rt: SharedDispatcher,
        upload_max_size: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            task_id,
            storage_path,
            conn: Connection::new(stream, cancel.clone()),
            command: None,
            response_id: None,
            rt,
            upload_max_size,
            cancel,
        }
    }

    /// Token the registry holds so task tear-down can abort this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cooperative abort: every pending or future read on this connection
    /// resolves to a clean end-of-stream. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Write path handed to the realtime dispatcher.
    pub fn outbound(&self) -> RealtimeOutbound {
        RealtimeOutbound::new(self.conn.writer())
    }
}
