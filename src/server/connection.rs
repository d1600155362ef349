// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, sync::Arc, time::Duration};

use bytes::{Buf, Bytes, BytesMut};
use tokio::{
    io::AsyncReadExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{errors::NetlogError, storage::sink::ArtifactSink};

/// Maximum line length to read for netlog messages, to avoid memory
/// exhaustion.
pub const MAX_NETLOG_LINE: usize = 4 * 1024;

/// Upper bound on a single recv.
pub const BUFSIZE: usize = 16 * 1024;

/// One VM connection, split into a buffered read side and a shared write
/// side.
///
/// The read side keeps a carry buffer so surplus bytes from a recv that
/// crossed a framing boundary are preserved for the next call. Cancellation
/// is cooperative: once the token fires, every pending or subsequent read
/// resolves to a clean end-of-stream, so copy loops drain out on their own.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    cancel: CancellationToken,
    buf: BytesMut,
    line_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(stream: TcpStream, cancel: CancellationToken) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            cancel,
            buf: BytesMut::with_capacity(MAX_NETLOG_LINE),
            line_timeout: None,
        }
    }

    /// Shared handle to the write half, for dispatcher-originated replies.
    pub fn writer(&self) -> Arc<Mutex<OwnedWriteHalf>> {
        Arc::clone(&self.writer)
    }

    /// Applies a timeout to subsequent `read_line` calls. `None` removes it.
    /// Body transfers are never subject to it.
    pub fn set_line_timeout(&mut self, wait: Option<Duration>) {
        self.line_timeout = wait;
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// One recv of at most [`BUFSIZE`] bytes. Clean close, reset-by-peer and
    /// cancellation all surface as `None`; every other I/O error propagates.
    pub async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut chunk = BytesMut::with_capacity(BUFSIZE);
        let read = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(None),
            res = self.reader.read_buf(&mut chunk) => res,
        };
        match read {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(chunk.freeze())),
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                debug!("connection reset by peer");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Reads until the next newline character, but never more than
    /// [`MAX_NETLOG_LINE`] bytes. The newline is not included.
    pub async fn read_line(&mut self) -> Result<String, NetlogError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos);
                self.buf.advance(1);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.buf.len() >= MAX_NETLOG_LINE {
                return Err(NetlogError::LineTooLong);
            }

            let chunk = match self.line_timeout {
                Some(wait) => {
                    timeout(wait, self.read_chunk()).await.map_err(|_| {
                        NetlogError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "timed out waiting for netlog line",
                        ))
                    })??
                },
                None => self.read_chunk().await?,
            };
            match chunk {
                Some(c) => self.buf.extend_from_slice(&c),
                None => return Err(NetlogError::EndOfStream),
            }
        }
    }

    /// Atomically returns and clears the carry buffer.
    pub fn drain(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Streams the remainder of the connection into `sink`: drained
    /// carry-over first, then chunk by chunk until end-of-stream.
    pub async fn copy_to<S: ArtifactSink>(&mut self, sink: &mut S) -> io::Result<()> {
        let carried = self.drain();
        if !carried.is_empty() {
            sink.write(&carried).await?;
        }
        while let Some(chunk) = self.read_chunk().await? {
            sink.write(&chunk).await?;
        }
        sink.flush().await
    }
}
