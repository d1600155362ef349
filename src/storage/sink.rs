// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
};
use tracing::warn;

/// Appended exactly once to an upload that ran past its byte budget.
pub const TRUNCATED_MARKER: &[u8] = b"... (truncated)";

/// Destination of a body transfer. Handlers stream received chunks through
/// this seam so the same copy loop serves plain files and capped uploads.
pub trait ArtifactSink {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

impl ArtifactSink for File {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move { AsyncWriteExt::write_all(self, buf).await }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { AsyncWriteExt::flush(self).await }
    }
}

/// Wraps a sink with a running byte budget.
///
/// Bytes past the budget are dropped, the [`TRUNCATED_MARKER`] is written
/// once, and a single warning is logged. Truncation is a normal outcome:
/// the transfer still completes and `flush` never fails because of it.
#[derive(Debug)]
pub struct WriteLimiter<W> {
    fd: W,
    remain: u64,
    written: u64,
    warned: bool,
}

impl<W: AsyncWrite + Unpin + Send> WriteLimiter<W> {
    pub fn new(fd: W, remain: u64) -> Self {
        Self {
            fd,
            remain,
            written: 0,
            warned: false,
        }
    }

    /// Body bytes that actually reached the sink (marker excluded).
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl<W: AsyncWrite + Unpin + Send> ArtifactSink for WriteLimiter<W> {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            let size = buf.len() as u64;
            let take = size.min(self.remain);
            if take > 0 {
                self.fd.write_all(&buf[..take as usize]).await?;
                self.remain -= take;
                self.written += take;
            }
            if size > 0 && take != size && !self.warned {
                warn!(
                    "uploaded file length larger than upload_max_size, stopping \
                     upload"
                );
                self.fd.write_all(TRUNCATED_MARKER).await?;
                self.warned = true;
            }
            Ok(())
        }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { self.fd.flush().await }
    }
}
