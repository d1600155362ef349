// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use thiserror::Error;

/// Per-connection failures of the netlog protocol.
///
/// Every variant closes the offending connection and leaves the rest of the
/// server untouched; nothing here ever propagates to the accept loop.
#[derive(Debug, Error)]
pub enum NetlogError {
    /// The peer sent more than `MAX_NETLOG_LINE` bytes without a newline.
    #[error("received overly long line")]
    LineTooLong,

    /// The peer closed the stream cleanly before a newline arrived.
    #[error("peer closed the stream before a newline")]
    EndOfStream,

    /// The client requested a path outside the upload whitelist, or a
    /// filename carrying banned bytes.
    #[error("client requested banned path: {0:?}")]
    PathRejected(String),

    /// A `FILE` header without a usable `store_as` entry.
    #[error("no store_as path specified for file upload")]
    MissingStoreAs,

    /// The destination of a `FILE` upload already exists on disk.
    #[error("client tried to overwrite an existing file: {0:?}")]
    Overwrite(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NetlogError {
    /// Transport-level endings (clean close, reset, cancellation) are logged
    /// at debug; everything else is a protocol or resource failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetlogError::EndOfStream)
    }
}
