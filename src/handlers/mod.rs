//! Negotiation of the netlog sub-protocols and their handlers.
//!
//! Every connection opens with one line, `<COMMAND>[ <json-header>]\n`,
//! after which the channel belongs to the selected handler until the peer
//! (or a task tear-down) closes it.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod bson_store;
pub mod file_upload;
pub mod log_stream;
pub mod realtime;

use anyhow::Result;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    errors::NetlogError,
    handlers::{
        bson_store::BsonStore, file_upload::FileUpload, log_stream::LogStream,
        realtime::RealtimeRelay,
    },
    server::session::Session,
};

/// The four sub-protocols a VM agent may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    File,
    Log,
    Bson,
    Realtime,
}

impl CommandKind {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "FILE" => Self::File,
            "LOG" => Self::Log,
            "BSON" => Self::Bson,
            "REALTIME" => Self::Realtime,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::File => "FILE",
            Self::Log => "LOG",
            Self::Bson => "BSON",
            Self::Realtime => "REALTIME",
        }
    }
}

/// Why a negotiation line was refused.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("unknown netlog protocol requested: {0:?}")]
    UnknownCommand(String),
    #[error("invalid netlog header: {0:?}")]
    BadHeader(String),
}

/// Splits the first connection line into command and optional JSON header.
///
/// The header, when present, must parse as JSON. Old monitor builds send a
/// bare integer as the `BSON` header; it is wrapped into `{"pid": n}` here
/// so the handler sees one shape.
pub fn parse_negotiation(
    line: &str,
) -> Result<(CommandKind, Option<Value>), NegotiationError> {
    let (name, raw_header) = match line.split_once(' ') {
        Some((name, raw)) => (name, Some(raw)),
        None => (line, None),
    };

    let command = CommandKind::from_name(name)
        .ok_or_else(|| NegotiationError::UnknownCommand(name.to_string()))?;

    let header = match raw_header {
        None => None,
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|_| NegotiationError::BadHeader(raw.to_string()))?;
            if command == CommandKind::Bson && !raw.trim_start().starts_with('{') {
                Some(json!({ "pid": value }))
            } else {
                Some(value)
            }
        },
    };

    Ok((command, header))
}

/// A negotiated sub-protocol with its per-connection state. The variant's
/// output file (if any) is released when the value is dropped, whatever the
/// exit path was.
pub enum Protocol {
    File(FileUpload),
    Log(LogStream),
    Bson(BsonStore),
    Realtime(RealtimeRelay),
}

impl Protocol {
    pub async fn handle(&mut self, ctx: &mut Session) -> Result<()> {
        match self {
            Protocol::File(h) => h.handle(ctx).await,
            Protocol::Log(h) => h.handle(ctx).await,
            Protocol::Bson(h) => h.handle(ctx).await,
            Protocol::Realtime(h) => h.handle(ctx).await,
        }
    }

    /// The resolved header of a `FILE` upload; relayed to the dispatcher as
    /// a response envelope when the upload carried a `rid`.
    pub fn header(&self) -> Option<&Value> {
        match self {
            Protocol::File(h) => h.header(),
            _ => None,
        }
    }
}

/// Reads the negotiation line and selects a handler.
///
/// `Ok(None)` means the connection should simply be closed: the peer went
/// away first, asked for something unknown, or sent a malformed header.
/// Nothing is ever written back.
pub async fn negotiate(ctx: &mut Session) -> Result<Option<Protocol>> {
    let line = match ctx.conn.read_line().await {
        Ok(line) => line,
        Err(NetlogError::EndOfStream) => {
            debug!("task #{}: peer closed before negotiation", ctx.task_id);
            return Ok(None);
        },
        Err(e) => return Err(e.into()),
    };

    let (command, header) = match parse_negotiation(&line) {
        Ok(parsed) => parsed,
        Err(e @ NegotiationError::UnknownCommand(_)) => {
            warn!("task #{}: {e}, terminating connection", ctx.task_id);
            return Ok(None);
        },
        Err(e @ NegotiationError::BadHeader(_)) => {
            error!("task #{}: {e}", ctx.task_id);
            return Ok(None);
        },
    };

    ctx.command = Some(command.name());
    let protocol = match command {
        CommandKind::File => Protocol::File(FileUpload::new(header)),
        CommandKind::Log => Protocol::Log(LogStream::new()),
        CommandKind::Bson => Protocol::Bson(BsonStore::new(header)),
        CommandKind::Realtime => Protocol::Realtime(RealtimeRelay::new()),
    };
    Ok(Some(protocol))
}
