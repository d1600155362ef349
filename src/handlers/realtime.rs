// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use serde_json::Value;

use crate::{errors::NetlogError, server::session::Session};

/// The bidirectional control channel between the guest and the realtime
/// dispatcher. The core only routes bytes: inbound lines are parsed as JSON
/// and forwarded, outbound replies come from the dispatcher through the
/// session's write half.
pub struct RealtimeRelay;

impl RealtimeRelay {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle(&mut self, ctx: &mut Session) -> Result<()> {
        // Notify that the RT connection has been set up.
        ctx.rt.start(ctx.outbound());

        loop {
            let line = match ctx.conn.read_line().await {
                Ok(line) => line,
                Err(NetlogError::EndOfStream) => break,
                Err(e) => return Err(e.into()),
            };

            let message: Value = serde_json::from_str(&line)
                .with_context(|| format!("invalid realtime message: {line:?}"))?;
            ctx.rt.on_message(message);
        }
        Ok(())
    }
}

impl Default for RealtimeRelay {
    fn default() -> Self {
        Self::new()
    }
}
