// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::fs::File;
use tracing::{debug, error};

use crate::server::session::Session;

/// Receives the raw behavioral log of one monitored process.
///
/// The stream is stored as-is for the downstream processor; no validation
/// happens here.
pub struct BsonStore {
    header: Value,
}

impl BsonStore {
    pub fn new(header: Option<Value>) -> Self {
        Self {
            header: header.unwrap_or_else(|| json!({})),
        }
    }

    pub async fn handle(&mut self, ctx: &mut Session) -> Result<()> {
        let Some(pid) = self.header.get("pid").and_then(Value::as_u64) else {
            error!(
                "please update to the latest version of the guest monitor; no \
                 behavioral logs are collected when a BSON stream arrives \
                 without a pid parameter"
            );
            return Ok(());
        };

        debug!("task #{} is sending a BSON stream for pid {pid}", ctx.task_id);
        let path = ctx.storage_path.join("logs").join(format!("{pid}.bson"));
        // Truncating write: a monitored process that reconnects resends its
        // log from the start.
        let mut fd = File::create(&path)
            .await
            .with_context(|| format!("cannot open behavioral log {path:?}"))?;
        ctx.conn.copy_to(&mut fd).await?;
        Ok(())
    }
}
