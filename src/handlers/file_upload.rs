// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, time::Duration};

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    errors::NetlogError,
    server::session::Session,
    storage::{files::open_exclusive, paths::sanitize_upload_path, sink::WriteLimiter},
};

/// Read timeout for the framing lines of an upload; the body itself has
/// none.
const LINE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives one artifact file into the task's result tree.
///
/// Three header generations are on the wire and all must keep working:
/// v3 sends a JSON object (`store_as`, optional `path`, `pids` and `rid`),
/// v2 sends the literal `2` followed by three header lines, and v1 sends no
/// header at all, just the storage path on its own line.
pub struct FileUpload {
    header: Option<Value>,
}

impl FileUpload {
    pub fn new(header: Option<Value>) -> Self {
        Self { header }
    }

    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    pub async fn handle(&mut self, ctx: &mut Session) -> Result<()> {
        ctx.conn.set_line_timeout(Some(LINE_TIMEOUT));

        let header = match self.header.take() {
            None => {
                // Backwards compatibility, version 1
                json!({ "store_as": ctx.conn.read_line().await? })
            },
            Some(v) if v.as_u64() == Some(2) => {
                // Backwards compatibility, version 2
                let store_as = ctx.conn.read_line().await?;
                let path = ctx.conn.read_line().await?;
                let pids = ctx
                    .conn
                    .read_line()
                    .await?
                    .split(',')
                    .filter(|part| !part.trim().is_empty())
                    .map(|part| part.trim().parse::<u64>())
                    .collect::<Result<Vec<_>, _>>()
                    .context("invalid pid list in file upload header")?;
                json!({ "store_as": store_as, "path": path, "pids": pids })
            },
            Some(v) => {
                ctx.response_id = v.get("rid").filter(|rid| !rid.is_null()).cloned();
                v
            },
        };
        // Kept around even if the upload fails: the response envelope is
        // relayed to the dispatcher regardless of the outcome.
        self.header = Some(header.clone());

        let store_as = header
            .get("store_as")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .ok_or(NetlogError::MissingStoreAs)?;
        let dump_path = sanitize_upload_path(store_as)?;

        debug!("task #{}: file upload for {dump_path:?}", ctx.task_id);
        let file_path = ctx.storage_path.join(&dump_path);

        let fd = match open_exclusive(&file_path).await {
            Ok(fd) => fd,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(NetlogError::Overwrite(dump_path).into());
            },
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("cannot open upload destination {file_path:?}")));
            },
        };

        // Append-writes below the pipe-atomic size land whole: concurrent
        // uploads may interleave journal lines but never split one.
        let entry = json!({
            "path": dump_path,
            "filepath": header.get("path").cloned().unwrap_or(Value::Null),
            "pids": header.get("pids").cloned().unwrap_or_else(|| json!([])),
        });
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let mut journal = OpenOptions::new()
            .append(true)
            .create(true)
            .open(ctx.storage_path.join("files.json"))
            .await
            .context("cannot open files.json journal")?;
        journal.write_all(&line).await?;
        journal.flush().await?;

        ctx.conn.set_line_timeout(None);
        let mut sink = WriteLimiter::new(fd, ctx.upload_max_size);
        let copied = ctx.conn.copy_to(&mut sink).await;
        debug!(
            "task #{} uploaded file length: {}",
            ctx.task_id,
            sink.written()
        );
        copied.map_err(Into::into)
    }
}
