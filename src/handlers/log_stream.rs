// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use anyhow::Result;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tracing::debug;

use crate::{
    server::session::Session,
    storage::{files::open_exclusive, sink::ArtifactSink},
};

/// The live analysis log. Can only be opened once per task lifetime.
pub struct LogStream;

impl LogStream {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle(&mut self, ctx: &mut Session) -> Result<()> {
        let logpath = ctx.storage_path.join("analysis.log");
        let fd = match open_exclusive(&logpath).await {
            Ok(fd) => fd,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(
                    "task #{}: attempted to reopen live log analysis.log",
                    ctx.task_id
                );
                return Ok(());
            },
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context(format!("cannot open live log {logpath:?}")));
            },
        };
        debug!("task #{}: live log analysis.log initialized", ctx.task_id);

        // Flushed after every received chunk so the log stays live while the
        // analysis is still running.
        let mut sink = LiveLog(BufWriter::new(fd));
        ctx.conn.copy_to(&mut sink).await?;
        Ok(())
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new()
    }
}

struct LiveLog(BufWriter<File>);

impl ArtifactSink for LiveLog {
    fn write(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            self.0.write_all(buf).await?;
            self.0.flush().await
        }
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move { self.0.flush().await }
    }
}
