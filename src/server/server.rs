// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Result, bail};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::Semaphore,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::{
    cfg::config::{Config, LimitsConfig},
    errors::NetlogError,
    handlers,
    rt::SharedDispatcher,
    server::{
        registry::{TaskId, TaskRegistry},
        session::Session,
    },
};

/// Resolves the on-disk directory of a task. Supplied by the host, which
/// owns the storage layout.
pub type StorageResolver = Arc<dyn Fn(TaskId) -> PathBuf + Send + Sync>;

/// The result collection server.
///
/// Owns the listening socket and the accept loop; tasks are registered and
/// torn down through [`add_task`](Self::add_task) and
/// [`del_task`](Self::del_task). Every accepted connection runs as its own
/// tokio task, so a stalled VM upload never starves the others.
pub struct ResultServer {
    registry: Arc<TaskRegistry>,
    port: u16,
    accept_task: JoinHandle<()>,
    stop: CancellationToken,
}

impl ResultServer {
    /// Binds the listening socket and starts accepting.
    ///
    /// Port 0 asks the kernel for an ephemeral port, reported back through
    /// [`actual_port`](Self::actual_port).
    pub async fn bind(cfg: &Config, storage: StorageResolver) -> Result<Self> {
        let addr = SocketAddr::new(cfg.network.bind_ip, cfg.network.bind_port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;

        if let Err(e) = socket.bind(addr) {
            match e.kind() {
                io::ErrorKind::AddrInUse => bail!(
                    "cannot bind result server on port {} because it was in \
                     use, bailing",
                    addr.port()
                ),
                io::ErrorKind::AddrNotAvailable => bail!(
                    "unable to bind result server on {addr}; this usually \
                     happens when the virtual interface associated with the \
                     result server address is not up yet"
                ),
                _ => {
                    return Err(anyhow::Error::from(e)
                        .context(format!("unable to bind result server on {addr}")));
                },
            }
        }

        let listener = socket.listen(128)?;
        let port = listener.local_addr()?.port();

        let registry = Arc::new(TaskRegistry::new());
        let stop = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&registry),
            cfg.limits.clone(),
            storage,
            stop.clone(),
        ));

        Ok(Self {
            registry,
            port,
            accept_task,
            stop,
        })
    }

    /// The port actually bound; differs from the configured one only when
    /// that was 0.
    pub fn actual_port(&self) -> u16 {
        self.port
    }

    /// Registers a task/VM pair with the server.
    pub fn add_task(&self, task_id: TaskId, ipaddr: IpAddr, rt: SharedDispatcher) {
        self.registry.add_task(task_id, ipaddr, rt);
    }

    /// Deletes a running task and aborts its in-flight sessions.
    pub fn del_task(&self, task_id: TaskId, ipaddr: IpAddr) {
        self.registry.del_task(task_id, ipaddr);
    }

    /// Stops accepting new connections. Running sessions are unaffected;
    /// tear them down per task via [`del_task`](Self::del_task).
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Drop for ResultServer {
    fn drop(&mut self) {
        self.stop.cancel();
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<TaskRegistry>,
    limits: LimitsConfig,
    storage: StorageResolver,
    stop: CancellationToken,
) {
    let permits = (limits.pool_size > 0)
        .then(|| Arc::new(Semaphore::new(limits.pool_size)));

    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => return,
            res = listener.accept() => res,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            },
        };

        // With a bounded pool the accept loop itself backs off while all
        // workers are busy, pushing the pressure into the listen backlog.
        let permit = match &permits {
            Some(sem) => match Arc::clone(sem).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };

        let registry = Arc::clone(&registry);
        let storage = Arc::clone(&storage);
        let upload_max_size = limits.upload_max_size;
        tokio::spawn(async move {
            let _permit = permit;
            handle_connection(
                stream,
                peer,
                &registry,
                storage.as_ref(),
                upload_max_size,
            )
            .await;
        });
    }
}

/// Serves one accepted connection start to finish. Nothing propagates out
/// of here: a session is a failure isolation boundary.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &TaskRegistry,
    storage: &(dyn Fn(TaskId) -> PathBuf + Send + Sync),
    upload_max_size: u64,
) {
    let ipaddr = peer.ip();

    let Some((task_id, rt)) = registry.bind(ipaddr) else {
        warn!("result server did not have a task for ip {ipaddr}");
        return;
    };

    let storagepath = storage(task_id);
    let mut ctx = Session::new(task_id, storagepath, stream, rt, upload_max_size);

    let span = info_span!("task", id = task_id);
    serve_session(&mut ctx, ipaddr, registry).instrument(span).await;
}

async fn serve_session(ctx: &mut Session, ipaddr: IpAddr, registry: &TaskRegistry) {
    let mut protocol = match handlers::negotiate(ctx).await {
        Ok(Some(protocol)) => protocol,
        Ok(None) => return,
        Err(e) => {
            log_session_error(ctx, &e);
            return;
        },
    };

    // Registering the session allows tear-down to abort the handler through
    // its cancellation token. The task may have been torn down during
    // negotiation, or the address re-bound to a different task; in that
    // case nothing may touch the task directory anymore.
    let Some(handle) = registry.attach(ctx.task_id, ipaddr, ctx.cancel_token())
    else {
        warn!(
            "task #{} for ip {} was cancelled during negotiation",
            ctx.task_id, ipaddr
        );
        return;
    };

    if let Err(e) = protocol.handle(ctx).await {
        log_session_error(ctx, &e);
    }

    if ctx.response_id.is_some()
        && let Some(header) = protocol.header()
    {
        // Delivered to the dispatcher captured when the session was bound,
        // so a re-registration of the same address mid-flight cannot
        // misroute the envelope.
        ctx.rt.on_message(header.clone());
    }

    registry.detach(&handle);
    ctx.cancel();
    if !ctx.conn.buffer_is_empty() {
        // This is usually not a good sign.
        warn!(
            "task #{} with protocol {:?} has unprocessed data before getting \
             disconnected",
            ctx.task_id, ctx.command
        );
    }
}

fn log_session_error(ctx: &Session, err: &anyhow::Error) {
    match err.downcast_ref::<NetlogError>() {
        Some(e) if e.is_transport() => {
            debug!("task #{}: connection ended: {e}", ctx.task_id);
        },
        Some(e) => {
            warn!(
                "task #{} with protocol {:?} failed: {e}",
                ctx.task_id, ctx.command
            );
        },
        None => {
            error!(
                "task #{} with protocol {:?} failed: {err:#}",
                ctx.task_id, ctx.command
            );
        },
    }
}
