// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use netlog_server_rs::{
    cfg::{cli::config_path_from_env, config::Config, logger::init_logger},
    server::server::{ResultServer, StorageResolver},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config_logger.yaml")?;

    // Load config
    let cfg = config_path_from_env()
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let root = cfg.storage.root.clone();
    let storage: StorageResolver =
        Arc::new(move |task_id| root.join(task_id.to_string()));

    let server = ResultServer::bind(&cfg, storage)
        .await
        .context("failed to start result server")?;
    info!(
        "result server listening on {}:{}",
        cfg.network.bind_ip,
        server.actual_port()
    );

    // Tasks come and go through the orchestrator's add_task/del_task calls;
    // the process itself just serves until it is told to stop.
    tokio::signal::ctrl_c().await?;
    info!("shutting down result server");
    server.stop();

    Ok(())
}
