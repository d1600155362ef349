// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::IpAddr, path::{Path, PathBuf}};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Listening endpoint of the collection socket.
    pub network: NetworkConfig,
    /// Per-upload and per-server resource limits.
    pub limits: LimitsConfig,
    /// Where per-task result trees live on disk.
    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NetworkConfig {
    #[serde(rename = "BindIp")]
    /// Address the server binds; usually the host side of the VM-only
    /// network.
    pub bind_ip: IpAddr,

    #[serde(rename = "BindPort")]
    /// Listening port. Port 0 asks the kernel for an ephemeral port, which
    /// is reported back through `ResultServer::actual_port`.
    pub bind_port: u16,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LimitsConfig {
    #[serde(rename = "UploadMaxSize")]
    /// Byte cap applied to every `FILE` body. Larger uploads are truncated
    /// on disk and flagged with a marker.
    pub upload_max_size: u64,

    #[serde(default, rename = "PoolSize")]
    /// Maximum number of concurrently served connections. 0 means
    /// unbounded.
    pub pool_size: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(rename = "Root")]
    /// Root directory under which each task gets `<root>/<task_id>/`.
    pub root: PathBuf,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants of the loaded configuration.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.limits.upload_max_size >= 1,
            "UploadMaxSize must be >= 1"
        );
        ensure!(
            self.storage.root.as_os_str() != "",
            "storage Root must not be empty"
        );
        Ok(())
    }
}
