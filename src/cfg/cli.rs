// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Config location used by the binary when `NETLOG_CONFIG` is not set.
pub const DEFAULT_CONFIG: &str = "netlog.yaml";

/// Picks the config file: the `NETLOG_CONFIG` environment variable wins,
/// otherwise [`DEFAULT_CONFIG`] next to the working directory. The result
/// is canonicalized so a later chdir cannot change which file was loaded.
pub fn config_path_from_env() -> Result<PathBuf> {
    let picked =
        std::env::var("NETLOG_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.into());

    let mut abs = PathBuf::from(picked);
    if abs.is_relative() {
        abs = std::env::current_dir()
            .context("cannot get current working dir")?
            .join(abs);
    }

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize config path {abs:?}"))
}
