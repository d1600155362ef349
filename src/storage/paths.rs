// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::errors::NetlogError;

/// Directories in which analysis-related files will be stored; also acts as
/// the upload whitelist.
pub const RESULT_UPLOADABLE: [&str; 7] = [
    "files",
    "shots",
    "buffer",
    "extracted",
    "memory",
    "package_files",
    "logs",
];

/// Everything scaffolded under a task directory, including the dirs the
/// post-processing stage writes to on its own.
pub const RESULT_DIRECTORIES: [&str; 8] = [
    "files",
    "shots",
    "buffer",
    "extracted",
    "memory",
    "package_files",
    "logs",
    "reports",
];

/// Bytes that must never appear in an artifact filename. NUL breaks C APIs
/// downstream; the colon names an Alternate Data Stream on NTFS.
const BANNED_NAME_BYTES: [u8; 2] = [0x00, b':'];

/// Validates an agent-provided relative path for result files.
///
/// Backslashes are folded to forward slashes first, then the parent
/// directory component (everything before the last slash) must be exactly
/// one of [`RESULT_UPLOADABLE`]. No dot-segment expansion happens: a `..`
/// surviving the whitelist comparison cannot name anything outside the
/// task tree.
pub fn sanitize_upload_path(raw: &str) -> Result<String, NetlogError> {
    let path = raw.replace('\\', "/");

    let (dir_part, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path.as_str()),
    };

    if !RESULT_UPLOADABLE.contains(&dir_part) {
        return Err(NetlogError::PathRejected(raw.to_string()));
    }
    if name.bytes().any(|b| BANNED_NAME_BYTES.contains(&b)) {
        return Err(NetlogError::PathRejected(raw.to_string()));
    }

    Ok(path)
}
