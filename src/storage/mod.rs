//! Filesystem rules for the per-task result tree.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Exclusive-create opens and directory scaffolding.
pub mod files;
/// Validation of client-supplied artifact paths.
pub mod paths;
/// Byte-capped write adapter for uploads.
pub mod sink;
