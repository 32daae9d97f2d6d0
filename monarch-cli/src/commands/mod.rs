// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod run;
pub mod status;

/// Report an unrecoverable startup failure and exit non-zero.
pub fn fatal(context: &str, err: impl std::fmt::Display) -> ! {
    tracing::error!(error = %err, "{}", context);
    eprintln!("✗ {}:", context);
    eprintln!("  {}", err);
    std::process::exit(1);
}
