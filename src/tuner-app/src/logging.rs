// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Parse a configured log level, falling back to INFO when absent or
/// invalid.
pub fn parse_level(log_level: Option<&str>) -> Level {
    log_level
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

/// Install the global subscriber for the supervisor binaries.
pub fn init_logging(log_level: Option<&str>) {
    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(parse_level(log_level))
        .init();
}
