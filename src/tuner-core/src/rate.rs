// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hardware sample-rate selection.
//!
//! The tuner accepts only two sample-rate bands. A requested rate is mapped
//! to its smallest multiple that lands inside one of them, so the requested
//! rate can be reached by integer decimation downstream.

use tracing::warn;

use crate::error::{TunerError, TunerResult};

/// Rate substituted for out-of-range requests.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Highest rate the tuner accepts.
pub const MAX_SAMPLE_RATE: u32 = 3_200_000;

/// Inclusive sample-rate band in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBand {
    pub low_hz: u32,
    pub high_hz: u32,
}

impl RateBand {
    #[must_use]
    pub const fn new(low_hz: u32, high_hz: u32) -> Self {
        Self { low_hz, high_hz }
    }

    pub fn contains(&self, rate_hz: u32) -> bool {
        rate_hz >= self.low_hz && rate_hz <= self.high_hz
    }
}

/// Bands accepted by the tuner hardware.
///
/// The low band stops short of 300 kHz, so a 100 kHz request resolves to
/// 1 MHz rather than 300 kHz.
pub const RATE_BANDS: [RateBand; 2] = [
    RateBand::new(225_001, 299_999),
    RateBand::new(900_001, MAX_SAMPLE_RATE),
];

/// Whether `rate_hz` can be programmed into the tuner as-is.
pub fn is_valid_rate(rate_hz: u32) -> bool {
    RATE_BANDS.iter().any(|band| band.contains(rate_hz))
}

/// Check that a requested rate is positive and no higher than
/// [`MAX_SAMPLE_RATE`].
pub fn validate_rate(requested_hz: i64) -> TunerResult<u32> {
    if requested_hz <= 0 || requested_hz > i64::from(MAX_SAMPLE_RATE) {
        return Err(TunerError::InvalidRateRequest(requested_hz));
    }
    Ok(requested_hz as u32)
}

/// Map a requested rate to the smallest multiple of it the tuner accepts.
///
/// Out-of-range requests are replaced by [`DEFAULT_SAMPLE_RATE`]. The loop
/// is bounded: any base rate below the upper band is narrower than that
/// band, so some multiple always falls inside it before exceeding
/// [`MAX_SAMPLE_RATE`].
pub fn select_rate(requested_hz: i64) -> u32 {
    let base = match validate_rate(requested_hz) {
        Ok(rate) => rate,
        Err(e) => {
            warn!("{}; using {} Hz", e, DEFAULT_SAMPLE_RATE);
            DEFAULT_SAMPLE_RATE
        }
    };

    let mut rate = base;
    while !is_valid_rate(rate) {
        rate += base;
    }
    rate
}
