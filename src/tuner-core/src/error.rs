// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

/// Failures raised inside the tuner supervision stack.
///
/// None of these are fatal to the owning process: unknown parameters are
/// dropped, process and socket failures are turned into scheduled recovery,
/// and invalid rates are replaced by a safe default.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunerError {
    #[error("unknown tuner parameter '{0}'")]
    UnknownParameter(String),

    #[error("failed to launch tuner process {binary}: {reason}")]
    ProcessLaunch { binary: String, reason: String },

    #[error("tuner process exited (code: {code:?}, signal: {signal:?})")]
    ProcessExit {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("control socket error: {0}")]
    ControlSocket(String),

    #[error("invalid sample rate request: {0} Hz")]
    InvalidRateRequest(i64),

    #[error("device controller is no longer running")]
    ControllerClosed,
}

pub type TunerResult<T> = Result<T, TunerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TunerError::UnknownParameter("bogus".into()).to_string(),
            "unknown tuner parameter 'bogus'"
        );
        assert_eq!(
            TunerError::InvalidRateRequest(0).to_string(),
            "invalid sample rate request: 0 Hz"
        );
    }
}
