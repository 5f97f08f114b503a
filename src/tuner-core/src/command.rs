// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Control-channel command encoding.
//!
//! Every command sent to the tuner process is a fixed 5-byte frame: one
//! opcode byte followed by a big-endian 32-bit parameter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TunerError, TunerResult};

pub const FRAME_LEN: usize = 5;

/// Parameters understood by the tuner process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunerParam {
    Frequency,
    Rate,
    GainMode,
    Gain,
    FreqCorrection,
    IfGain,
    TestMode,
    AgcMode,
    DirectSampling,
    OffsetTuning,
    RtlXtal,
    TunerXtal,
    TunerGain,
    Streaming,
}

impl TunerParam {
    pub const ALL: [TunerParam; 14] = [
        Self::Frequency,
        Self::Rate,
        Self::GainMode,
        Self::Gain,
        Self::FreqCorrection,
        Self::IfGain,
        Self::TestMode,
        Self::AgcMode,
        Self::DirectSampling,
        Self::OffsetTuning,
        Self::RtlXtal,
        Self::TunerXtal,
        Self::TunerGain,
        Self::Streaming,
    ];

    /// Wire opcode for this parameter.
    ///
    /// `tuner_gain` is 13. Opcode 4 is the plain `gain` command; older
    /// tables listed it as a second `tuner_gain` entry.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Frequency => 1,
            Self::Rate => 2,
            Self::GainMode => 3,
            Self::Gain => 4,
            Self::FreqCorrection => 5,
            Self::IfGain => 6,
            Self::TestMode => 7,
            Self::AgcMode => 8,
            Self::DirectSampling => 9,
            Self::OffsetTuning => 10,
            Self::RtlXtal => 11,
            Self::TunerXtal => 12,
            Self::TunerGain => 13,
            Self::Streaming => 14,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.opcode() == opcode)
    }

    /// Canonical parameter name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Rate => "rate",
            Self::GainMode => "gain_mode",
            Self::Gain => "gain",
            Self::FreqCorrection => "freq_correction",
            Self::IfGain => "if_gain",
            Self::TestMode => "test_mode",
            Self::AgcMode => "agc_mode",
            Self::DirectSampling => "direct_sampling",
            Self::OffsetTuning => "offset_tuning",
            Self::RtlXtal => "rtl_xtal",
            Self::TunerXtal => "tuner_xtal",
            Self::TunerGain => "tuner_gain",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for TunerParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TunerParam {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| TunerError::UnknownParameter(s.to_string()))
    }
}

/// A single encoded control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    /// Build a frame for `param`. Only the low 32 bits of `value` are sent,
    /// so both signed values and unsigned values up to `u32::MAX` survive.
    pub fn new(param: TunerParam, value: i64) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = param.opcode();
        bytes[1..].copy_from_slice(&(value as u32).to_be_bytes());
        Self(bytes)
    }

    /// Parse a frame received from the wire.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FRAME_LEN] = bytes.try_into().ok()?;
        TunerParam::from_opcode(bytes[0])?;
        Some(Self(bytes))
    }

    pub fn opcode(&self) -> u8 {
        self.0[0]
    }

    pub fn param(&self) -> Option<TunerParam> {
        TunerParam::from_opcode(self.opcode())
    }

    /// Parameter as an unsigned big-endian integer.
    pub fn raw_value(&self) -> u32 {
        u32::from_be_bytes([self.0[1], self.0[2], self.0[3], self.0[4]])
    }

    /// Parameter as a signed big-endian integer.
    pub fn value(&self) -> i32 {
        self.raw_value() as i32
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

/// Encode a named parameter change into a wire frame.
pub fn encode(name: &str, value: i64) -> TunerResult<CommandFrame> {
    let param = name.parse::<TunerParam>()?;
    Ok(CommandFrame::new(param, value))
}
