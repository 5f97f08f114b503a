// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Hardware location of a tuner, as a `bus:address` token.
///
/// Passed verbatim to the tuner process and embedded in the control
/// endpoint name, so two devices never share an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unix socket path of the control endpoint for this device.
    pub fn endpoint_path(&self, runtime_dir: &Path, prefix: &str) -> PathBuf {
        runtime_dir.join(format!("{}-{}.sock", prefix, self.0))
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_embeds_identity() {
        let id = DeviceIdentity::new("1:4");
        assert_eq!(id.as_str(), "1:4");
        let path = id.endpoint_path(Path::new("/tmp"), "tuner");
        assert_eq!(path, PathBuf::from("/tmp/tuner-1:4.sock"));
    }

    #[test]
    fn test_endpoints_are_unique_per_device() {
        let dir = Path::new("/run/tuner");
        let a = DeviceIdentity::new("1:4").endpoint_path(dir, "tuner");
        let b = DeviceIdentity::new("1:5").endpoint_path(dir, "tuner");
        assert_ne!(a, b);
    }
}
