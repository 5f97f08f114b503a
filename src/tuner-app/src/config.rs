// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "tuner.toml";
const CONFIG_DIR_NAME: &str = "tuner";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// Default search paths for `tuner.toml`: current directory, then the XDG
/// config directory, then /etc.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths.push(Path::new("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    paths
}

/// Deserialize the `key` section of a TOML document.
///
/// `Ok(None)` means the section is absent.
fn parse_section<T: DeserializeOwned>(
    path: &Path,
    content: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let table: toml::Table = toml::from_str(content)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

    let Some(section) = table.get(key) else {
        return Ok(None);
    };

    // Round-trip through text so serde defaults apply to missing fields.
    let section_toml = toml::to_string(section)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
    let cfg = toml::from_str::<T>(&section_toml)
        .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
    Ok(Some(cfg))
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(path, &content, key)
}

/// Trait for loading configuration from a `tuner.toml` section.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key in `tuner.toml` (e.g. `"tuner-server"`).
    fn section_key() -> &'static str;

    /// Load the section from a specific file path.
    ///
    /// Fails if the file cannot be read, is not valid TOML, or lacks the
    /// `[<section_key>]` header.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Parse the section out of an in-memory document.
    fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let origin = Path::new("<inline>");
        parse_section::<Self>(origin, content, Self::section_key())?.ok_or_else(|| {
            ConfigError::ParseError(
                origin.to_path_buf(),
                format!("missing [{}] section", Self::section_key()),
            )
        })
    }

    /// Load the first default path that contains the section.
    ///
    /// Returns `(Default::default(), None)` when none does.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }
}
