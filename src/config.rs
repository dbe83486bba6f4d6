// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::selector::SelectionMode;

/// Failure to load a [`DecoderConfig`].
#[sorted]
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {}: {}", .path.display(), .source)]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Options of a decoder instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case", default)]
pub struct DecoderConfig {
    /// Let a self-negotiating container choose the decoder instead of choosing it at open time.
    pub use_autodecode: bool,
}

impl DecoderConfig {
    pub fn selection_mode(&self) -> SelectionMode {
        if self.use_autodecode {
            SelectionMode::Auto
        } else {
            SelectionMode::Explicit
        }
    }

    /// Reads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

impl From<SelectionMode> for DecoderConfig {
    fn from(mode: SelectionMode) -> Self {
        DecoderConfig {
            use_autodecode: mode == SelectionMode::Auto,
        }
    }
}

/// Parses the name of a selection mode, as given on the command line.
pub fn parse_selection_mode(s: &str) -> Result<SelectionMode, String> {
    const VALID_MODES: &[&str] = &["explicit", "auto"];

    match s {
        "" | "explicit" => Ok(SelectionMode::Explicit),
        "auto" => Ok(SelectionMode::Auto),
        _ => Err(format!(
            "invalid selection mode `{}`: should be one of ({})",
            s,
            VALID_MODES.join("|")
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!(parse_selection_mode(""), Ok(SelectionMode::Explicit));
        assert_eq!(parse_selection_mode("explicit"), Ok(SelectionMode::Explicit));
        assert_eq!(parse_selection_mode("auto"), Ok(SelectionMode::Auto));
        assert!(parse_selection_mode("decodebin")
            .unwrap_err()
            .contains("explicit|auto"));
    }

    #[test]
    fn deserialize_config() {
        let config: DecoderConfig = serde_json::from_str(r#"{"use-autodecode": true}"#).unwrap();
        assert_eq!(config.selection_mode(), SelectionMode::Auto);

        let config: DecoderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DecoderConfig::default());
        assert_eq!(config.selection_mode(), SelectionMode::Explicit);

        assert!(serde_json::from_str::<DecoderConfig>(r#"{"use_autodecode": true}"#).is_err());
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "use-autodecode": true }}"#).unwrap();
        let config = DecoderConfig::from_json_file(file.path()).unwrap();
        assert!(config.use_autodecode);

        let err = DecoderConfig::from_json_file(Path::new("/nonexistent/decoder.json"))
            .unwrap_err();
        match &err {
            ConfigError::Open { path, source } => {
                assert_eq!(path, Path::new("/nonexistent/decoder.json"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            e => panic!("unexpected error {}", e),
        }
        assert!(err
            .to_string()
            .starts_with("failed to open config file /nonexistent/decoder.json"));
    }

    #[test]
    fn config_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "use-autodecode": "yes" }}"#).unwrap();
        let err = DecoderConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse config file"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "decoder": "auto" }}"#).unwrap();
        assert!(matches!(
            DecoderConfig::from_json_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
