use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const ENV_PREFIX: &str = "SNAPFERRY_";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapferry/snapferry.toml";

/// Immutable resolved configuration.
///
/// Built once at startup by a pure layered resolution and passed into every
/// component constructor; there is no global configuration state. Lookup
/// precedence, highest first:
///
/// 1. explicit overrides (command-line flags)
/// 2. environment (`SNAPFERRY_<KEY>`)
/// 3. the config file `[main]` table
/// 4. the config file `[fs."<filesystem>"]` table for the active filesystem
/// 5. built-in defaults
#[derive(Debug, Clone)]
pub struct Settings {
    overrides: HashMap<String, String>,
    environment: HashMap<String, String>,
    main: HashMap<String, String>,
    sections: HashMap<String, HashMap<String, String>>,
    defaults: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    main: HashMap<String, String>,
    #[serde(default)]
    fs: HashMap<String, HashMap<String, String>>,
}

fn builtin_defaults() -> HashMap<String, String> {
    let defaults = [
        ("profile", "default"),
        ("endpoint", "aws"),
        ("s3_prefix", "snapferry"),
        ("snapshot_prefix", "auto"),
        ("compressor", "pigz1"),
        ("encryptor", "none"),
        ("storage_class", "STANDARD_IA"),
        // Reserved settings, accepted but not consumed by any code path.
        ("chunk_size", "256M"),
        ("max_retries", "3"),
        ("concurrency", "4"),
    ];
    defaults
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Settings {
    /// Resolves settings from the process environment and an optional config
    /// file. A missing file at the default path is fine; a missing file at an
    /// explicitly requested path is a configuration error.
    pub fn resolve(
        config_path: Option<&Path>,
        overrides: HashMap<String, String>,
    ) -> Result<Self> {
        let environment = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|k| (k.to_lowercase(), value))
            })
            .collect();

        let contents = match config_path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                Error::Configuration(format!("cannot read config file {}: {e}", path.display()))
            })?),
            None => std::fs::read_to_string(DEFAULT_CONFIG_PATH).ok(),
        };

        Self::from_layers(overrides, environment, contents.as_deref())
    }

    /// Pure layer assembly, separated out so tests can inject environment and
    /// file contents directly.
    pub fn from_layers(
        overrides: HashMap<String, String>,
        environment: HashMap<String, String>,
        file_contents: Option<&str>,
    ) -> Result<Self> {
        let file: ConfigFile = match file_contents {
            Some(text) => toml::from_str(text)
                .map_err(|e| Error::Configuration(format!("invalid config file: {e}")))?,
            None => ConfigFile::default(),
        };

        Ok(Self {
            overrides,
            environment,
            main: file.main,
            sections: file.fs,
            defaults: builtin_defaults(),
        })
    }

    /// Looks the key up through the layers. The filesystem-specific section
    /// is only consulted when a filesystem is given.
    pub fn get(&self, key: &str, filesystem: Option<&str>) -> Option<&str> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value);
        }
        if let Some(value) = self.environment.get(key) {
            return Some(value);
        }
        if let Some(value) = self.main.get(key) {
            return Some(value);
        }
        if let Some(fs) = filesystem {
            if let Some(value) = self.sections.get(fs).and_then(|s| s.get(key)) {
                return Some(value);
            }
        }
        self.defaults.get(key).map(String::as_str)
    }

    /// Like `get`, but a missing value is a configuration error.
    pub fn require(&self, key: &str, filesystem: Option<&str>) -> Result<&str> {
        self.get(key, filesystem)
            .ok_or_else(|| Error::Configuration(format!("required setting '{key}' is not set")))
    }

    /// Compressor/encryptor settings treat `"none"` as disabled.
    pub fn get_enabled(&self, key: &str, filesystem: Option<&str>) -> Option<&str> {
        self.get(key, filesystem)
            .filter(|v| !v.eq_ignore_ascii_case("none"))
    }
}
