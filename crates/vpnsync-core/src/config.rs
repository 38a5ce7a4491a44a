//! Configuration types and parsing.
//!
//! The schema is intentionally small: which connection types count as VPNs,
//! which tool performs activation, and how control results are announced.
//! Files are merged over the embedded defaults, so a user config only needs
//! the keys it changes.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use toml::Table;

use crate::error::{Error, Result};
use crate::vpn::types::DEFAULT_VPN_TYPES;

/// Embedded default configuration TOML, compiled into the binary.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../../config.toml");

/// Directory name used under the XDG config home.
const CONFIG_DIR_NAME: &str = "vpnsync";

/// Result of loading a configuration file.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Path where config was found, if any.
    pub source: Option<PathBuf>,
    /// Whether defaults were used (no config file found).
    pub used_defaults: bool,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// VPN discovery and activation.
    pub vpn: VpnConfig,

    /// Desktop notifications for control operations.
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load configuration from the embedded default TOML.
    pub fn from_default_toml() -> Result<Self> {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TOML)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, merging with embedded defaults.
    ///
    /// Returns an error if the file doesn't exist or can't be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::load_with_defaults(&content)
    }

    /// Parse `user_toml` and deep-merge it over the embedded defaults.
    fn load_with_defaults(user_toml: &str) -> Result<Self> {
        let mut base: Table = toml::from_str(DEFAULT_CONFIG_TOML)?;
        let user: Table = toml::from_str(user_toml)?;

        // User values win; unknown keys are rejected by deserialization
        deep_merge_toml(&mut base, user);

        let config: Config = base.try_into()?;
        Ok(config)
    }

    /// Find and load configuration using the XDG lookup chain.
    ///
    /// If `explicit_path` is `Some`, that path is used directly and an error
    /// is returned if it doesn't exist or can't be parsed (no fallback).
    ///
    /// Otherwise searches, in order:
    /// 1. `$XDG_CONFIG_HOME/vpnsync/config.toml`
    /// 2. `~/.config/vpnsync/config.toml`
    /// 3. `./config.toml`
    ///
    /// A file that exists but fails to load is an error. Defaults are only
    /// used when no file exists at all.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<ConfigLoadResult> {
        // Explicit path: must exist and be valid, no fallback
        if let Some(path) = explicit_path {
            let config = Self::load(path)?;
            return Ok(ConfigLoadResult {
                config,
                source: Some(path.to_path_buf()),
                used_defaults: false,
            });
        }

        // No explicit path - search the XDG chain
        let search_paths = Self::config_search_paths();

        for path in &search_paths {
            if !path.exists() {
                continue;
            }
            return match Self::load(path) {
                Ok(config) => Ok(ConfigLoadResult {
                    config,
                    source: Some(path.clone()),
                    used_defaults: false,
                }),
                Err(e) => {
                    tracing::error!("Config file {:?} exists but failed to load: {}", path, e);
                    Err(e)
                }
            };
        }

        // Nothing found - fall back to the embedded defaults
        tracing::info!("No config file found, using built-in default config");
        tracing::debug!(
            "Searched: {}",
            search_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(ConfigLoadResult {
            config: Self::from_default_toml()?,
            source: None,
            used_defaults: true,
        })
    }

    /// Get the list of paths to search for config files.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg_config)
                    .join(CONFIG_DIR_NAME)
                    .join("config.toml"),
            );
        }

        if let Ok(home) = env::var("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".config")
                    .join(CONFIG_DIR_NAME)
                    .join("config.toml"),
            );
        }

        // Finally, current directory (for development)
        paths.push(PathBuf::from("config.toml"));

        paths
    }

    /// Validate the configuration, reporting every invalid value at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.vpn.types.is_empty() {
            errors.push("vpn.types: must list at least one connection type".to_string());
        }
        for (i, tag) in self.vpn.types.iter().enumerate() {
            if tag.trim().is_empty() {
                errors.push(format!("vpn.types[{}]: connection type must not be blank", i));
            } else if tag.chars().any(char::is_whitespace) {
                errors.push(format!(
                    "vpn.types[{}]: invalid value '{}', connection types contain no whitespace",
                    i, tag
                ));
            }
        }

        if self.vpn.tool.trim().is_empty() {
            errors.push("vpn.tool: must not be empty".to_string());
        }

        if self.notifications.enabled && self.notifications.summary.trim().is_empty() {
            errors.push(
                "notifications.summary: must not be empty while notifications are enabled"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigValidation(errors))
        }
    }

    /// Human-readable overview used by `--check-config`.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push("VPN:".to_string());
        lines.push(format!("  types: {}", self.vpn.types.join(", ")));
        lines.push(format!("  tool: {}", self.vpn.tool));
        lines.push("Notifications:".to_string());
        lines.push(format!(
            "  enabled: {}, summary: {}",
            self.notifications.enabled, self.notifications.summary
        ));
        lines.join("\n")
    }
}

/// VPN discovery and activation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VpnConfig {
    /// Connection types treated as VPN-family.
    pub types: Vec<String>,
    /// Activation tool invoked as `<tool> connection up|down <name>`.
    pub tool: String,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            types: DEFAULT_VPN_TYPES.iter().map(|t| t.to_string()).collect(),
            tool: "nmcli".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub summary: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            summary: "VPN".to_string(),
        }
    }
}

/// Deep merge two TOML tables, with `overlay` values taking precedence.
///
/// Nested tables merge recursively; arrays and scalars are replaced.
fn deep_merge_toml(base: &mut Table, overlay: Table) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(&key), overlay_value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                deep_merge_toml(base_table, overlay_table);
            }
            (_, overlay_value) => {
                base.insert(key, overlay_value);
            }
        }
    }
}
