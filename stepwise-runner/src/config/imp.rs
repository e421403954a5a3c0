// Copyright (c) The stepwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use smol_str::SmolStr;
use std::{collections::BTreeSet, io, time::Duration};
use tracing::{debug, warn};

/// The default step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// The config file's path relative to the workspace root.
pub const CONFIG_PATH: &str = ".config/stepwise.toml";

/// Stepwise configuration, as read from `.config/stepwise.toml`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct StepwiseConfig {
    /// Reporting configuration.
    #[serde(default)]
    pub report: ReportConfig,
}

/// The `[report]` section.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ReportConfig {
    /// The administrative switch for reporting to the backend.
    #[serde(default)]
    pub enabled: bool,

    /// If set, only this user may report.
    #[serde(default)]
    pub restrict_user: Option<String>,

    /// If set, CI builds on other branches do not report.
    #[serde(default)]
    pub main_branch: Option<String>,

    /// The timeout for steps that don't specify one.
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,

    /// The worker name written into snapshots.
    #[serde(default)]
    pub worker: Option<SmolStr>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            restrict_user: None,
            main_branch: None,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            worker: None,
        }
    }
}

fn default_step_timeout() -> Duration {
    DEFAULT_STEP_TIMEOUT
}

impl StepwiseConfig {
    /// Returns the path of the config file for a workspace.
    pub fn config_path(workspace_root: &Utf8Path) -> Utf8PathBuf {
        workspace_root.join(CONFIG_PATH)
    }

    /// Loads the config for a workspace.
    ///
    /// A missing config file results in the default config.
    pub fn from_workspace(workspace_root: &Utf8Path) -> Result<Self, ConfigParseError> {
        Self::from_path(&Self::config_path(workspace_root))
    }

    /// Loads the config from a file. A missing file results in the default config.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ConfigParseError> {
        debug!("stepwise config: attempting to load from {path}");
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("stepwise config: file does not exist at {path}, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(ConfigParseError::new(
                    path,
                    ConfigParseErrorKind::Read(error),
                ));
            }
        };
        Self::from_toml_str(&contents, path)
    }

    /// Parses the config from a string. `path` is used for error messages and warnings.
    pub fn from_toml_str(contents: &str, path: &Utf8Path) -> Result<Self, ConfigParseError> {
        let (config, unknown) = Self::deserialize_toml(contents).map_err(|error| {
            ConfigParseError::new(path, ConfigParseErrorKind::Deserialize(error))
        })?;
        if !unknown.is_empty() {
            let keys = unknown.into_iter().collect::<Vec<_>>().join(", ");
            warn!("ignoring unknown keys in stepwise config at {path}: {keys}");
        }
        Ok(config)
    }

    fn deserialize_toml(contents: &str) -> Result<(Self, BTreeSet<String>), toml::de::Error> {
        let deserializer = toml::Deserializer::parse(contents)?;
        let mut unknown = BTreeSet::new();
        let config = serde_ignored::deserialize(deserializer, |path| {
            unknown.insert(path.to_string());
        })?;
        Ok((config, unknown))
    }
}
