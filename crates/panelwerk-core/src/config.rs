// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration, persisted as `config.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PanelwerkError, Result};
use crate::types::{QaThresholds, RestoreOptions, RetryPolicy};

/// Persistent application settings. Every field has a default, so a partial
/// `config.json` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default restore options for new jobs.
    pub defaults: RestoreOptions,
    pub qa: QaThresholds,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    pub service: ServiceConfig,
    /// Where accepted pages are staged. Staging is off when unset.
    pub store_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: RestoreOptions::default(),
            qa: QaThresholds::default(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            service: ServiceConfig::default(),
            store_dir: None,
        }
    }
}

/// Batch scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum concurrently running jobs. The service rate limit makes
    /// anything above 2 counterproductive.
    pub concurrency_limit: usize,
    /// Stop admitting jobs after the first fatal job failure.
    pub stop_on_error: bool,
    /// Assemble all accepted pages into a single PDF.
    pub combine: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
            stop_on_error: false,
            combine: false,
        }
    }
}

/// Hosted restoration service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub endpoint: String,
    /// Environment variable holding the access token.
    pub token_env: String,
    pub timeout_secs: u64,
    /// Inputs above this many pixels are rejected before submission.
    pub max_pixel_area: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.panelwerk.dev/v1/restore".into(),
            token_env: "PANELWERK_API_TOKEN".into(),
            timeout_secs: 120,
            max_pixel_area: 64_000_000,
        }
    }
}

impl ServiceConfig {
    /// Read the access token from the configured environment variable.
    pub fn resolve_token(&self) -> Result<String> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(PanelwerkError::Config(format!(
                "access token missing: set {}",
                self.token_env
            ))),
        }
    }
}

impl AppConfig {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            PanelwerkError::Config(format!("malformed {}: {e}", path.display()))
        })
    }

    /// Persist the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Check every section. Runs before any job is admitted.
    pub fn validate(&self) -> Result<()> {
        self.defaults
            .validate()
            .map_err(|e| PanelwerkError::Config(e.to_string()))?;
        self.qa.validate()?;
        self.retry.validate()?;
        if self.batch.concurrency_limit == 0 {
            return Err(PanelwerkError::Config(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        if self.service.endpoint.trim().is_empty() {
            return Err(PanelwerkError::Config("service endpoint is empty".into()));
        }
        if self.service.max_pixel_area == 0 {
            return Err(PanelwerkError::Config("max_pixel_area must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScaleFactor;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(dir.path().join("config.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "defaults": { "scale_factor": 4, "geometry": { "dpi": 600 } },
                 "batch": { "concurrency_limit": 2 } }"#,
        )
        .expect("write");

        let config = AppConfig::load(&path).expect("load");
        assert_eq!(config.defaults.scale_factor, ScaleFactor::X4);
        assert_eq!(config.defaults.geometry.dpi, 600);
        assert_eq!(config.defaults.geometry.trim_width_in, 6.625);
        assert_eq!(config.batch.concurrency_limit, 2);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            AppConfig::load(&path),
            Err(PanelwerkError::Config(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.batch.combine = true;
        config.save(&path).expect("save");
        assert_eq!(AppConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = AppConfig::default();
        config.batch.concurrency_limit = 0;
        assert!(matches!(config.validate(), Err(PanelwerkError::Config(_))));
    }

    #[test]
    fn missing_token_is_config_error() {
        let service = ServiceConfig {
            token_env: "PANELWERK_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(matches!(
            service.resolve_token(),
            Err(PanelwerkError::Config(_))
        ));
    }
}
