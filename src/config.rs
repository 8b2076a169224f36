use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "valvescan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Env var pointing at an explicit tesseract executable.
pub const TESSERACT_ENV: &str = "VALVESCAN_TESSERACT";

/// Env var overriding the per-call OCR deadline.
pub const OCR_TIMEOUT_ENV: &str = "VALVESCAN_OCR_TIMEOUT_SECS";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "valvescan_lib=info,valvescan=info,warn"
}

/// Per-user configuration directory (`<config_dir>/valvescan`).
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Default location of the settings file.
pub fn default_settings_path() -> Option<PathBuf> {
    app_config_dir().map(|dir| dir.join("settings.json"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {0}: {1}")]
    SettingsLoad(String, String),

    #[error("Invalid settings file {0}: {1}")]
    SettingsParse(String, String),
}

/// Runtime knobs for the extraction pipeline.
///
/// Every field has a default so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Deadline for the whole document download.
    pub fetch_timeout_secs: u64,
    /// Extra download attempts after a transient failure.
    pub fetch_retries: u32,
    /// Deadline for a single OCR engine call.
    pub ocr_timeout_secs: u64,
    /// Tesseract executable; resolved from PATH when unset.
    pub tesseract_path: Option<PathBuf>,
    /// Tesseract language pack.
    pub ocr_language: String,
    /// Page rasterization resolution.
    pub render_dpi: u32,
    /// Run the edge-based second pass over each crop.
    pub refine_crops: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 60,
            fetch_retries: 2,
            ocr_timeout_secs: 30,
            tesseract_path: None,
            ocr_language: "eng".into(),
            render_dpi: crate::pipeline_config::DEFAULT_RENDER_DPI,
            refine_crops: true,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, the default location, or fall back to defaults.
    ///
    /// An explicit path that does not exist is an error; a missing default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_settings_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        Ok(settings.with_env_overrides())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::SettingsLoad(path.display().to_string(), e.to_string())
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ConfigError::SettingsParse(path.display().to_string(), e.to_string())
        })
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(TESSERACT_ENV) {
            if !path.trim().is_empty() {
                self.tesseract_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(raw) = std::env::var(OCR_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.ocr_timeout_secs = secs,
                _ => tracing::warn!(value = %raw, "Ignoring invalid {OCR_TIMEOUT_ENV}"),
            }
        }
        self
    }
}
