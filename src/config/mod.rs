// SPDX-License-Identifier: MIT

//! Configuration management for Promptpix

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,

    /// Extraction behaviour
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory uploaded images are written to
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Path of the JSON gallery store
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ExtractionConfig {
    /// When true, upload-form fields override what the image carries.
    /// Default is the reverse: embedded metadata wins, the form only fills
    /// gaps.
    #[serde(default)]
    pub prefer_form_fields: bool,

    /// Extra keywords for the sensitivity check, on top of the built-in set
    #[serde(default)]
    pub extra_sensitive_terms: Vec<String>,
}

// Default value functions
fn default_upload_dir() -> String { "uploads".to_string() }
fn default_store_path() -> String { "image_metadata.json".to_string() }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            store_path: default_store_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::PromptpixError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
