// SPDX-License-Identifier: MIT

//! Error types for Promptpix

use thiserror::Error;

/// Result type alias for Promptpix operations
pub type Result<T> = std::result::Result<T, PromptpixError>;

/// Promptpix error types
#[derive(Error, Debug)]
pub enum PromptpixError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Server error: {0}")]
    Server(String),
}
