// SPDX-License-Identifier: MIT

//! Promptpix: gallery and metadata extractor for AI-generated images
//!
//! Reads the generation parameters tools embed in image files (PNG text
//! chunks, EXIF, XMP, workflow JSON), normalizes them into one canonical
//! record, and serves a small self-hosted gallery over them.

pub mod config;
pub mod error;
pub mod metadata;
pub mod store;
pub mod web;

pub use config::AppConfig;
pub use error::{PromptpixError, Result};
pub use metadata::{extract, extract_from_bytes, CanonicalMetadata};
