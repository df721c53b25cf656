// SPDX-License-Identifier: MIT

//! Flat-file gallery store.
//!
//! One JSON document keyed by stored filename. Loaded whole, mutated in
//! memory, written back whole; galleries are small enough that a database
//! would be overhead.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::metadata::CanonicalMetadata;
use crate::Result;

/// A stored gallery image and its extracted metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(deserialize_with = "deserialize_upload_date")]
    pub upload_date: DateTime<Utc>,
    #[serde(default)]
    pub category: String,
    /// Records migrated from older store layouts carry no hash.
    #[serde(default)]
    pub file_hash: String,
    #[serde(flatten)]
    pub metadata: CanonicalMetadata,
}

/// Older stores wrote naive local timestamps with no offset; accept both
/// those and RFC 3339.
fn deserialize_upload_date<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(date) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(date.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| serde::de::Error::custom(format!("invalid upload_date {:?}: {}", raw, e)))
}

/// In-memory gallery backed by a single JSON file.
pub struct GalleryStore {
    path: PathBuf,
    records: BTreeMap<String, ImageRecord>,
}

impl GalleryStore {
    /// Load the store from disk. A missing file yields an empty store; a
    /// corrupt one is set aside as `<path>.bak` and replaced by an empty
    /// store rather than blocking startup.
    pub fn load(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                records: BTreeMap::new(),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        let records = match serde_json::from_str::<Value>(&content) {
            Ok(value) => match parse_records(value) {
                Some(records) => records,
                None => {
                    back_up_corrupt(&path)?;
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!("Corrupt gallery store {:?}: {}", path, e);
                back_up_corrupt(&path)?;
                BTreeMap::new()
            }
        };

        Ok(Self { path, records })
    }

    /// Write the whole store back to disk as pretty JSON.
    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Insert or replace a record and persist.
    pub fn insert(&mut self, record: ImageRecord) -> Result<()> {
        self.records.insert(record.filename.clone(), record);
        self.save()
    }

    pub fn get(&self, filename: &str) -> Option<&ImageRecord> {
        self.records.get(filename)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Flip the sensitivity flag on a stored image and persist. Errors when
    /// the filename is unknown.
    pub fn set_nsfw(&mut self, filename: &str, is_nsfw: bool) -> Result<()> {
        let record = self
            .records
            .get_mut(filename)
            .ok_or_else(|| crate::PromptpixError::Store(format!("unknown image: {}", filename)))?;
        record.metadata.is_nsfw = is_nsfw;
        self.save()
    }

    /// True when a file with this content hash is already stored. Migrated
    /// records without a hash never match.
    pub fn contains_hash(&self, file_hash: &str) -> bool {
        !file_hash.is_empty() && self.records.values().any(|r| r.file_hash == file_hash)
    }

    /// All records, newest upload first.
    pub fn all(&self) -> Vec<&ImageRecord> {
        let mut records: Vec<&ImageRecord> = self.records.values().collect();
        records.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        records
    }

    /// Filtered search, newest upload first. Text matches prompt or
    /// filename case-insensitively; category, model, and tool are exact
    /// filters.
    pub fn search(&self, query: &SearchFilter) -> Vec<&ImageRecord> {
        let needle = query.text.as_deref().map(str::to_lowercase);
        let mut hits: Vec<&ImageRecord> = self
            .records
            .values()
            .filter(|r| {
                if let Some(needle) = &needle {
                    let in_prompt = r.metadata.prompt.to_lowercase().contains(needle);
                    let in_name = r.original_filename.to_lowercase().contains(needle);
                    if !in_prompt && !in_name {
                        return false;
                    }
                }
                if let Some(category) = &query.category {
                    if &r.category != category {
                        return false;
                    }
                }
                if let Some(model) = &query.model {
                    if &r.metadata.model_name != model {
                        return false;
                    }
                }
                if let Some(tool) = &query.tool {
                    if !r.metadata.tools.contains(tool) {
                        return false;
                    }
                }
                true
            })
            .collect();
        hits.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        hits
    }

    /// Distinct model names across the gallery, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .records
            .values()
            .map(|r| r.metadata.model_name.clone())
            .filter(|m| !m.is_empty())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// Distinct categories across the gallery, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self
            .records
            .values()
            .map(|r| r.category.clone())
            .filter(|c| !c.is_empty())
            .collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Search criteria; every field is optional and they combine with AND.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SearchFilter {
    pub text: Option<String>,
    pub category: Option<String>,
    pub model: Option<String>,
    pub tool: Option<String>,
}

/// Accept both the current map layout and the legacy array-of-records
/// layout, keying migrated entries by their filename.
fn parse_records(value: Value) -> Option<BTreeMap<String, ImageRecord>> {
    match value {
        Value::Object(_) => serde_json::from_value(value).ok(),
        Value::Array(entries) => {
            let mut records = BTreeMap::new();
            for entry in entries {
                if let Ok(record) = serde_json::from_value::<ImageRecord>(entry) {
                    records.insert(record.filename.clone(), record);
                }
            }
            Some(records)
        }
        _ => None,
    }
}

fn back_up_corrupt(path: &Path) -> Result<()> {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    warn!("Moving corrupt store to {:?}", backup);
    std::fs::rename(path, &backup)?;
    Ok(())
}
