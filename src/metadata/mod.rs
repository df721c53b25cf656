// SPDX-License-Identifier: MIT

//! Generation-metadata extraction engine.
//!
//! AI image tooling embeds provenance in inconsistent side-channels: PNG
//! text chunks, EXIF fields, XMP packets, workflow-graph JSON. This module
//! reads all of them, parses the dialects it knows, and merges the partial
//! results into one canonical record under a fixed source precedence.
//!
//! Extraction never fails. An image that yields nothing produces a
//! default-filled record; an unreadable file produces the same record with
//! an error prompt.

pub mod containers;
pub mod merge;
pub mod parameters;
pub mod sensitivity;
pub mod workflow;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

use containers::{BlobOrigin, RawMetadataBlob};

/// The unified record of an image's generation parameters, independent of
/// which source dialect produced it.
///
/// Scalar fields hold the empty string while unset; [`merge::finalize`]
/// guarantees every defaulted field is populated before a record leaves the
/// engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalMetadata {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: String,
    pub sampler: String,
    pub schedule_type: String,
    pub cfg_scale: String,
    pub distilled_cfg_scale: String,
    pub seed: String,
    pub size: String,
    pub model: String,
    pub model_name: String,
    pub model_hash: String,
    pub version: String,
    pub clip_skip: String,
    /// Generation tools detected from the sources (e.g. "Stable Diffusion").
    pub tools: BTreeSet<String>,
    /// `<lora:...>` tags in order of appearance; they also remain in
    /// `prompt`.
    pub lora_tags: Vec<String>,
    /// Dynamic `module_*` entries from parameter-string keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modules: BTreeMap<String, String>,
    /// Derived by the sensitivity classifier, never set by a parser.
    pub is_nsfw: bool,
}

impl CanonicalMetadata {
    /// Fill every still-empty field of `self` from `other`.
    ///
    /// The single merge primitive: folding partial records in precedence
    /// order gives first-writer-wins semantics across sources. `tools` is a
    /// set and unions; `is_nsfw` is derived later and never merged.
    pub fn fill_from(&mut self, other: &CanonicalMetadata) {
        merge::fill(&mut self.prompt, &other.prompt);
        merge::fill(&mut self.negative_prompt, &other.negative_prompt);
        merge::fill(&mut self.steps, &other.steps);
        merge::fill(&mut self.sampler, &other.sampler);
        merge::fill(&mut self.schedule_type, &other.schedule_type);
        merge::fill(&mut self.cfg_scale, &other.cfg_scale);
        merge::fill(&mut self.distilled_cfg_scale, &other.distilled_cfg_scale);
        merge::fill(&mut self.seed, &other.seed);
        merge::fill(&mut self.size, &other.size);
        merge::fill(&mut self.model, &other.model);
        merge::fill(&mut self.model_name, &other.model_name);
        merge::fill(&mut self.model_hash, &other.model_hash);
        merge::fill(&mut self.version, &other.version);
        merge::fill(&mut self.clip_skip, &other.clip_skip);

        self.tools.extend(other.tools.iter().cloned());
        if self.lora_tags.is_empty() {
            self.lora_tags = other.lora_tags.clone();
        }
        for (key, value) in &other.modules {
            self.modules
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// A detected metadata source, ready to parse.
///
/// The closed set of dialects the engine understands; the orchestrator
/// matches on the variant instead of probing shapes ad hoc.
#[derive(Debug)]
pub enum SourceKind {
    /// Free-text "Steps: ..., Sampler: ..." blob (A1111 lineage).
    ParameterString(String),
    /// Workflow graph in the API export shape.
    ApiWorkflow(Value),
    /// Workflow graph in the UI/node-array export shape.
    NodeArrayWorkflow(Value),
    /// Fields that map directly with no parsing (Fooocus keys, tool hints).
    DirectKeyMap(CanonicalMetadata),
}

impl SourceKind {
    /// Classify a raw blob, or `None` when it does not decode into any
    /// known shape (a structural mismatch is treated like a decode failure).
    pub fn classify(blob: RawMetadataBlob) -> Option<SourceKind> {
        match blob.origin {
            BlobOrigin::WorkflowJson => {
                let value: Value = serde_json::from_str(&blob.payload).ok()?;
                workflow::detect_shape(&value).map(|shape| match shape {
                    workflow::WorkflowShape::Api => SourceKind::ApiWorkflow(value),
                    workflow::WorkflowShape::NodeArray => SourceKind::NodeArrayWorkflow(value),
                })
            }
            BlobOrigin::TextChunk | BlobOrigin::Exif | BlobOrigin::Xmp => {
                Some(SourceKind::ParameterString(blob.payload))
            }
        }
    }

    /// Parse this source into a partial record. Infallible: undecodable
    /// content simply leaves fields empty.
    pub fn parse(&self) -> CanonicalMetadata {
        match self {
            SourceKind::ParameterString(text) => parameters::parse_parameter_string(text),
            SourceKind::ApiWorkflow(value) => workflow::parse_api_graph(value),
            SourceKind::NodeArrayWorkflow(value) => workflow::parse_node_array(value),
            SourceKind::DirectKeyMap(partial) => partial.clone(),
        }
    }
}

/// Extract the canonical record from an image file.
///
/// Never fails: an unreadable file yields the default record with an error
/// prompt.
pub fn extract(path: &Path) -> CanonicalMetadata {
    match std::fs::read(path) {
        Ok(bytes) => extract_from_bytes(&bytes),
        Err(e) => {
            debug!("unreadable image {:?}: {}", path, e);
            merge::error_record()
        }
    }
}

/// Extract the canonical record from in-memory image bytes.
pub fn extract_from_bytes(bytes: &[u8]) -> CanonicalMetadata {
    let mut record = merge::finalize(extract_partial(bytes));
    record.is_nsfw = sensitivity::classify_sensitivity(&format!(
        "{} {}",
        record.prompt, record.negative_prompt
    ));
    record
}

/// Merged but not yet defaulted record.
///
/// Callers that overlay their own fields (e.g. upload forms) start from
/// this, apply their precedence, then run [`merge::finalize`] themselves.
pub fn extract_partial(bytes: &[u8]) -> CanonicalMetadata {
    let scan = containers::scan_containers(bytes);
    let mut merged = CanonicalMetadata::default();

    for blob in scan.blobs {
        debug!("merging '{}' ({:?})", blob.source_tag, blob.origin);
        if let Some(source) = SourceKind::classify(blob) {
            merged.fill_from(&source.parse());
        }
    }
    merged.fill_from(&scan.direct);

    // Actual pixel dimensions rank below every dialect: they fill `size`
    // only when no source carried one.
    if merged.size.is_empty() {
        if let Some(dims) = containers::probe_dimensions(bytes) {
            merged.size = dims;
        }
    }

    merged
}

/// Stringify a JSON scalar; arrays and objects yield nothing.
pub(crate) fn json_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_png(chunks: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, 1, 1);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            for (key, text) in chunks {
                encoder
                    .add_text_chunk(key.to_string(), text.to_string())
                    .expect("text chunk");
            }
            let mut writer = encoder.write_header().expect("png header");
            writer.write_image_data(&[0, 0, 0]).expect("png data");
        }
        buf
    }

    #[test]
    fn end_to_end_parameters_chunk() {
        let png = make_png(&[(
            "parameters",
            "a cat, Steps: 20, Sampler: Euler, CFG scale: 7, Seed: 42, Size: 512x512, Model: foo.safetensors",
        )]);
        let record = extract_from_bytes(&png);
        assert_eq!(record.prompt, "a cat");
        assert_eq!(record.steps, "20");
        assert_eq!(record.sampler, "Euler");
        assert_eq!(record.cfg_scale, "7");
        assert_eq!(record.seed, "42");
        assert_eq!(record.size, "512x512");
        assert_eq!(record.model, "foo");
        assert_eq!(record.model_name, "foo");
        assert!(record.tools.contains("Stable Diffusion"));
        assert!(!record.is_nsfw);
    }

    #[test]
    fn parameter_string_wins_over_workflow_graph() {
        let workflow = r#"{"3": {"class_type": "KSampler", "inputs": {"seed": 456}}}"#;
        let png = make_png(&[
            ("parameters", "x, Steps: 20, Seed: 123"),
            ("prompt", workflow),
        ]);
        let record = extract_from_bytes(&png);
        assert_eq!(record.seed, "123");
        // The graph still contributes its tool hint.
        assert!(record.tools.contains("ComfyUI"));
        assert!(record.tools.contains("Stable Diffusion"));
    }

    #[test]
    fn workflow_graph_fills_remaining_fields() {
        let workflow = r#"{
            "3": {"class_type": "KSampler", "inputs": {
                "seed": 7, "steps": 25, "cfg": 8,
                "sampler_name": "euler", "scheduler": "normal"}},
            "4": {"class_type": "CheckpointLoaderSimple",
                  "inputs": {"ckpt_name": "sdxl.safetensors"}}
        }"#;
        let png = make_png(&[("prompt", workflow)]);
        let record = extract_from_bytes(&png);
        assert_eq!(record.seed, "7");
        assert_eq!(record.steps, "25");
        assert_eq!(record.cfg_scale, "8");
        assert_eq!(record.sampler, "euler");
        assert_eq!(record.schedule_type, "normal");
        assert_eq!(record.model, "sdxl");
        assert_eq!(record.model_name, "sdxl");
        assert_eq!(record.tools.len(), 1);
        assert!(record.tools.contains("ComfyUI"));
    }

    #[test]
    fn bare_image_gets_defaults_and_real_dimensions() {
        let png = make_png(&[]);
        let record = extract_from_bytes(&png);
        assert_eq!(record.prompt, "No prompt found");
        assert_eq!(record.negative_prompt, "No negative prompt found");
        assert_eq!(record.model, "Unknown model");
        assert_eq!(record.steps, "20");
        // The dimension probe beats the 512x512 default.
        assert_eq!(record.size, "1x1");
        assert!(record.tools.is_empty());
        assert!(!record.is_nsfw);
    }

    #[test]
    fn dialect_size_beats_dimension_probe() {
        let png = make_png(&[("parameters", "y, Steps: 20, Size: 768x768")]);
        let record = extract_from_bytes(&png);
        assert_eq!(record.size, "768x768");
    }

    #[test]
    fn extraction_is_idempotent() {
        let png = make_png(&[("parameters", "a dog, Steps: 15, Seed: 3")]);
        assert_eq!(extract_from_bytes(&png), extract_from_bytes(&png));
    }

    #[test]
    fn unreadable_file_yields_error_record() {
        let record = extract(Path::new("/definitely/not/here.png"));
        assert_eq!(record.prompt, "Error extracting metadata");
        assert_eq!(record.steps, "20");
        assert!(!record.is_nsfw);
    }

    #[test]
    fn garbage_bytes_yield_defaults() {
        let record = extract_from_bytes(b"\x00\x01garbage");
        assert_eq!(record.prompt, "No prompt found");
        assert_eq!(record.size, "512x512");
    }

    #[test]
    fn sensitivity_is_derived_from_final_text() {
        let png = make_png(&[("parameters", "NSFW content, Steps: 20")]);
        let record = extract_from_bytes(&png);
        assert!(record.is_nsfw);

        let png = make_png(&[("parameters", "a teapot, Steps: 20")]);
        assert!(!extract_from_bytes(&png).is_nsfw);
    }

    #[test]
    fn extract_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sample.png");
        let png = make_png(&[("parameters", "on disk, Steps: 11")]);
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(&png).expect("write");
        drop(file);

        let record = extract(&path);
        assert_eq!(record.prompt, "on disk");
        assert_eq!(record.steps, "11");
    }
}
