// SPDX-License-Identifier: MIT

//! Field merge resolution and record finalization.

use super::CanonicalMetadata;

/// Set `dst` from `src` only when `dst` is still empty.
pub(crate) fn fill(dst: &mut String, src: &str) {
    if dst.is_empty() && !src.is_empty() {
        *dst = src.to_string();
    }
}

/// Strip quoting artifacts and a `.safetensors` suffix from a model
/// identifier.
pub(crate) fn clean_model_identifier(raw: &str) -> String {
    let name = raw.trim().trim_matches('"').trim();
    if name.to_ascii_lowercase().ends_with(".safetensors") {
        name[..name.len() - ".safetensors".len()].to_string()
    } else {
        name.to_string()
    }
}

/// Finalize a merged record: identifier cleanup, `model`/`model_name`
/// symmetry, then defaults for every field that carries one.
///
/// `schedule_type`, `model_hash`, `version`, `clip_skip`,
/// `distilled_cfg_scale`, `lora_tags` and `module_*` entries have no
/// canonical default and stay empty when never set.
pub fn finalize(mut record: CanonicalMetadata) -> CanonicalMetadata {
    record.model = clean_model_identifier(&record.model);
    record.model_name = clean_model_identifier(&record.model_name);

    // One side of the pair set implies both.
    if record.model.is_empty() && !record.model_name.is_empty() {
        record.model = record.model_name.clone();
    } else if record.model_name.is_empty() && !record.model.is_empty() {
        record.model_name = record.model.clone();
    }

    fill(&mut record.prompt, "No prompt found");
    fill(&mut record.negative_prompt, "No negative prompt found");
    fill(&mut record.model_name, "Unknown model");
    fill(&mut record.model, "Unknown model");
    fill(&mut record.steps, "20");
    fill(&mut record.sampler, "Unknown");
    fill(&mut record.cfg_scale, "7");
    fill(&mut record.seed, "0");
    fill(&mut record.size, "512x512");

    record
}

/// The fully-defaulted record, shared by success and error paths.
pub fn default_record() -> CanonicalMetadata {
    finalize(CanonicalMetadata::default())
}

/// Record returned when the image resource itself cannot be read.
pub fn error_record() -> CanonicalMetadata {
    let record = CanonicalMetadata {
        prompt: "Error extracting metadata".to_string(),
        ..CanonicalMetadata::default()
    };
    finalize(record)
}
