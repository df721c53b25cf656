// SPDX-License-Identifier: MIT

//! Parser for the free-text "generation parameters" dialect.
//!
//! The dominant legacy embedding style: positive prompt lines, an optional
//! "Negative prompt:" section, and a comma-separated key/value tail starting
//! at "Steps:". Parsing is total by construction; malformed input degrades to
//! whichever fields were recovered.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::merge::{clean_model_identifier, fill};
use super::{json_scalar, CanonicalMetadata};

/// Bracketed LoRA reference, no nesting.
static LORA_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<lora:[^<>]+>").expect("invalid LoRA tag pattern"));

/// Start of the structured tail: "Steps:" (or "Step:") at a line start or
/// after a comma. The last occurrence wins.
static TAIL_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\n|, ?)(steps?\s*:)").expect("invalid tail pattern"));

/// Keys whose presence on a line ends a negative-prompt continuation.
const SECTION_KEYS: &[&str] = &["steps:", "sampler:", "cfg scale:", "seed:", "size:", "model:"];

const NEGATIVE_PROMPT_PREFIX: &str = "negative prompt:";

/// Parse one free-text parameters blob into a partial record.
pub fn parse_parameter_string(blob: &str) -> CanonicalMetadata {
    let mut meta = CanonicalMetadata::default();
    let trimmed = blob.trim();
    if trimmed.is_empty() {
        return meta;
    }

    // LoRA extraction is additive: tags stay part of the prompt text.
    for tag in LORA_TAG.find_iter(trimmed) {
        meta.lora_tags.push(tag.as_str().to_string());
    }

    // Some tools embed the whole blob as a JSON object; that short-circuits
    // the text scan, tools default included.
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(prompt) = object.get("prompt").and_then(Value::as_str) {
            meta.prompt = prompt.to_string();
        }
        if let Some(negative) = object.get("negative").and_then(Value::as_str) {
            meta.negative_prompt = negative.to_string();
        }
        if let Some(seed) = object.get("seed").and_then(json_scalar) {
            meta.seed = seed;
        }
        return meta;
    }

    let (head, tail) = split_structured_tail(trimmed);
    parse_prompts(head, &mut meta);
    let found_keys = parse_tail(tail, &mut meta);

    meta.model = clean_model_identifier(&meta.model);
    meta.model_name = clean_model_identifier(&meta.model_name);

    // Plain caption: no parameter keys anywhere and nothing else claimed the
    // text, so the whole blob is the prompt.
    if !found_keys && meta.prompt.is_empty() && meta.negative_prompt.is_empty() {
        meta.prompt = trimmed.to_string();
    }

    default_tools(&mut meta);
    meta
}

/// This dialect's originating tool family.
fn default_tools(meta: &mut CanonicalMetadata) {
    if meta.tools.is_empty() {
        meta.tools.insert("Stable Diffusion".to_string());
    }
}

/// Locate the trailing parameter section. Returns `(head, tail)`; the tail is
/// empty when no "Steps:" marker exists.
///
/// The search runs from the end at line granularity: the tail begins at the
/// first marker on the last line carrying one, so a "Steps:" buried in
/// earlier prompt text never truncates the prompt.
fn split_structured_tail(text: &str) -> (&str, &str) {
    // (line_start, head_end, tail_start)
    let mut best: Option<(usize, usize, usize)> = None;
    for caps in TAIL_START.captures_iter(text) {
        if let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) {
            let line_start = text[..whole.start()].rfind('\n').map_or(0, |i| i + 1);
            match best {
                Some((previous, _, _)) if previous >= line_start => {}
                _ => best = Some((line_start, whole.start(), key.start())),
            }
        }
    }
    match best {
        Some((_, head_end, tail_start)) => (&text[..head_end], &text[tail_start..]),
        None => (text, ""),
    }
}

/// Split the head into the positive prompt and the "Negative prompt:"
/// continuation.
fn parse_prompts(head: &str, meta: &mut CanonicalMetadata) {
    let mut prompt_lines: Vec<&str> = Vec::new();
    let mut negative: Option<String> = None;
    let mut negative_done = false;

    for line in head.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lowered = line.to_lowercase();

        if negative.is_none() && lowered.starts_with(NEGATIVE_PROMPT_PREFIX) {
            negative = Some(line[NEGATIVE_PROMPT_PREFIX.len()..].trim().to_string());
        } else if let Some(text) = negative.as_mut() {
            if negative_done {
                continue;
            }
            if SECTION_KEYS.iter().any(|key| lowered.contains(key)) {
                negative_done = true;
            } else {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(line);
            }
        } else {
            prompt_lines.push(line);
        }
    }

    let prompt = prompt_lines.join("\n");
    let prompt = prompt
        .trim()
        .trim_end_matches(|c: char| c == ',' || c == ' ');
    fill(&mut meta.prompt, prompt);

    if let Some(negative) = negative {
        fill(&mut meta.negative_prompt, negative.trim());
    }
}

/// Parse the comma-separated key/value tail. Returns whether any known
/// parameter key matched.
fn parse_tail(tail: &str, meta: &mut CanonicalMetadata) -> bool {
    let mut found = false;
    let mut module_index = 0usize;

    for segment in tail.split(',') {
        let Some((raw_key, raw_value)) = segment.split_once(':') else {
            continue;
        };
        let key = raw_key.trim().to_lowercase();
        let value = raw_value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        found |= assign_parameter(meta, &key, value, &mut module_index);
    }

    found
}

/// Substring-based key dispatch. First match wins per canonical field; a
/// duplicate key later in the same blob never overwrites.
fn assign_parameter(
    meta: &mut CanonicalMetadata,
    key: &str,
    value: &str,
    module_index: &mut usize,
) -> bool {
    if key.contains("module") {
        // Dynamic slot named after the key's second word ("Module 1" -> 1).
        let slot = key
            .split_whitespace()
            .nth(1)
            .map(str::to_string)
            .unwrap_or_else(|| module_index.to_string());
        *module_index += 1;
        meta.modules
            .entry(format!("module_{slot}"))
            .or_insert_with(|| value.to_string());
        return true;
    }

    if key.contains("model hash") {
        fill(&mut meta.model_hash, value);
    } else if key.contains("model name") {
        fill(&mut meta.model_name, value);
        fill(&mut meta.model, value);
    } else if key.contains("model") && !key.contains("hash") && !key.contains("name") {
        fill(&mut meta.model, value);
        fill(&mut meta.model_name, value);
    } else if key.contains("schedule") {
        // "schedule" and "schedule type" are treated as synonyms.
        fill(&mut meta.schedule_type, value);
    } else if key.contains("distilled cfg") {
        fill(&mut meta.distilled_cfg_scale, value);
    } else if key.contains("cfg") {
        fill(&mut meta.cfg_scale, value);
    } else if key.contains("clip skip") {
        fill(&mut meta.clip_skip, value);
    } else if key.contains("sampler") {
        fill(&mut meta.sampler, value);
    } else if key.contains("step") {
        fill(&mut meta.steps, value);
    } else if key.contains("seed") {
        fill(&mut meta.seed, value);
    } else if key.contains("size") {
        fill(&mut meta.size, value);
    } else if key.contains("version") {
        fill(&mut meta.version, value);
    } else {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_with_tail() {
        let meta = parse_parameter_string(
            "a cat, Steps: 20, Sampler: Euler, CFG scale: 7, Seed: 42, Size: 512x512, Model: foo.safetensors",
        );
        assert_eq!(meta.prompt, "a cat");
        assert_eq!(meta.steps, "20");
        assert_eq!(meta.sampler, "Euler");
        assert_eq!(meta.cfg_scale, "7");
        assert_eq!(meta.seed, "42");
        assert_eq!(meta.size, "512x512");
        assert_eq!(meta.model, "foo");
        assert_eq!(meta.model_name, "foo");
    }

    #[test]
    fn negative_prompt_section() {
        let meta = parse_parameter_string(
            "portrait\nNegative prompt: blurry, low quality\nSteps: 30, Sampler: DPM++ 2M",
        );
        assert_eq!(meta.prompt, "portrait");
        assert_eq!(meta.negative_prompt, "blurry, low quality");
        assert_eq!(meta.steps, "30");
        assert_eq!(meta.sampler, "DPM++ 2M");
    }

    #[test]
    fn negative_prompt_continuation_lines() {
        let meta = parse_parameter_string(
            "scenery\nNegative prompt: blurry\nwatermark\ntext\nSteps: 25, Seed: 9",
        );
        assert_eq!(meta.prompt, "scenery");
        assert_eq!(meta.negative_prompt, "blurry watermark text");
        assert_eq!(meta.steps, "25");
        assert_eq!(meta.seed, "9");
    }

    #[test]
    fn empty_blob_is_all_empty() {
        let meta = parse_parameter_string("   \n  ");
        assert_eq!(meta, CanonicalMetadata::default());
        assert!(meta.tools.is_empty());
        assert!(meta.lora_tags.is_empty());
    }

    #[test]
    fn json_blob_short_circuits() {
        let meta = parse_parameter_string(
            r#"{"prompt": "a dog", "negative": "cat", "seed": 1234, "steps": 50}"#,
        );
        assert_eq!(meta.prompt, "a dog");
        assert_eq!(meta.negative_prompt, "cat");
        assert_eq!(meta.seed, "1234");
        // "steps" is not part of the JSON dialect mapping.
        assert!(meta.steps.is_empty());
        // Short-circuit skips the tools default along with the text scan.
        assert!(meta.tools.is_empty());
    }

    #[test]
    fn lora_tags_are_additive() {
        let meta = parse_parameter_string(
            "a castle <lora:gothic:0.8> at dusk <lora:mist:0.5>, Steps: 20, Seed: 1",
        );
        assert_eq!(
            meta.lora_tags,
            vec!["<lora:gothic:0.8>".to_string(), "<lora:mist:0.5>".to_string()]
        );
        // Tags remain inside the prompt text.
        assert!(meta.prompt.contains("<lora:gothic:0.8>"));
    }

    #[test]
    fn plain_caption_fallback() {
        let meta = parse_parameter_string("just a sunny afternoon in the park");
        assert_eq!(meta.prompt, "just a sunny afternoon in the park");
        assert!(meta.tools.contains("Stable Diffusion"));
    }

    #[test]
    fn duplicate_keys_keep_first_value() {
        let meta = parse_parameter_string("x, Steps: 10, Steps: 99, Seed: 1, Seed: 2");
        assert_eq!(meta.steps, "10");
        assert_eq!(meta.seed, "1");
    }

    #[test]
    fn extended_keys() {
        let meta = parse_parameter_string(
            "y, Steps: 20, Schedule type: Karras, Distilled CFG scale: 3.5, CFG scale: 7, \
             Clip skip: 2, Model hash: 31e35c80fc, Model name: \"dreamshaper.safetensors\", \
             Version: v1.10.1",
        );
        assert_eq!(meta.schedule_type, "Karras");
        assert_eq!(meta.distilled_cfg_scale, "3.5");
        assert_eq!(meta.cfg_scale, "7");
        assert_eq!(meta.clip_skip, "2");
        assert_eq!(meta.model_hash, "31e35c80fc");
        assert_eq!(meta.model, "dreamshaper");
        assert_eq!(meta.model_name, "dreamshaper");
        assert_eq!(meta.version, "v1.10.1");
    }

    #[test]
    fn module_keys_get_dynamic_slots() {
        let meta =
            parse_parameter_string("z, Steps: 20, Module 1: lcm, Module 2: taesd, Seed: 4");
        assert_eq!(meta.modules.get("module_1").map(String::as_str), Some("lcm"));
        assert_eq!(meta.modules.get("module_2").map(String::as_str), Some("taesd"));
    }

    #[test]
    fn bare_model_key_excludes_hash_and_name() {
        let meta = parse_parameter_string("w, Steps: 20, Model hash: abc123, Model: real.safetensors");
        assert_eq!(meta.model_hash, "abc123");
        assert_eq!(meta.model, "real");
        assert_eq!(meta.model_name, "real");
    }

    #[test]
    fn last_steps_marker_starts_the_tail() {
        // "Steps:" inside the prompt text must not truncate it; the search
        // runs from the end.
        let meta = parse_parameter_string(
            "a recipe with Steps: one and two\nNegative prompt: bad\nSteps: 15, Seed: 7",
        );
        assert_eq!(meta.steps, "15");
        assert_eq!(meta.seed, "7");
        assert_eq!(meta.negative_prompt, "bad");
    }

    #[test]
    fn tools_default_applies_once() {
        let meta = parse_parameter_string("v, Steps: 20");
        assert_eq!(meta.tools.len(), 1);
        assert!(meta.tools.contains("Stable Diffusion"));
    }
}
