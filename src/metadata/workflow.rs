// SPDX-License-Identifier: MIT

//! Parsers for workflow-graph JSON (ComfyUI lineage), in both exported
//! shapes.
//!
//! Shape detection is structural; the dialect carries no explicit format
//! tag. Field assignment is first-writer-wins across nodes, so a node graph
//! can only fill slots still empty.

use serde_json::Value;

use super::merge::{clean_model_identifier, fill};
use super::{json_scalar, CanonicalMetadata};

const TOOL_COMFYUI: &str = "ComfyUI";

/// The two structurally distinct graph exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowShape {
    /// Object keyed by node id, each value carrying `class_type`/`inputs`.
    Api,
    /// Object with a `nodes` array of typed nodes and positional
    /// `widgets_values`.
    NodeArray,
}

/// Detect which export shape a parsed JSON value has, if any.
pub fn detect_shape(root: &Value) -> Option<WorkflowShape> {
    let object = root.as_object()?;
    if object.get("nodes").is_some_and(Value::is_array) {
        return Some(WorkflowShape::NodeArray);
    }
    if object.values().any(|node| node.get("class_type").is_some()) {
        return Some(WorkflowShape::Api);
    }
    None
}

/// Parse the API export shape.
pub fn parse_api_graph(root: &Value) -> CanonicalMetadata {
    let mut meta = CanonicalMetadata::default();
    let Some(object) = root.as_object() else {
        return meta;
    };
    meta.tools.insert(TOOL_COMFYUI.to_string());

    for node in object.values() {
        let Some(class) = node.get("class_type").and_then(Value::as_str) else {
            continue;
        };
        let Some(inputs) = node.get("inputs") else {
            continue;
        };
        match class {
            "KSampler" => {
                fill_scalar(&mut meta.seed, inputs.get("seed"));
                fill_scalar(&mut meta.steps, inputs.get("steps"));
                fill_scalar(&mut meta.cfg_scale, inputs.get("cfg"));
                fill_scalar(&mut meta.sampler, inputs.get("sampler_name"));
                fill_scalar(&mut meta.schedule_type, inputs.get("scheduler"));
            }
            "CheckpointLoaderSimple" | "CheckpointLoader" => {
                if let Some(name) = inputs.get("ckpt_name").and_then(Value::as_str) {
                    let cleaned = clean_model_identifier(name);
                    fill(&mut meta.model, &cleaned);
                    fill(&mut meta.model_name, &cleaned);
                }
            }
            "CLIPTextEncode" => {
                // No positive/negative tag in this shape: blank text marks
                // the negative slot, anything else is a positive candidate.
                if let Some(text) = inputs.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        fill(&mut meta.prompt, text);
                    }
                }
            }
            _ => {}
        }
    }

    meta
}

/// Parse the UI/node-array export shape.
pub fn parse_node_array(root: &Value) -> CanonicalMetadata {
    let mut meta = CanonicalMetadata::default();
    let Some(nodes) = root.get("nodes").and_then(Value::as_array) else {
        return meta;
    };
    meta.tools.insert(TOOL_COMFYUI.to_string());

    for node in nodes {
        let Some(node_type) = node.get("type").and_then(Value::as_str) else {
            continue;
        };
        let widgets = node
            .get("widgets_values")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match node_type {
            "CheckpointLoaderSimple" | "CheckpointLoader" => {
                if let Some(name) = widgets.first().and_then(Value::as_str) {
                    let cleaned = clean_model_identifier(name);
                    fill(&mut meta.model, &cleaned);
                    fill(&mut meta.model_name, &cleaned);
                }
            }
            // widgets_values is positional; index 1 is the seed-control
            // widget and carries no parameter.
            "KSampler" if widgets.len() >= 7 => {
                fill_scalar(&mut meta.seed, widgets.first());
                fill_scalar(&mut meta.steps, widgets.get(2));
                fill_scalar(&mut meta.cfg_scale, widgets.get(3));
                fill_scalar(&mut meta.sampler, widgets.get(4));
                fill_scalar(&mut meta.schedule_type, widgets.get(5));
            }
            "CLIPTextEncode" => {
                let Some(text) = widgets.first().and_then(Value::as_str) else {
                    continue;
                };
                match node.get("title").and_then(Value::as_str) {
                    Some("Positive Prompt") => fill(&mut meta.prompt, text),
                    Some("Negative Prompt") => fill(&mut meta.negative_prompt, text),
                    _ => {
                        if meta.prompt.is_empty() && !text.trim().is_empty() {
                            meta.prompt = text.to_string();
                        }
                    }
                }
            }
            _ => {}
        }
    }

    meta
}

fn fill_scalar(dst: &mut String, value: Option<&Value>) {
    if let Some(text) = value.and_then(json_scalar) {
        fill(dst, &text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_graph_scenario() {
        let graph = json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 7, "steps": 25, "cfg": 8,
                    "sampler_name": "euler", "scheduler": "normal"
                }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "sdxl.safetensors" }
            }
        });
        let meta = parse_api_graph(&graph);
        assert_eq!(meta.seed, "7");
        assert_eq!(meta.steps, "25");
        assert_eq!(meta.cfg_scale, "8");
        assert_eq!(meta.sampler, "euler");
        assert_eq!(meta.schedule_type, "normal");
        assert_eq!(meta.model, "sdxl");
        assert_eq!(meta.model_name, "sdxl");
        assert!(meta.tools.contains("ComfyUI"));
    }

    #[test]
    fn api_graph_blank_text_is_not_a_prompt() {
        let graph = json!({
            "1": { "class_type": "CLIPTextEncode", "inputs": { "text": "   " } },
            "2": { "class_type": "CLIPTextEncode", "inputs": { "text": "a forest" } }
        });
        let meta = parse_api_graph(&graph);
        assert_eq!(meta.prompt, "a forest");
        assert!(meta.negative_prompt.is_empty());
    }

    #[test]
    fn api_graph_first_qualifying_node_wins() {
        let graph = json!({
            "1": { "class_type": "CLIPTextEncode", "inputs": { "text": "first" } },
            "2": { "class_type": "CLIPTextEncode", "inputs": { "text": "second" } }
        });
        assert_eq!(parse_api_graph(&graph).prompt, "first");
    }

    #[test]
    fn node_array_positional_widgets() {
        let graph = json!({
            "nodes": [
                {
                    "type": "KSampler",
                    "widgets_values": [99, "randomize", 30, 6.5, "dpmpp_2m", "karras", 1.0]
                },
                {
                    "type": "CheckpointLoaderSimple",
                    "widgets_values": ["\"anything-v5.safetensors\""]
                }
            ]
        });
        let meta = parse_node_array(&graph);
        assert_eq!(meta.seed, "99");
        assert_eq!(meta.steps, "30");
        assert_eq!(meta.cfg_scale, "6.5");
        assert_eq!(meta.sampler, "dpmpp_2m");
        assert_eq!(meta.schedule_type, "karras");
        assert_eq!(meta.model, "anything-v5");
        assert!(meta.tools.contains("ComfyUI"));
    }

    #[test]
    fn node_array_short_ksampler_is_skipped() {
        let graph = json!({
            "nodes": [
                { "type": "KSampler", "widgets_values": [99, "fixed", 30] }
            ]
        });
        let meta = parse_node_array(&graph);
        assert!(meta.seed.is_empty());
        assert!(meta.steps.is_empty());
    }

    #[test]
    fn node_array_titles_route_prompts() {
        let graph = json!({
            "nodes": [
                {
                    "type": "CLIPTextEncode",
                    "title": "Negative Prompt",
                    "widgets_values": ["ugly, deformed"]
                },
                {
                    "type": "CLIPTextEncode",
                    "title": "Positive Prompt",
                    "widgets_values": ["a mountain lake"]
                }
            ]
        });
        let meta = parse_node_array(&graph);
        assert_eq!(meta.prompt, "a mountain lake");
        assert_eq!(meta.negative_prompt, "ugly, deformed");
    }

    #[test]
    fn node_array_untitled_text_becomes_prompt_once() {
        let graph = json!({
            "nodes": [
                { "type": "CLIPTextEncode", "widgets_values": ["first text"] },
                { "type": "CLIPTextEncode", "widgets_values": ["second text"] }
            ]
        });
        assert_eq!(parse_node_array(&graph).prompt, "first text");
    }

    #[test]
    fn detect_shape_distinguishes_exports() {
        let api = json!({ "9": { "class_type": "KSampler", "inputs": {} } });
        let ui = json!({ "nodes": [], "links": [] });
        let neither = json!({ "hello": "world" });
        assert_eq!(detect_shape(&api), Some(WorkflowShape::Api));
        assert_eq!(detect_shape(&ui), Some(WorkflowShape::NodeArray));
        assert_eq!(detect_shape(&neither), None);
        assert_eq!(detect_shape(&json!([1, 2])), None);
    }

    #[test]
    fn missing_keys_degrade_to_empty() {
        let graph = json!({
            "1": { "class_type": "KSampler" },
            "2": { "class_type": "CheckpointLoaderSimple", "inputs": {} }
        });
        let meta = parse_api_graph(&graph);
        assert!(meta.seed.is_empty());
        assert!(meta.model.is_empty());
        // Shape was still recognized.
        assert!(meta.tools.contains("ComfyUI"));
    }
}
