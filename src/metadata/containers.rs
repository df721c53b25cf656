// SPDX-License-Identifier: MIT

//! Container probing: pulls raw metadata blobs out of an image's embedded
//! side-channels.
//!
//! Every source is independent. A source that is absent or fails to decode
//! contributes nothing and never blocks the others; the only observable
//! outcome is fewer blobs.

use std::io::Cursor;

use quick_xml::events::Event;
use tracing::debug;

use super::merge::fill;
use super::{json_scalar, CanonicalMetadata};

/// Where a raw blob came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobOrigin {
    TextChunk,
    Exif,
    Xmp,
    WorkflowJson,
}

/// One tagged raw payload pulled from a side-channel, not yet parsed.
#[derive(Debug, Clone)]
pub struct RawMetadataBlob {
    pub source_tag: String,
    pub payload: String,
    pub origin: BlobOrigin,
}

/// Everything one pass over the containers yields: blobs in merge-precedence
/// order, plus fields that map directly without parsing.
#[derive(Debug, Default)]
pub struct ContainerScan {
    pub blobs: Vec<RawMetadataBlob>,
    pub direct: CanonicalMetadata,
}

/// Probe all known side-channels of an image.
///
/// Blob order encodes merge precedence: the "parameters" text chunk first,
/// then the auxiliary text chunks, EXIF, XMP, and finally workflow graphs.
pub fn scan_containers(bytes: &[u8]) -> ContainerScan {
    let mut scan = ContainerScan::default();
    let mut workflow_blobs = Vec::new();

    if let Some(chunks) = read_png_text_chunks(bytes) {
        collect_png_sources(&chunks, &mut scan, &mut workflow_blobs);
    }

    scan.blobs.extend(read_exif_fields(bytes));

    if let Some(description) = read_xmp_description(bytes) {
        scan.blobs.push(RawMetadataBlob {
            source_tag: "dc:description".to_string(),
            payload: description,
            origin: BlobOrigin::Xmp,
        });
    }

    scan.blobs.extend(workflow_blobs);
    scan
}

/// Actual pixel dimensions, the weakest `size` source.
pub fn probe_dimensions(bytes: &[u8]) -> Option<String> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(format!("{width}x{height}"))
}

fn collect_png_sources(
    chunks: &[(String, String)],
    scan: &mut ContainerScan,
    workflow_blobs: &mut Vec<RawMetadataBlob>,
) {
    // The singular "parameters" field is the dominant dialect and merges
    // ahead of everything else.
    for (key, text) in chunks {
        if key.eq_ignore_ascii_case("parameters") {
            scan.blobs.push(text_blob(key, text));
        }
    }

    for (key, text) in chunks {
        match key.to_lowercase().as_str() {
            "parameters" => {}
            "comment" | "description" => scan.blobs.push(text_blob(key, text)),
            "prompt" => {
                if looks_like_json(text) {
                    workflow_blobs.push(workflow_blob(key, text));
                } else {
                    scan.blobs.push(text_blob(key, text));
                }
            }
            "workflow" => {
                if looks_like_json(text) {
                    workflow_blobs.push(workflow_blob(key, text));
                }
            }
            "software" => {
                if text.to_lowercase().contains("stable diffusion") {
                    scan.direct.tools.insert("Stable Diffusion".to_string());
                }
            }
            "fooocus_prompt" => fill(&mut scan.direct.prompt, text),
            "fooocus_negative_prompt" => fill(&mut scan.direct.negative_prompt, text),
            "fooocus_seed" => fill(&mut scan.direct.seed, text),
            "fooocus_cfg" => fill(&mut scan.direct.cfg_scale, text),
            "fooocus_v2" => collect_fooocus_json(text, &mut scan.direct),
            _ => {}
        }
    }
}

fn text_blob(key: &str, text: &str) -> RawMetadataBlob {
    RawMetadataBlob {
        source_tag: key.to_string(),
        payload: text.to_string(),
        origin: BlobOrigin::TextChunk,
    }
}

fn workflow_blob(key: &str, text: &str) -> RawMetadataBlob {
    RawMetadataBlob {
        source_tag: key.to_string(),
        payload: text.to_string(),
        origin: BlobOrigin::WorkflowJson,
    }
}

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Fooocus v2 stores a JSON object; prompt/negative/seed map straight in.
fn collect_fooocus_json(text: &str, direct: &mut CanonicalMetadata) {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_str(text) else {
        return;
    };
    if let Some(prompt) = object.get("prompt").and_then(serde_json::Value::as_str) {
        fill(&mut direct.prompt, prompt);
    }
    if let Some(negative) = object.get("negative").and_then(serde_json::Value::as_str) {
        fill(&mut direct.negative_prompt, negative);
    }
    if let Some(seed) = object.get("seed").and_then(json_scalar) {
        fill(&mut direct.seed, &seed);
    }
}

/// Read tEXt/zTXt/iTXt keyword-value pairs. `None` when the bytes are not a
/// PNG or the header cannot be decoded.
fn read_png_text_chunks(bytes: &[u8]) -> Option<Vec<(String, String)>> {
    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if !bytes.starts_with(PNG_SIGNATURE) {
        return None;
    }

    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info().ok()?;
    // Text chunks may trail the image data; decode to the end so the info
    // struct sees those too.
    let _ = reader.finish();
    let info = reader.info();

    let mut chunks = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        chunks.push((chunk.keyword.clone(), chunk.text.clone()));
    }
    for chunk in &info.compressed_latin1_text {
        match chunk.get_text() {
            Ok(text) => chunks.push((chunk.keyword.clone(), text)),
            Err(e) => debug!("undecodable zTXt chunk '{}': {}", chunk.keyword, e),
        }
    }
    for chunk in &info.utf8_text {
        match chunk.get_text() {
            Ok(text) => chunks.push((chunk.keyword.clone(), text)),
            Err(e) => debug!("undecodable iTXt chunk '{}': {}", chunk.keyword, e),
        }
    }
    Some(chunks)
}

/// Decode EXIF `UserComment` / `ImageDescription`, tolerating invalid UTF-8.
fn read_exif_fields(bytes: &[u8]) -> Vec<RawMetadataBlob> {
    let mut blobs = Vec::new();
    let mut cursor = Cursor::new(bytes);
    let Ok(data) = exif::Reader::new().read_from_container(&mut cursor) else {
        return blobs;
    };

    let tags = [
        (exif::Tag::UserComment, "UserComment"),
        (exif::Tag::ImageDescription, "ImageDescription"),
    ];
    for (tag, name) in tags {
        let Some(field) = data.get_field(tag, exif::In::PRIMARY) else {
            continue;
        };
        if let Some(text) = decode_exif_text(&field.value) {
            blobs.push(RawMetadataBlob {
                source_tag: name.to_string(),
                payload: text,
                origin: BlobOrigin::Exif,
            });
        }
    }
    blobs
}

fn decode_exif_text(value: &exif::Value) -> Option<String> {
    let bytes: Vec<u8> = match value {
        exif::Value::Ascii(parts) => parts.concat(),
        exif::Value::Undefined(data, _) => {
            // UserComment leads with an 8-byte character-code marker.
            let data = data
                .strip_prefix(&b"ASCII\0\0\0"[..])
                .or_else(|| data.strip_prefix(&b"UNICODE\0"[..]))
                .unwrap_or(data);
            data.to_vec()
        }
        _ => return None,
    };
    let text = String::from_utf8_lossy(&bytes)
        .trim_matches('\0')
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// Locate the `<x:xmpmeta>` packet and pull the first `<dc:description>`
/// inner text.
fn read_xmp_description(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let start = text.find("<x:xmpmeta")?;
    let close = "</x:xmpmeta>";
    let end = text[start..].find(close)? + start + close.len();
    first_description(&text[start..end])
}

fn first_description(packet: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(packet);

    let mut depth = 0usize;
    let mut parts: Vec<String> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) if start.name().as_ref() == b"dc:description" => depth += 1,
            Ok(Event::End(end)) if end.name().as_ref() == b"dc:description" => {
                if depth <= 1 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Text(text)) if depth > 0 => {
                if let Ok(unescaped) = text.unescape() {
                    let unescaped = unescaped.trim();
                    if !unescaped.is_empty() {
                        parts.push(unescaped.to_string());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    let joined = parts.join(" ").trim().to_string();
    (!joined.is_empty()).then_some(joined)
}
