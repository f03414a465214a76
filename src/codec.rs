//! Encoding collaborator: JSON request bodies, base64 image payloads, and
//! result formatting.
//!
//! The backend reports classification results as `('label', 'p.pppp')`
//! tuple text; [`format_result_json`] scrapes those pairs into a JSON
//! object for the response body. Text without any pairs is wrapped as
//! `{"result": ...}` so the body is always valid JSON.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::config::{IMAGE_BUF_SIZE, MODEL_NAME_SIZE};

#[derive(Debug)]
pub enum CodecError {
    /// Body is not the expected JSON object (missing field, bad syntax).
    Json(serde_json::Error),
    Base64(base64::DecodeError),
    ModelNameTooLong(usize),
    PayloadTooLarge(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Json(e) => write!(f, "bad request json: {e}"),
            CodecError::Base64(e) => write!(f, "bad base64 payload: {e}"),
            CodecError::ModelNameTooLong(n) => {
                write!(f, "model name too long: {n} > {MODEL_NAME_SIZE}")
            }
            CodecError::PayloadTooLarge(n) => {
                write!(f, "image payload too large: {n} > {IMAGE_BUF_SIZE}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(Deserialize)]
struct RequestBody {
    model_name: String,
    image_data: String,
}

/// Parse the request body into its two fields, enforcing the wire bounds.
/// The payload is returned exactly as received; base64 decoding happens on
/// the worker, not here.
pub fn parse_request_json(body: &[u8]) -> Result<(String, Vec<u8>), CodecError> {
    let parsed: RequestBody = serde_json::from_slice(body).map_err(CodecError::Json)?;
    if parsed.model_name.len() > MODEL_NAME_SIZE {
        return Err(CodecError::ModelNameTooLong(parsed.model_name.len()));
    }
    if parsed.image_data.len() > IMAGE_BUF_SIZE {
        return Err(CodecError::PayloadTooLarge(parsed.image_data.len()));
    }
    Ok((parsed.model_name, parsed.image_data.into_bytes()))
}

/// Strict standard-alphabet base64 decode.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    STANDARD.decode(data).map_err(CodecError::Base64)
}

/// Render a successful result as a JSON body. `('label', 'p.pppp')` pairs
/// become object entries; anything else is wrapped under `"result"`.
pub fn format_result_json(result: &str) -> Vec<u8> {
    let pairs = scan_label_pairs(result);
    let value = if pairs.is_empty() {
        serde_json::json!({ "result": result })
    } else {
        let mut map = serde_json::Map::new();
        for (label, prob) in pairs {
            map.insert(label, serde_json::Value::String(prob));
        }
        serde_json::Value::Object(map)
    };
    serde_json::to_vec(&value).unwrap_or_else(|_| b"{}".to_vec())
}

/// Render a failure body. Admitted requests always get an HTTP 200 with
/// this sentinel shape, never a hung connection.
pub fn format_error_json(reason: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "error": reason }))
        .unwrap_or_else(|_| b"{\"error\":\"inference failed\"}".to_vec())
}

/// Scan `('label', 'p.pppp')` pairs out of backend result text. Malformed
/// fragments are skipped, matching the tolerant scrape of the original
/// encoder.
fn scan_label_pairs(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("('") {
        rest = &rest[start + 2..];
        let Some(label_end) = rest.find('\'') else {
            break;
        };
        let label = rest[..label_end].to_string();
        rest = &rest[label_end + 1..];

        let t = rest.trim_start();
        let Some(t) = t.strip_prefix(',') else {
            continue;
        };
        let t = t.trim_start();
        let Some(t) = t.strip_prefix('\'') else {
            continue;
        };
        let Some(value_end) = t.find('\'') else {
            break;
        };
        let value = &t[..value_end];
        let after = t[value_end + 1..].trim_start();
        let Some(after) = after.strip_prefix(')') else {
            rest = &t[value_end + 1..];
            continue;
        };
        if is_probability(value) {
            out.push((label, value.to_string()));
        }
        rest = after;
    }
    out
}

/// `digits.digits`, the value shape the backend emits.
fn is_probability(value: &str) -> bool {
    match value.split_once('.') {
        Some((int, frac)) => {
            !int.is_empty()
                && !frac.is_empty()
                && int.bytes().all(|b| b.is_ascii_digit())
                && frac.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
