//! File encodings and canonical JSON.
//!
//! Canonical JSON has every object's keys sorted so that equal values always
//! encode to the same bytes; design hashes are taken over it.

use std::path::Path;

use expt_core::errors::{ErrorInfo, ExptError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

fn codec_error(code: &str, err: impl ToString) -> ExptError {
    ExptError::Serde(ErrorInfo::new(code, err.to_string()))
}

/// Encoding of snapshot and definition files, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Canonical, indented JSON.
    Json,
    /// YAML, for `.yaml` and `.yml` files.
    Yaml,
}

impl FileFormat {
    /// Format implied by the path's extension; JSON unless it is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                FileFormat::Yaml
            }
            _ => FileFormat::Json,
        }
    }

    /// Encodes `value` in this format.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, ExptError> {
        match self {
            FileFormat::Json => canonical_json(value, true),
            FileFormat::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|err| codec_error("yaml-encode", err)),
        }
    }

    /// Decodes a value from bytes in this format.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, ExptError> {
        match self {
            FileFormat::Json => {
                serde_json::from_slice(bytes).map_err(|err| codec_error("json-decode", err))
            }
            FileFormat::Yaml => {
                serde_yaml::from_slice(bytes).map_err(|err| codec_error("yaml-decode", err))
            }
        }
    }
}

fn sort_keys(value: &mut Json) {
    match value {
        Json::Object(map) => {
            let mut entries: Vec<(String, Json)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|left, right| left.0.cmp(&right.0));
            for (_, nested) in &mut entries {
                sort_keys(nested);
            }
            map.extend(entries);
        }
        Json::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// JSON with sorted object keys, compact or indented.
pub fn canonical_json<T: Serialize>(value: &T, pretty: bool) -> Result<Vec<u8>, ExptError> {
    let mut json = serde_json::to_value(value).map_err(|err| codec_error("json-encode", err))?;
    sort_keys(&mut json);
    let encoded = if pretty {
        serde_json::to_vec_pretty(&json)
    } else {
        serde_json::to_vec(&json)
    };
    encoded.map_err(|err| codec_error("json-encode", err))
}

/// Hex SHA-256 of the compact canonical JSON of `value`.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, ExptError> {
    let bytes = canonical_json(value, false)?;
    Ok(format!("{:x}", Sha256::digest(bytes)))
}
