use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::DISK_BACKEND_NAME;
use crate::{Error, Result};

/// Resolved addressing structure for a file object: which backend serves it,
/// the ordered chunk paths/URIs composing it, and free-form extra options.
///
/// A spec with an empty `backend_name` is a plain set of local files.
/// The JSON encoding round-trips losslessly: unknown string keys land in
/// `extras` and are re-emitted on serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "storage", default, skip_serializing_if = "String::is_empty")]
    pub backend_name: String,
    #[serde(rename = "filename", default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(rename = "source_uri", default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<String>,
    #[serde(rename = "chunk_sizes", default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_sizes: Vec<u64>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, String>,
}

impl FileSpec {
    pub fn from_chunks(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            ..Default::default()
        }
    }

    pub fn with_backend(backend_name: impl Into<String>, chunks: Vec<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            chunks,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backend_name.is_empty() && self.chunks.is_empty() && self.uri.is_empty()
    }

    pub fn is_disk(&self) -> bool {
        self.backend_name.is_empty() || self.backend_name == DISK_BACKEND_NAME
    }

    /// Smart parser accepting a plain local path, a JSON spec, or a URI.
    pub fn from_path_json_uri(path_json_uri: &str) -> Result<Self> {
        if path_json_uri.starts_with('{') {
            return Self::from_json(path_json_uri);
        }
        if let Some(colon) = path_json_uri.find(':') {
            if colon >= 2 && is_uri_scheme(&path_json_uri[..colon]) {
                return Self::from_uri(path_json_uri);
            }
        }
        Ok(Self::from_chunks(vec![path_json_uri.to_string()]))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::InvalidData("malformed file spec json"))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a `scheme:path?key=value&...` URI: the scheme names the
    /// backend, the path becomes chunk 0, query params become extras.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (scheme, path, params) = parse_uri(uri)?;
        Ok(Self {
            backend_name: scheme,
            uri: uri.to_string(),
            chunks: vec![path],
            extras: params,
            ..Default::default()
        })
    }

    pub fn has_chunk_sizes(&self) -> bool {
        !self.chunks.is_empty() && self.chunk_sizes.len() == self.chunks.len()
    }

    /// Total object size, when every chunk size is known.
    pub fn file_size(&self) -> Option<u64> {
        if self.has_chunk_sizes() {
            Some(self.chunk_sizes.iter().sum())
        } else {
            None
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        if !self.file_name.is_empty() {
            return Some(&self.file_name);
        }
        self.chunks
            .first()
            .and_then(|chunk| chunk.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }

    pub fn source_location(&self) -> &str {
        if !self.uri.is_empty() {
            &self.uri
        } else if !self.backend_name.is_empty() {
            &self.backend_name
        } else {
            DISK_BACKEND_NAME
        }
    }

    /// Signature of the addressed object, used to key index side-caches.
    pub fn signature(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.uri.as_bytes());
        for chunk in &self.chunks {
            hasher.update(chunk.as_bytes());
            hasher.update(b"\0");
        }
        hasher.finalize()
    }

    pub fn get_extra(&self, name: &str) -> Option<&str> {
        self.extras.get(name).map(String::as_str)
    }

    pub fn get_extra_as_bool(&self, name: &str, default: bool) -> bool {
        match self.get_extra(name) {
            Some(value) => value == "1" || value.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    pub fn get_extra_as_u64(&self, name: &str, default: u64) -> u64 {
        self.get_extra(name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_extra_as_f64(&self, name: &str, default: f64) -> f64 {
        self.get_extra(name)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    pub fn set_extra(&mut self, name: impl Into<String>, value: impl ToString) {
        self.extras.insert(name.into(), value.to_string());
    }

    pub fn unset_extra(&mut self, name: &str) {
        self.extras.remove(name);
    }
}

fn is_uri_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn parse_uri(uri: &str) -> Result<(String, String, BTreeMap<String, String>)> {
    let colon = uri.find(':').ok_or(Error::InvalidData("uri has no scheme"))?;
    let scheme = uri[..colon].to_ascii_lowercase();
    let mut rest = &uri[colon + 1..];
    if let Some(stripped) = rest.strip_prefix("//") {
        rest = stripped;
    }
    let (path, query) = match rest.find('?') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };
    let path = url_decode(path)?;
    if path.is_empty() {
        return Err(Error::InvalidData("uri has no path"));
    }
    let mut params = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = match pair.find('=') {
            Some(pos) => (&pair[..pos], &pair[pos + 1..]),
            None => (pair, ""),
        };
        let key = url_decode(key)?;
        if key.is_empty() {
            return Err(Error::InvalidData("uri query has empty key"));
        }
        params.insert(key, url_decode(value)?);
    }
    Ok((scheme, path, params))
}

fn url_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'%' => {
                let hex = input
                    .get(idx + 1..idx + 3)
                    .ok_or(Error::InvalidData("truncated percent escape"))?;
                let value = u8::from_str_radix(hex, 16)
                    .map_err(|_| Error::InvalidData("malformed percent escape"))?;
                out.push(value);
                idx += 3;
            }
            byte => {
                out.push(byte);
                idx += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| Error::InvalidData("uri is not valid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_extras() {
        let mut spec = FileSpec::with_backend(
            "custom",
            vec!["chunk0".to_string(), "chunk1".to_string()],
        );
        spec.file_name = "file.trv".to_string();
        spec.chunk_sizes = vec![100, 50];
        spec.set_extra("cache", "1");
        spec.set_extra("zone", "eu");
        let restored = FileSpec::from_json(&spec.to_json()).expect("json parse");
        assert_eq!(restored, spec);
    }

    #[test]
    fn plain_path_is_single_chunk_disk() {
        let spec = FileSpec::from_path_json_uri("/data/recording.trv").expect("parse");
        assert!(spec.is_disk());
        assert_eq!(spec.chunks, vec!["/data/recording.trv".to_string()]);
    }

    #[test]
    fn windows_style_path_is_not_a_uri() {
        let spec = FileSpec::from_path_json_uri("c:/data/recording.trv").expect("parse");
        assert!(spec.is_disk());
        assert_eq!(spec.chunks.len(), 1);
    }

    #[test]
    fn uri_names_backend_and_decodes_query() {
        let spec =
            FileSpec::from_path_json_uri("shard://bucket/a%20b?zone=us&cache=1").expect("parse");
        assert_eq!(spec.backend_name, "shard");
        assert_eq!(spec.chunks, vec!["bucket/a b".to_string()]);
        assert_eq!(spec.get_extra("zone"), Some("us"));
        assert!(spec.get_extra_as_bool("cache", false));
    }

    #[test]
    fn typed_extras_fall_back_to_defaults() {
        let spec = FileSpec::default();
        assert_eq!(spec.get_extra_as_u64("missing", 7), 7);
        assert_eq!(spec.get_extra_as_f64("missing", 0.5), 0.5);
    }
}
