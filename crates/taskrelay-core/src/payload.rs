//! Task payload codec.
//!
//! The payload is what travels through the broker for one `http:forward`
//! task: the outbound body, the headers to replay, and the enqueue time.
//! Wire format is JSON with the body as standard base64:
//!
//! ```json
//! {"body":"aGVsbG8=","headers":{"x-request-id":"..."},"created_at":"2025-01-01T00:00:00Z"}
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode task payload: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("failed to decode task payload: {0}")]
    Decoding(#[source] serde_json::Error),
}

/// Immutable once built; the gateway assembles headers before construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(with = "base64_body", default)]
    body: Vec<u8>,

    #[serde(default, deserialize_with = "nullable_headers")]
    headers: BTreeMap<String, String>,

    created_at: DateTime<Utc>,
}

impl TaskPayload {
    pub fn new(body: Vec<u8>, headers: BTreeMap<String, String>, created_at: DateTime<Utc>) -> Self {
        Self {
            body,
            headers,
            created_at,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(PayloadError::Encoding)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(bytes).map_err(PayloadError::Decoding)
    }
}

// Producers in other languages emit `null` for an empty header map.
fn nullable_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
