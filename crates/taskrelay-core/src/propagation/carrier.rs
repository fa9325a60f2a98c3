//! Text-map carriers for the two header shapes we propagate through.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};

/// Reads W3C headers from an HTTP header map.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Writes W3C headers into an HTTP header map. Invalid values are dropped.
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Reads from a payload header map. Exact key first, then case-insensitive,
/// since callers may have supplied `Traceparent` themselves.
pub struct MapExtractor<'a>(pub &'a BTreeMap<String, String>);

impl MapExtractor<'_> {
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

impl Extractor for MapExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.lookup(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// Writes into a payload header map, replacing any case variant of the key.
pub struct MapInjector<'a>(pub &'a mut BTreeMap<String, String>);

impl Injector for MapInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.0.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_extractor_falls_back_to_case_insensitive() {
        let mut map = BTreeMap::new();
        map.insert("Traceparent".to_string(), "tp".to_string());
        assert_eq!(MapExtractor(&map).get("traceparent"), Some("tp"));
    }

    #[test]
    fn map_injector_replaces_case_variants() {
        let mut map = BTreeMap::new();
        map.insert("TraceParent".to_string(), "old".to_string());
        MapInjector(&mut map).set("traceparent", "new".to_string());

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("traceparent").map(String::as_str), Some("new"));
    }

    #[test]
    fn header_injector_skips_invalid_values() {
        let mut headers = HeaderMap::new();
        HeaderInjector(&mut headers).set("tracestate", "bad\nvalue".to_string());
        assert!(headers.is_empty());
    }
}
