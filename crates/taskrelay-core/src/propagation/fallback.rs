//! Vendor fallback: `googclient_*` keys written by Google Cloud client
//! libraries on Pub/Sub messages.
//!
//! - `googclient_trace_id`: 32 hex digits, optional `0x` prefix
//! - `googclient_span_id`: 16 hex digits, or an unsigned decimal integer
//! - `googclient_sampling` / `googclient_sampled`: `1`, `true` or `sampled`

use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

use super::carrier::MapExtractor;

pub const TRACE_ID_KEY: &str = "googclient_trace_id";
pub const SPAN_ID_KEY: &str = "googclient_span_id";
pub const SAMPLING_KEYS: [&str; 2] = ["googclient_sampling", "googclient_sampled"];

/// Returns a valid remote span context, or None so the caller can fall back
/// to the standard extractor.
pub fn extract(carrier: &MapExtractor<'_>) -> Option<SpanContext> {
    let trace_raw = carrier.lookup(TRACE_ID_KEY).filter(|v| !v.is_empty())?;
    let span_raw = carrier.lookup(SPAN_ID_KEY).filter(|v| !v.is_empty())?;

    let trace_id = parse_trace_id(trace_raw)?;
    let span_id = parse_span_id(span_raw)?;
    let sampled = SAMPLING_KEYS
        .iter()
        .filter_map(|key| carrier.lookup(key))
        .any(is_sampled_flag);
    let flags = if sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };

    let span = SpanContext::new(trace_id, span_id, flags, true, TraceState::default());
    span.is_valid().then_some(span)
}

fn strip(raw: &str) -> &str {
    raw.strip_prefix("0x").unwrap_or(raw).trim()
}

fn parse_trace_id(raw: &str) -> Option<TraceId> {
    let hex = strip(raw);
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    TraceId::from_hex(hex).ok()
}

fn parse_span_id(raw: &str) -> Option<SpanId> {
    let value = strip(raw);
    if value.len() == 16 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return SpanId::from_hex(value).ok();
    }
    let decimal: u64 = value.parse().ok()?;
    Some(SpanId::from_bytes(decimal.to_be_bytes()))
}

fn is_sampled_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "sampled"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::*;

    fn carrier(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn decimal_span_id_and_prefixed_trace_id() {
        let map = carrier(&[
            (TRACE_ID_KEY, "0xABCDEF0123456789ABCDEF0123456789"),
            (SPAN_ID_KEY, "1234"),
            ("googclient_sampling", "true"),
        ]);

        let span = extract(&MapExtractor(&map)).unwrap();
        assert_eq!(
            span.trace_id().to_string(),
            "abcdef0123456789abcdef0123456789"
        );
        assert_eq!(span.span_id().to_string(), "00000000000004d2");
        assert!(span.is_sampled());
        assert!(span.is_remote());
    }

    #[test]
    fn hex_span_id_is_taken_as_is() {
        let map = carrier(&[
            (TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736"),
            (SPAN_ID_KEY, " 00f067aa0ba902b7 "),
        ]);

        let span = extract(&MapExtractor(&map)).unwrap();
        assert_eq!(span.span_id().to_string(), "00f067aa0ba902b7");
        assert!(!span.is_sampled());
    }

    #[rstest]
    #[case::missing_span(&[(TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736")])]
    #[case::missing_trace(&[(SPAN_ID_KEY, "1234")])]
    #[case::short_trace(&[(TRACE_ID_KEY, "4bf92f35"), (SPAN_ID_KEY, "1234")])]
    #[case::zero_trace(&[(TRACE_ID_KEY, "00000000000000000000000000000000"), (SPAN_ID_KEY, "1234")])]
    #[case::zero_span(&[(TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736"), (SPAN_ID_KEY, "0")])]
    #[case::garbage_span(&[(TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736"), (SPAN_ID_KEY, "span-1")])]
    #[case::negative_span(&[(TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736"), (SPAN_ID_KEY, "-5")])]
    fn invalid_inputs_yield_nothing(#[case] pairs: &[(&str, &str)]) {
        let map = carrier(pairs);
        assert!(extract(&MapExtractor(&map)).is_none());
    }

    #[rstest]
    #[case("1", true)]
    #[case("TRUE", true)]
    #[case(" sampled ", true)]
    #[case("0", false)]
    #[case("false", false)]
    #[case("yes", false)]
    fn sampling_flag_values(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(is_sampled_flag(raw), expected);
    }

    #[test]
    fn either_sampling_key_counts() {
        let map = carrier(&[
            (TRACE_ID_KEY, "4bf92f3577b34da6a3ce929d0e0e4736"),
            (SPAN_ID_KEY, "99"),
            ("googclient_sampled", "1"),
        ]);
        assert!(extract(&MapExtractor(&map)).unwrap().is_sampled());
    }
}
