//! Request identity: a UUIDv7 carried in `x-request-id`.

use std::fmt;

use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Validated request id. Keeps the caller's spelling so echoes match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Accept only version-7 UUIDs.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Uuid::parse_str(raw)
            .ok()
            .filter(|uuid| uuid.get_version_num() == 7)
            .map(|_| Self(raw.to_string()))
    }

    /// Keep a valid incoming id, otherwise mint a new one.
    pub fn from_incoming(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn valid_v7_is_kept_verbatim() {
        let incoming = Uuid::now_v7().to_string();
        let id = RequestId::from_incoming(Some(&incoming));
        assert_eq!(id.as_str(), incoming);
    }

    #[rstest]
    #[case::missing(None)]
    #[case::empty(Some(""))]
    #[case::garbage(Some("not-a-uuid"))]
    #[case::v4(Some("9b2f5c1e-8d4a-4f6b-9c3e-2a1d0e7f6b5a"))]
    fn anything_else_is_replaced_with_a_fresh_v7(#[case] incoming: Option<&str>) {
        let id = RequestId::from_incoming(incoming);
        assert_ne!(Some(id.as_str()), incoming);
        let uuid = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(uuid.get_version_num(), 7);
    }
}
