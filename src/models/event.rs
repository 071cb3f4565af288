//! Data models for tracking events flowing through the pipeline

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Tracking event carried by a single `dig?` request line
///
/// All fields are empty when the line did not contain a well-formed
/// tracking marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Page URL the beacon was fired from
    pub url: String,

    /// Client-side timestamp, kept as the raw string
    pub timestamp: String,

    /// Referrer of the page
    pub referrer: String,

    /// Browser user agent
    pub user_agent: String,
}

impl TrackingEvent {
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
            && self.timestamp.is_empty()
            && self.referrer.is_empty()
            && self.user_agent.is_empty()
    }
}

/// Stable visitor identity, the hex SHA-256 of `referrer ++ user_agent`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitorIdentity(String);

impl VisitorIdentity {
    /// Length of the hex digest in characters
    pub const LEN: usize = 64;

    pub fn fingerprint(referrer: &str, user_agent: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(referrer.as_bytes());
        hasher.update(user_agent.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Route-level view of an event, either fully populated or fully empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    /// Logical route (first path segment of the URL)
    pub route: String,

    /// Visitor id of the event
    pub visitor_id: String,

    /// Full page URL
    pub url: String,

    /// Raw event timestamp
    pub timestamp: String,
}

impl RouteRecord {
    pub fn new(route: String, visitor: &VisitorIdentity, event: &TrackingEvent) -> Self {
        Self {
            route,
            visitor_id: visitor.as_str().to_string(),
            url: event.url.clone(),
            timestamp: event.timestamp.clone(),
        }
    }

    /// The empty record attached to unclassifiable events
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.route.is_empty()
    }
}

/// One parsed line, as handed from a parser worker to both counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event: TrackingEvent,
    pub visitor: VisitorIdentity,
    pub record: RouteRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = VisitorIdentity::fingerprint("http://ref.com", "UA1");
        let b = VisitorIdentity::fingerprint("http://ref.com", "UA1");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), VisitorIdentity::LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("") is a fixed constant, so identities survive restarts
        let empty = VisitorIdentity::fingerprint("", "");
        assert_eq!(
            empty.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_differs_by_user_agent() {
        let a = VisitorIdentity::fingerprint("http://ref.com", "UA1");
        let b = VisitorIdentity::fingerprint("http://ref.com", "UA2");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_record() {
        let record = RouteRecord::empty();
        assert!(record.is_empty());
        assert!(record.visitor_id.is_empty());
        assert!(record.url.is_empty());
        assert!(record.timestamp.is_empty());
    }
}
