//! Extraction of tracking events from raw access-log lines

use percent_encoding::percent_decode_str;
use url::form_urlencoded;

use crate::models::{ParsedEvent, RouteRecord, TrackingEvent, VisitorIdentity};

/// Marker that starts the tracking query string
pub const DIG_PREFIX: &str = "dig?";

/// Marker that ends the tracking query string (the request's protocol token)
pub const DIG_TERMINATOR: &str = "HTTP";

/// Scheme prefixes whose first path segment is a route
const ROUTE_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Slice out the query string between the prefix and terminator markers
fn dig_query(line: &str) -> Option<&str> {
    let line = line.trim();
    let start = line.find(DIG_PREFIX)? + DIG_PREFIX.len();
    let rest = &line[start..];
    let end = rest.find(DIG_TERMINATOR)?;
    Some(rest[..end].trim())
}

/// Decode a raw line into a tracking event
///
/// Lines without both markers produce an all-empty event. Repeated keys
/// keep their first value.
pub fn parse_line(line: &str) -> TrackingEvent {
    let Some(query) = dig_query(line) else {
        return TrackingEvent::default();
    };

    let mut event = TrackingEvent::default();
    let mut seen = [false; 4];

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (slot, field) = match &*key {
            "url" => (0, &mut event.url),
            "time" => (1, &mut event.timestamp),
            "refer" => (2, &mut event.referrer),
            "ua" => (3, &mut event.user_agent),
            _ => continue,
        };
        if !seen[slot] {
            seen[slot] = true;
            *field = value.into_owned();
        }
    }

    event
}

/// Logical route of a page URL: its first path segment, percent-decoded
///
/// The segment is taken verbatim from the URL text, so dot segments are not
/// resolved. Returns `None` for URLs without an `http://`/`https://` prefix,
/// without a host, or without a non-empty first path segment.
pub fn classify_route(url: &str) -> Option<String> {
    let rest = ROUTE_SCHEMES.iter().find_map(|scheme| {
        url.get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &url[scheme.len()..])
    })?;

    let host_end = rest.find(['/', '?', '#'])?;
    if host_end == 0 || !rest[host_end..].starts_with('/') {
        return None;
    }

    let path = &rest[host_end + 1..];
    let segment = &path[..path.find(['/', '?', '#']).unwrap_or(path.len())];
    if segment.is_empty() {
        return None;
    }

    Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
}

/// Parse a line and derive its visitor identity and route record
pub fn parse_event(line: &str) -> ParsedEvent {
    let event = parse_line(line);
    let visitor = VisitorIdentity::fingerprint(&event.referrer, &event.user_agent);
    let record = match classify_route(&event.url) {
        Some(route) => RouteRecord::new(route, &visitor, &event),
        None => RouteRecord::empty(),
    };

    ParsedEvent {
        event,
        visitor,
        record,
    }
}
