use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Unix milliseconds. The engine compares nothing else.
pub type Ms = i64;

/// Upstream room identifier (`RoomId`).
pub type RoomId = i64;

/// Upstream building identifier (`BuildingId`).
pub type BuildingId = i64;

/// Timestamp format of `BookingGMTStart` / `BookingGMTEnd` in snapshot records.
pub const SNAPSHOT_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Timestamp format the snapshot endpoint expects in its date filters.
pub const REQUEST_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Convert a naive upstream datetime to the engine's millisecond scale.
///
/// Upstream timestamps carry no offset, so both sides of every comparison go
/// through this same mapping.
pub fn to_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

/// Parse a snapshot timestamp (`YYYY-MM-DDTHH:MM:SS`).
pub fn parse_snapshot_ts(raw: &str) -> Result<Ms, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, SNAPSHOT_TS_FORMAT).map(to_ms)
}

/// A room descriptor as resolved from the location-details endpoint.
///
/// Rooms are immutable once cached; an entry is never refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub room_code: String,
    pub building_id: BuildingId,
    pub building_code: String,
    pub name: String,
}

impl Room {
    /// All fields concatenated and lowercased; what blacklist terms match against.
    pub fn rendered(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.room_id, self.room_code, self.building_id, self.building_code, self.name
        )
        .to_lowercase()
    }
}

/// One booking from a snapshot. Lives for a single fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booking {
    pub room_id: RoomId,
    pub building_id: BuildingId,
    pub span: Span,
}

/// The caller-requested window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl AvailabilityWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start <= end, "window start must not be after end");
        Self { start, end }
    }

    /// Window starting `hours_from_now` after `now` and lasting
    /// `duration_hours + padding_hours`.
    pub fn from_offsets(
        now: NaiveDateTime,
        hours_from_now: u32,
        duration_hours: u32,
        padding_hours: u32,
    ) -> Self {
        let start = now + Duration::hours(i64::from(hours_from_now));
        let end = start + Duration::hours(i64::from(duration_hours) + i64::from(padding_hours));
        Self { start, end }
    }

    pub fn span(&self) -> Span {
        Span::new(to_ms(self.start), to_ms(self.end))
    }
}

/// Headers and cookies of an authenticated upstream session plus advisory
/// validity metadata (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl CredentialBundle {
    /// Advisory only: nothing in the crate refuses a stale bundle.
    pub fn is_stale(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// `name=value; name=value` form for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn parse_snapshot_timestamp() {
        let ms = parse_snapshot_ts("2024-03-04T10:30:00").unwrap();
        assert_eq!(ms, to_ms(at(10, 30)));
        assert!(parse_snapshot_ts("2024-03-04 10:30:00").is_err());
        assert!(parse_snapshot_ts("yesterday").is_err());
    }

    #[test]
    fn window_from_offsets() {
        let w = AvailabilityWindow::from_offsets(at(8, 0), 2, 2, 0);
        assert_eq!(w.start, at(10, 0));
        assert_eq!(w.end, at(12, 0));

        let padded = AvailabilityWindow::from_offsets(at(8, 0), 2, 2, 1);
        assert_eq!(padded.end, at(13, 0));

        let empty = AvailabilityWindow::from_offsets(at(8, 0), 0, 0, 0);
        assert_eq!(empty.span().duration_ms(), 0);
    }

    #[test]
    fn rendered_is_lowercase_and_has_every_field() {
        let room = Room {
            room_id: 42,
            room_code: "GLN-3B".into(),
            building_id: 7,
            building_code: "GLNN".into(),
            name: "Storage Room 3B".into(),
        };
        let text = room.rendered();
        assert!(text.contains("42"));
        assert!(text.contains("gln-3b"));
        assert!(text.contains("7"));
        assert!(text.contains("glnn"));
        assert!(text.contains("storage room 3b"));
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let mut cookies = BTreeMap::new();
        cookies.insert("emsAuthToken".to_string(), "abc".to_string());
        cookies.insert("ASP.NET_SessionId".to_string(), "xyz".to_string());
        let bundle = CredentialBundle {
            headers: BTreeMap::new(),
            cookies,
            issued_at: 0,
            expires_at: 10,
        };
        assert_eq!(bundle.cookie_header(), "ASP.NET_SessionId=xyz; emsAuthToken=abc");
        assert!(!bundle.is_stale(9));
        assert!(bundle.is_stale(10));
    }
}
