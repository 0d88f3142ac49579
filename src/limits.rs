/// Snapshot bodies shorter than this are treated as a transient empty
/// response and re-requested once.
pub const SHORT_SNAPSHOT_BODY_CHARS: usize = 100;

/// Default cap on concurrent location-details requests per fetch cycle.
pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 8;

/// Upper bound accepted for `FINDROOM_RESOLVE_CONCURRENCY`.
pub const MAX_RESOLVE_CONCURRENCY: usize = 64;

/// Largest `hours_from_now` / `duration_hours` the front end accepts (one year).
pub const MAX_QUERY_HOURS: u32 = 24 * 366;

/// Default lifetime stamped on bundles whose source gives no expiry.
pub const DEFAULT_BUNDLE_LIFETIME_SECS: i64 = 2 * 60 * 60;
