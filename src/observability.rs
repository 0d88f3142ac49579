use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: fetch cycles run. Labels: status.
pub const FETCH_CYCLES_TOTAL: &str = "findroom_fetch_cycles_total";

/// Histogram: fetch-cycle latency in seconds.
pub const FETCH_CYCLE_DURATION_SECONDS: &str = "findroom_fetch_cycle_duration_seconds";

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "findroom_http_requests_total";

// ── Upstream / cache ────────────────────────────────────────────

/// Counter: snapshot requests re-issued because the first body was too short.
pub const SNAPSHOT_RETRIES_TOTAL: &str = "findroom_snapshot_retries_total";

/// Counter: room lookups answered from the metadata cache.
pub const ROOM_CACHE_HITS_TOTAL: &str = "findroom_room_cache_hits_total";

/// Counter: room lookups that went to the location-details endpoint.
pub const ROOM_CACHE_MISSES_TOTAL: &str = "findroom_room_cache_misses_total";

/// Gauge: rooms held in the metadata cache.
pub const ROOM_CACHE_ENTRIES: &str = "findroom_room_cache_entries";

/// Counter: credential refresh attempts. Labels: status.
pub const CREDENTIAL_REFRESH_TOTAL: &str = "findroom_credential_refresh_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
