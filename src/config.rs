use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::UnlistedRooms;
use crate::limits::*;

/// Process configuration, read from `FINDROOM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub filters_path: PathBuf,
    pub metrics_port: Option<u16>,
    pub upstream_base: String,
    pub upstream_timeout: Duration,
    pub resolve_concurrency: usize,
    pub refresh_every: Duration,
    pub refresh_retry: Duration,
    /// File the external login agent writes; no refresher runs without it.
    pub bundle_file: Option<PathBuf>,
    pub unlisted: UnlistedRooms,
    pub window_padding_hours: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let data_dir = PathBuf::from(lookup("FINDROOM_DATA_DIR").unwrap_or_else(|| "./cache".into()));
        let include_unlisted = lookup("FINDROOM_INCLUDE_UNLISTED")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            bind: lookup("FINDROOM_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "FINDROOM_PORT").unwrap_or(8080),
            filters_path: lookup("FINDROOM_FILTERS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("filters.json")),
            metrics_port: parsed(&lookup, "FINDROOM_METRICS_PORT"),
            upstream_base: lookup("FINDROOM_UPSTREAM_BASE")
                .unwrap_or_else(|| "https://case.emscloudservice.com".into()),
            upstream_timeout: Duration::from_secs(
                parsed(&lookup, "FINDROOM_UPSTREAM_TIMEOUT_SECS").unwrap_or(30),
            ),
            resolve_concurrency: parsed(&lookup, "FINDROOM_RESOLVE_CONCURRENCY")
                .unwrap_or(DEFAULT_RESOLVE_CONCURRENCY)
                .clamp(1, MAX_RESOLVE_CONCURRENCY),
            refresh_every: Duration::from_secs(
                parsed(&lookup, "FINDROOM_REFRESH_SECS").unwrap_or(2 * 60 * 60),
            ),
            refresh_retry: Duration::from_secs(
                parsed(&lookup, "FINDROOM_REFRESH_RETRY_SECS").unwrap_or(60),
            ),
            bundle_file: lookup("FINDROOM_BUNDLE_FILE").map(PathBuf::from),
            unlisted: if include_unlisted {
                UnlistedRooms::IncludeCached
            } else {
                UnlistedRooms::Omit
            },
            window_padding_hours: parsed(&lookup, "FINDROOM_WINDOW_PADDING_HOURS").unwrap_or(0),
            data_dir,
        }
    }

    pub fn rooms_path(&self) -> PathBuf {
        self.data_dir.join("rooms.json")
    }

    pub fn auth_path(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }
}

#[derive(Debug, Deserialize)]
struct FiltersFile {
    #[serde(default)]
    blacklist: Vec<String>,
}

/// Read blacklist terms from a `{"blacklist": [...]}` file. A missing file
/// means no blacklist.
pub fn load_blacklist(path: &Path) -> io::Result<Vec<String>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let filters: FiltersFile =
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(filters.blacklist)
}
