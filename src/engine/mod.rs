mod availability;
mod error;
mod fetcher;
mod filter;

pub use availability::{is_conflict, room_is_free, select};
pub use error::FindError;
pub use fetcher::{BookingFetcher, GroupedBookings, RoomBookings};
pub use filter::{Blacklist, apply};

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::credentials::CredentialStore;
use crate::limits::DEFAULT_RESOLVE_CONCURRENCY;
use crate::model::*;
use crate::rooms::RoomCache;
use crate::upstream::Upstream;

/// What to do with rooms that have no booking at all in the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnlistedRooms {
    /// Never report them; the snapshot is the only source of rooms.
    #[default]
    Omit,
    /// Report every already-cached room that the snapshot does not mention.
    IncludeCached,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub resolve_concurrency: usize,
    pub unlisted: UnlistedRooms,
    pub blacklist: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            resolve_concurrency: DEFAULT_RESOLVE_CONCURRENCY,
            unlisted: UnlistedRooms::Omit,
            blacklist: Vec::new(),
        }
    }
}

/// Runs fetch cycles: credentials → snapshot → metadata → selection →
/// blacklist → sort.
pub struct Engine {
    credentials: Arc<CredentialStore>,
    rooms: Arc<RoomCache>,
    fetcher: BookingFetcher,
    blacklist: Blacklist,
    unlisted: UnlistedRooms,
}

impl Engine {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        credentials: Arc<CredentialStore>,
        rooms: Arc<RoomCache>,
        options: EngineOptions,
    ) -> Self {
        let fetcher = BookingFetcher::new(upstream, rooms.clone(), options.resolve_concurrency);
        Self {
            credentials,
            rooms,
            fetcher,
            blacklist: Blacklist::new(options.blacklist.as_slice()),
            unlisted: options.unlisted,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn rooms(&self) -> &RoomCache {
        &self.rooms
    }

    /// Available rooms for `window`, sorted by name. Fails as a whole; never
    /// returns a partial list.
    pub async fn find_rooms(&self, window: &AvailabilityWindow) -> Result<Vec<Room>, FindError> {
        let started = Instant::now();
        let result = self.run_cycle(window).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(FindError::CredentialAbsent) => {
                warn!("fetch cycle skipped: no credentials published yet");
                FindError::CredentialAbsent.label()
            }
            Err(e) => {
                error!("fetch cycle failed: {e}");
                e.label()
            }
        };
        metrics::counter!(crate::observability::FETCH_CYCLES_TOTAL, "status" => status).increment(1);
        metrics::histogram!(crate::observability::FETCH_CYCLE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn run_cycle(&self, window: &AvailabilityWindow) -> Result<Vec<Room>, FindError> {
        let creds = self.credentials.get().ok_or(FindError::CredentialAbsent)?;
        let grouped = self.fetcher.fetch(&creds, window).await?;

        let mut available = select(&window.span(), &grouped);
        if self.unlisted == UnlistedRooms::IncludeCached {
            available.extend(
                self.rooms
                    .all()
                    .into_iter()
                    .filter(|room| !grouped.contains(room.room_id)),
            );
        }

        let before_filter = available.len();
        let mut available = self.blacklist.apply(available);
        sort_by_name(&mut available);

        if let Err(e) = self.rooms.flush_blocking().await {
            warn!("room cache flush failed: {e}");
        }

        info!(
            "{} .. {}: {} rooms in snapshot, {} free, {} after blacklist",
            window.start,
            window.end,
            grouped.len(),
            before_filter,
            available.len()
        );
        Ok(available)
    }
}

/// Ascending by name; room id breaks ties so output is deterministic.
pub fn sort_by_name(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.room_id.cmp(&b.room_id)));
}
