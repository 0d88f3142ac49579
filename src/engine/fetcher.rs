use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, warn};

use crate::limits::SHORT_SNAPSHOT_BODY_CHARS;
use crate::model::*;
use crate::rooms::RoomCache;
use crate::upstream::{Upstream, decode_snapshot};

use super::FindError;

/// A room and the snapshot bookings recorded against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBookings {
    pub room: Room,
    pub bookings: Vec<Booking>,
}

/// One fetch cycle's snapshot grouped by room id. Rooms without bookings in
/// the snapshot are not present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedBookings {
    pub by_room: HashMap<RoomId, RoomBookings>,
}

impl GroupedBookings {
    pub fn contains(&self, room_id: RoomId) -> bool {
        self.by_room.contains_key(&room_id)
    }

    pub fn len(&self) -> usize {
        self.by_room.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_room.is_empty()
    }
}

/// Fetches a booking snapshot and resolves metadata for every room in it.
pub struct BookingFetcher {
    upstream: Arc<dyn Upstream>,
    rooms: Arc<RoomCache>,
    concurrency: usize,
}

impl BookingFetcher {
    pub fn new(upstream: Arc<dyn Upstream>, rooms: Arc<RoomCache>, concurrency: usize) -> Self {
        Self {
            upstream,
            rooms,
            concurrency: concurrency.max(1),
        }
    }

    /// Snapshot body, re-requested once if implausibly short. The second
    /// body is used whatever it looks like.
    async fn snapshot_body(
        &self,
        creds: &CredentialBundle,
        window: &AvailabilityWindow,
    ) -> Result<String, FindError> {
        let body = self.upstream.booking_snapshot(creds, window).await?;
        let chars = body.chars().count();
        if chars >= SHORT_SNAPSHOT_BODY_CHARS {
            return Ok(body);
        }
        warn!("snapshot body only {chars} chars, re-requesting once");
        metrics::counter!(crate::observability::SNAPSHOT_RETRIES_TOTAL).increment(1);
        self.upstream.booking_snapshot(creds, window).await
    }

    /// Fetch the snapshot for `window`, group its bookings by room, and
    /// resolve each distinct room through the metadata cache with at most
    /// `concurrency` lookups in flight. Any failure fails the whole cycle.
    pub async fn fetch(
        &self,
        creds: &CredentialBundle,
        window: &AvailabilityWindow,
    ) -> Result<GroupedBookings, FindError> {
        let body = self.snapshot_body(creds, window).await?;
        let bookings = decode_snapshot(&body)?;
        let booking_count = bookings.len();

        let mut by_room: HashMap<RoomId, Vec<Booking>> = HashMap::new();
        let mut scheduled: HashSet<RoomId> = HashSet::new();
        let mut to_resolve: Vec<(BuildingId, RoomId)> = Vec::new();
        for booking in bookings {
            if scheduled.insert(booking.room_id) {
                to_resolve.push((booking.building_id, booking.room_id));
            }
            by_room.entry(booking.room_id).or_default().push(booking);
        }

        let upstream = self.upstream.as_ref();
        let rooms = self.rooms.as_ref();
        let resolved: Vec<(RoomId, Room)> = stream::iter(to_resolve)
            .map(|(building_id, room_id)| async move {
                rooms
                    .resolve(upstream, creds, building_id, room_id)
                    .await
                    .map(|room| (room_id, room))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut grouped = GroupedBookings::default();
        for (room_id, room) in resolved {
            let bookings = by_room.remove(&room_id).unwrap_or_default();
            grouped.by_room.insert(room_id, RoomBookings { room, bookings });
        }

        debug!(
            "snapshot: {booking_count} bookings across {} rooms",
            grouped.len()
        );
        Ok(grouped)
    }
}
