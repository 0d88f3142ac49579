use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::engine::FindError;
use crate::model::*;
use crate::upstream::{Upstream, decode_location};

/// Room descriptors keyed by the string form of the room id.
///
/// Append-only: an entry, once written, is never re-validated against
/// upstream. Concurrent misses for the same id may both hit upstream; the
/// later insert wins and the values are equal.
pub struct RoomCache {
    rooms: DashMap<String, Room>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
    /// Held across snapshot, write and rename; flushes share one temp file.
    write_lock: Mutex<()>,
}

impl Default for RoomCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RoomCache {
    /// A cache with no backing file.
    pub fn in_memory() -> Self {
        Self {
            rooms: DashMap::new(),
            path: None,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Open the cache persisted at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> io::Result<Self> {
        let rooms = DashMap::new();
        match File::open(path) {
            Ok(file) => {
                let stored: BTreeMap<String, Room> = serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                for (key, room) in stored {
                    rooms.insert(key, room);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        info!("room cache: {} entries loaded from {}", rooms.len(), path.display());
        metrics::gauge!(crate::observability::ROOM_CACHE_ENTRIES).set(rooms.len() as f64);
        Ok(Self {
            rooms,
            path: Some(path.to_path_buf()),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn get(&self, room_id: RoomId) -> Option<Room> {
        self.rooms.get(&room_id.to_string()).map(|e| e.value().clone())
    }

    pub fn insert(&self, room: Room) {
        self.rooms.insert(room.room_id.to_string(), room);
        self.dirty.store(true, Ordering::Release);
        metrics::gauge!(crate::observability::ROOM_CACHE_ENTRIES).set(self.rooms.len() as f64);
    }

    /// Every cached room, in no particular order.
    pub fn all(&self) -> Vec<Room> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Return the cached room, or fetch, decode and cache it.
    pub async fn resolve(
        &self,
        upstream: &dyn Upstream,
        creds: &CredentialBundle,
        building_id: BuildingId,
        room_id: RoomId,
    ) -> Result<Room, FindError> {
        if let Some(room) = self.get(room_id) {
            metrics::counter!(crate::observability::ROOM_CACHE_HITS_TOTAL).increment(1);
            return Ok(room);
        }
        metrics::counter!(crate::observability::ROOM_CACHE_MISSES_TOTAL).increment(1);
        debug!("room {room_id} not cached, fetching location details");

        let body = upstream.location_details(creds, building_id, room_id).await?;
        let room = decode_location(&body, building_id)?;
        // Keyed by the requested id so the next lookup for it hits.
        self.rooms.insert(room_id.to_string(), room.clone());
        self.dirty.store(true, Ordering::Release);
        metrics::gauge!(crate::observability::ROOM_CACHE_ENTRIES).set(self.rooms.len() as f64);
        Ok(room)
    }

    /// Write the cache to disk if anything changed since the last flush.
    /// Temp file + fsync + rename, so a crash never leaves a torn file.
    /// Concurrent flushes run one at a time. Blocks; async callers go
    /// through [`RoomCache::flush_blocking`].
    pub fn flush(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot: BTreeMap<String, Room> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let result = write_snapshot(path, &snapshot);
        if result.is_err() {
            // Try again on the next flush.
            self.dirty.store(true, Ordering::Release);
        } else {
            debug!("room cache: flushed {} entries", snapshot.len());
        }
        result
    }

    /// [`RoomCache::flush`] on the blocking pool, off the async workers.
    pub async fn flush_blocking(self: &Arc<Self>) -> io::Result<()> {
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.flush())
            .await
            .map_err(io::Error::other)?
    }
}

fn write_snapshot(path: &Path, snapshot: &BTreeMap<String, Room>) -> io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&tmp_path, path)
}
