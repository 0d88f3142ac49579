use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::model::CredentialBundle;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid bundle: expires_at ({expires_at}) must be after issued_at ({issued_at})")]
    InvalidBundle { issued_at: i64, expires_at: i64 },
}

pub type SharedBundle = Arc<CredentialBundle>;

/// Single slot holding the current credential bundle.
///
/// One writer (the refresher) publishes whole bundles; any number of readers
/// take an `Arc` snapshot. A bundle is fully built before it is swapped in,
/// so a reader sees either the previous bundle or the new one, never a mix.
/// Expiry is advisory: the store keeps serving a stale bundle until a newer
/// one is published.
pub struct CredentialStore {
    slot: watch::Sender<Option<SharedBundle>>,
    path: Option<PathBuf>,
    /// Orders swap + persist so the file always holds the latest bundle.
    publish_lock: Mutex<()>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl CredentialStore {
    /// An uninitialized store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            slot: watch::Sender::new(None),
            path: None,
            publish_lock: Mutex::new(()),
        }
    }

    /// Open a store persisted at `path`. A previously persisted bundle becomes
    /// current even if it is past its expiry.
    pub fn open(path: &Path) -> io::Result<Self> {
        let initial = match File::open(path) {
            Ok(file) => {
                let bundle: CredentialBundle = serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                if bundle.is_stale(unix_now()) {
                    warn!(
                        "persisted credentials expired at {}, serving them until refreshed",
                        bundle.expires_at
                    );
                } else {
                    info!("loaded persisted credentials (expires_at {})", bundle.expires_at);
                }
                Some(Arc::new(bundle))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            slot: watch::Sender::new(initial),
            path: Some(path.to_path_buf()),
            publish_lock: Mutex::new(()),
        })
    }

    /// The latest published bundle, or `None` if nothing was ever published.
    pub fn get(&self) -> Option<SharedBundle> {
        self.slot.borrow().clone()
    }

    /// Atomically replace the current bundle, then persist it best-effort.
    /// Writes to disk when backed by a file; async callers run it on the
    /// blocking pool.
    pub fn publish(&self, bundle: CredentialBundle) -> Result<(), CredentialError> {
        if bundle.expires_at <= bundle.issued_at {
            return Err(CredentialError::InvalidBundle {
                issued_at: bundle.issued_at,
                expires_at: bundle.expires_at,
            });
        }
        let bundle = Arc::new(bundle);
        let _guard = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.slot.send_replace(Some(bundle.clone()));

        if let Some(path) = &self.path
            && let Err(e) = persist(path, &bundle)
        {
            warn!("failed to persist credentials to {}: {e}", path.display());
        }
        Ok(())
    }

    /// Receiver that wakes whenever a new bundle is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<SharedBundle>> {
        self.slot.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

fn persist(path: &Path, bundle: &CredentialBundle) -> io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, bundle)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(&tmp_path, path)
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
