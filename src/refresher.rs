use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::credentials::{CredentialError, CredentialStore, unix_now};
use crate::limits::DEFAULT_BUNDLE_LIFETIME_SECS;
use crate::model::CredentialBundle;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credential source unavailable: {0}")]
    Unavailable(String),
    #[error("credential source returned unusable data: {0}")]
    Malformed(String),
    #[error(transparent)]
    Rejected(#[from] CredentialError),
}

/// Produces a fresh authenticated-session bundle. The interactive login that
/// actually obtains the cookies lives behind this trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<CredentialBundle, AuthError>;
}

/// Obtain one bundle and publish it. On failure the current bundle stays.
pub async fn refresh_once(
    store: &Arc<CredentialStore>,
    authenticator: &dyn Authenticator,
) -> Result<(), AuthError> {
    let result = async {
        let bundle = authenticator.authenticate().await?;
        let expires_at = bundle.expires_at;
        // Publishing persists to disk; keep it off the async workers.
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || store.publish(bundle))
            .await
            .map_err(|e| AuthError::Unavailable(format!("publish task failed: {e}")))??;
        Ok::<_, AuthError>(expires_at)
    }
    .await;

    match result {
        Ok(expires_at) => {
            metrics::counter!(crate::observability::CREDENTIAL_REFRESH_TOTAL, "status" => "ok")
                .increment(1);
            info!("credentials refreshed (expires_at {expires_at})");
            Ok(())
        }
        Err(e) => {
            metrics::counter!(crate::observability::CREDENTIAL_REFRESH_TOTAL, "status" => "error")
                .increment(1);
            Err(e)
        }
    }
}

/// Background task: refresh immediately, then every `every`. A failed
/// attempt is retried after `retry_after` while the previous bundle keeps
/// being served.
pub async fn run_refresher(
    store: Arc<CredentialStore>,
    authenticator: Arc<dyn Authenticator>,
    every: Duration,
    retry_after: Duration,
) {
    loop {
        let wait = match refresh_once(&store, authenticator.as_ref()).await {
            Ok(()) => every,
            Err(e) => {
                let serving = if store.is_initialized() {
                    "previous credentials"
                } else {
                    "no credentials"
                };
                error!("credential refresh failed: {e}; serving {serving}, retrying in {retry_after:?}");
                retry_after
            }
        };
        tokio::time::sleep(wait).await;
    }
}

// ── File-backed source ───────────────────────────────────────────

/// What the external login agent writes: headers and cookies, optionally
/// with its own validity stamps (unix seconds).
#[derive(Debug, Deserialize)]
struct BundleFile {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    issued_at: Option<i64>,
    expires_at: Option<i64>,
}

/// Reads the bundle an out-of-process login agent keeps up to date.
pub struct BundleFileAuthenticator {
    path: PathBuf,
    required_cookies: Vec<String>,
}

impl BundleFileAuthenticator {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            required_cookies: Vec::new(),
        }
    }

    /// Refuse bundles missing any of these cookies.
    pub fn with_required_cookies(mut self, names: &[&str]) -> Self {
        self.required_cookies = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

#[async_trait]
impl Authenticator for BundleFileAuthenticator {
    async fn authenticate(&self) -> Result<CredentialBundle, AuthError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AuthError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let file: BundleFile =
            serde_json::from_str(&raw).map_err(|e| AuthError::Malformed(e.to_string()))?;

        if let Some(missing) = self
            .required_cookies
            .iter()
            .find(|name| !file.cookies.contains_key(name.as_str()))
        {
            return Err(AuthError::Malformed(format!("missing cookie {missing}")));
        }

        let issued_at = file.issued_at.unwrap_or_else(unix_now);
        let expires_at = file
            .expires_at
            .unwrap_or(issued_at + DEFAULT_BUNDLE_LIFETIME_SECS);
        Ok(CredentialBundle {
            headers: file.headers,
            cookies: file.cookies,
            issued_at,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call after the first `ok_calls`.
    struct FlakyAuthenticator {
        calls: AtomicUsize,
        ok_calls: usize,
    }

    #[async_trait]
    impl Authenticator for FlakyAuthenticator {
        async fn authenticate(&self) -> Result<CredentialBundle, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.ok_calls {
                return Err(AuthError::Unavailable("login page timed out".into()));
            }
            let mut cookies = BTreeMap::new();
            cookies.insert("emsAuthToken".to_string(), format!("token-{n}"));
            Ok(CredentialBundle {
                headers: BTreeMap::new(),
                cookies,
                issued_at: 100 + n as i64,
                expires_at: 7300 + n as i64,
            })
        }
    }

    fn test_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("findroom_test_refresher");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn refresh_once_publishes() {
        let store = Arc::new(CredentialStore::in_memory());
        let auth = FlakyAuthenticator {
            calls: AtomicUsize::new(0),
            ok_calls: 1,
        };
        refresh_once(&store, &auth).await.unwrap();
        assert_eq!(store.get().unwrap().cookies["emsAuthToken"], "token-0");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_bundle() {
        let store = Arc::new(CredentialStore::in_memory());
        let auth = FlakyAuthenticator {
            calls: AtomicUsize::new(0),
            ok_calls: 1,
        };
        refresh_once(&store, &auth).await.unwrap();
        let err = refresh_once(&store, &auth).await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
        assert_eq!(store.get().unwrap().cookies["emsAuthToken"], "token-0");
    }

    #[tokio::test]
    async fn failed_first_refresh_leaves_store_absent() {
        let store = Arc::new(CredentialStore::in_memory());
        let auth = FlakyAuthenticator {
            calls: AtomicUsize::new(0),
            ok_calls: 0,
        };
        assert!(refresh_once(&store, &auth).await.is_err());
        assert!(store.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_retries_after_failure_then_keeps_cadence() {
        let store = Arc::new(CredentialStore::in_memory());
        let auth = Arc::new(FlakyAuthenticator {
            calls: AtomicUsize::new(0),
            ok_calls: 2,
        });
        let task = tokio::spawn(run_refresher(
            store.clone(),
            auth.clone(),
            Duration::from_secs(7200),
            Duration::from_secs(60),
        ));

        // Immediate first refresh.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get().unwrap().cookies["emsAuthToken"], "token-0");

        // Nothing more until the cadence elapses.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.get().unwrap().cookies["emsAuthToken"], "token-1");

        // Third call fails; the retry comes after 60s, not 2h.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        let after_failure = auth.calls.load(Ordering::SeqCst);
        assert!(after_failure >= 3);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(auth.calls.load(Ordering::SeqCst), after_failure + 1);
        assert_eq!(store.get().unwrap().cookies["emsAuthToken"], "token-1");

        task.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_persist_the_current_bundle() {
        let dir = std::env::temp_dir().join("findroom_test_refresher");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("concurrent_auth.json");
        let _ = fs::remove_file(&path);

        let store = Arc::new(CredentialStore::open(&path).unwrap());
        let auth = Arc::new(FlakyAuthenticator {
            calls: AtomicUsize::new(0),
            ok_calls: usize::MAX,
        });
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let auth = auth.clone();
            tasks.push(tokio::spawn(async move {
                refresh_once(&store, auth.as_ref()).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.get(), store.get());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn bundle_file_fills_missing_timestamps() {
        let path = test_file(
            "no_stamps.json",
            r#"{"headers": {"dea-CSRFToken": "x"}, "cookies": {"emsAuthToken": "t"}}"#,
        );
        let bundle = BundleFileAuthenticator::new(path).authenticate().await.unwrap();
        assert_eq!(bundle.headers["dea-CSRFToken"], "x");
        assert_eq!(bundle.expires_at - bundle.issued_at, DEFAULT_BUNDLE_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn bundle_file_keeps_given_timestamps() {
        let path = test_file(
            "stamped.json",
            r#"{"cookies": {"emsAuthToken": "t"}, "issued_at": 10, "expires_at": 20}"#,
        );
        let bundle = BundleFileAuthenticator::new(path).authenticate().await.unwrap();
        assert_eq!((bundle.issued_at, bundle.expires_at), (10, 20));
    }

    #[tokio::test]
    async fn bundle_file_missing_required_cookie_is_rejected() {
        let path = test_file("partial.json", r#"{"cookies": {"OptanonConsent": "y"}}"#);
        let err = BundleFileAuthenticator::new(path)
            .with_required_cookies(&["emsAuthToken"])
            .authenticate()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing cookie emsAuthToken"));
    }

    #[tokio::test]
    async fn missing_bundle_file_is_unavailable() {
        let path = std::env::temp_dir().join("findroom_test_refresher_does_not_exist.json");
        let err = BundleFileAuthenticator::new(path).authenticate().await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
    }

    #[tokio::test]
    async fn invalid_stamps_are_rejected_by_store() {
        let path = test_file(
            "inverted.json",
            r#"{"cookies": {"emsAuthToken": "t"}, "issued_at": 20, "expires_at": 10}"#,
        );
        let store = Arc::new(CredentialStore::in_memory());
        let err = refresh_once(&store, &BundleFileAuthenticator::new(path))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
        assert!(store.get().is_none());
    }
}
