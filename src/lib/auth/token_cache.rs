use std::path::PathBuf;

use chrono::{TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::types::AuthToken;

/// Lifetime, in seconds, given to tokens whose expiry the service did not report.
pub const FALLBACK_TTL_SECS: i64 = 3600;

/// TTL-bound store for the service's bearer token.
///
/// The token lives in memory and, when a path is configured, in its own JSON
/// file so a restart within the TTL does not force a new sign-in.
#[derive(Debug)]
pub struct TokenCache {
    token: Mutex<Option<AuthToken>>,
    path: Option<PathBuf>,
}

impl TokenCache {
    pub fn in_memory() -> Self {
        Self {
            token: Mutex::new(None),
            path: None,
        }
    }

    /// Opens a file-backed cache, loading a previously stored token if one is
    /// readable. A missing or corrupt file yields an empty cache.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let token = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<AuthToken>(&bytes) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring unreadable token file");
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            token: Mutex::new(token),
            path: Some(path),
        }
    }

    /// Returns the token while it is unexpired. An expired entry is dropped.
    pub async fn get(&self) -> Option<String> {
        let mut guard = self.token.lock().await;
        let expired = match guard.as_ref() {
            Some(token) if token.is_valid_at(Utc::now()) => return Some(token.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("cached auth token expired");
            *guard = None;
            drop(guard);
            self.remove_file().await;
        }
        None
    }

    pub async fn set(&self, value: impl Into<String>, ttl: Option<TimeDelta>) {
        let now = Utc::now();
        let fallback = now + TimeDelta::seconds(FALLBACK_TTL_SECS);
        // A TTL past the representable range gets the fallback instead.
        let expires_at = match ttl {
            Some(ttl) => now.checked_add_signed(ttl).unwrap_or(fallback),
            None => fallback,
        };
        let token = AuthToken {
            value: value.into(),
            expires_at,
        };
        debug!(expires_at = %token.expires_at, "storing auth token");

        *self.token.lock().await = Some(token.clone());
        self.write_file(&token).await;
    }

    pub async fn clear(&self) {
        *self.token.lock().await = None;
        self.remove_file().await;
    }

    async fn write_file(&self, token: &AuthToken) {
        let Some(path) = &self.path else {
            return;
        };
        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(path = %parent.display(), error = %e, "cannot create token directory");
            return;
        }
        match serde_json::to_vec(token) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!(path = %path.display(), error = %e, "cannot persist auth token");
                }
            }
            Err(e) => warn!(error = %e, "cannot serialize auth token"),
        }
    }

    async fn remove_file(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "cannot remove token file");
        }
    }
}
