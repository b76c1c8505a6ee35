use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use url::Url;

use crate::cookies::{CookieStore, SessionCookie};
use crate::error::BridgeError;

const CHANGE_FEED_CAPACITY: usize = 64;

/// Why a cookie changed, mirroring the browser's `onChanged` causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// Set or removed by a user action or an explicit API call
    Explicit,
    /// Replaced by a later set of the same cookie
    Overwrite,
    /// Removed because it expired
    Expired,
    /// Garbage collected by the store
    Evicted,
    /// Overwritten with an already-expired expiration date
    ExpiredOverwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CookieChange {
    pub cookie: SessionCookie,
    pub removed: bool,
    pub cause: ChangeCause,
}

/// In-process cookie store with an optional JSON file behind it.
///
/// Every mutation is published on a broadcast feed, which is what the login
/// router listens to.
pub struct CookieJar {
    path: Option<PathBuf>,
    cookies: Mutex<Vec<SessionCookie>>,
    changes: broadcast::Sender<CookieChange>,
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

/// Same cookie domain, ignoring a leading dot and ASCII case.
fn same_domain(a: &str, b: &str) -> bool {
    a.trim_start_matches('.')
        .eq_ignore_ascii_case(b.trim_start_matches('.'))
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    cookie_path.is_empty() || request_path.starts_with(cookie_path)
}

fn now_epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl CookieJar {
    pub fn in_memory() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            path: None,
            cookies: Mutex::new(Vec::new()),
            changes,
        }
    }

    /// Open a jar persisted at `path`; a missing file starts empty.
    pub fn open(path: PathBuf) -> Result<Self, BridgeError> {
        let cookies = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            path: Some(path),
            cookies: Mutex::new(cookies),
            changes,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CookieChange> {
        self.changes.subscribe()
    }

    pub fn all(&self) -> Vec<SessionCookie> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SessionCookie>> {
        self.cookies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, cookie: SessionCookie, removed: bool, cause: ChangeCause) {
        // No subscribers is fine.
        let _ = self.changes.send(CookieChange {
            cookie,
            removed,
            cause,
        });
    }

    fn persist(&self, cookies: &[SessionCookie]) -> Result<(), BridgeError> {
        if let Some(path) = &self.path {
            save_to_disk(path, cookies)?;
        }
        Ok(())
    }

    fn parse_url(url: &str) -> Result<(String, String), BridgeError> {
        let parsed = Url::parse(url)
            .map_err(|e| BridgeError::CookieStore(format!("invalid cookie url {}: {}", url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| BridgeError::CookieStore(format!("cookie url {} has no host", url)))?
            .to_string();
        Ok((host, parsed.path().to_string()))
    }

    /// Remove a cookie as the user would, producing an explicit change.
    pub fn remove(&self, url: &str, name: &str) -> Result<Option<SessionCookie>, BridgeError> {
        let (host, path) = Self::parse_url(url)?;
        let removed = {
            let mut cookies = self.lock();
            let Some(index) = cookies.iter().position(|c| {
                c.name == name && domain_matches(&c.domain, &host) && path_matches(&c.path, &path)
            }) else {
                return Ok(None);
            };
            let mut next = cookies.clone();
            let removed = next.remove(index);
            self.persist(&next)?;
            *cookies = next;
            Some(removed)
        };
        if let Some(cookie) = &removed {
            self.publish(cookie.clone(), true, ChangeCause::Explicit);
        }
        Ok(removed)
    }

    /// Drop every expired cookie, publishing an `Expired` change for each.
    pub fn sweep_expired(&self) -> Result<usize, BridgeError> {
        let now = now_epoch_seconds();
        let expired: Vec<SessionCookie> = {
            let mut cookies = self.lock();
            let (expired, live): (Vec<_>, Vec<_>) =
                cookies.iter().cloned().partition(|c| c.is_expired_at(now));
            if !expired.is_empty() {
                self.persist(&live)?;
                *cookies = live;
            }
            expired
        };
        let count = expired.len();
        for cookie in expired {
            self.publish(cookie, true, ChangeCause::Expired);
        }
        Ok(count)
    }
}

fn save_to_disk(path: &Path, cookies: &[SessionCookie]) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(cookies)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[async_trait]
impl CookieStore for CookieJar {
    async fn get(&self, url: &str, name: &str) -> Result<Option<SessionCookie>, BridgeError> {
        let (host, path) = Self::parse_url(url)?;
        let now = now_epoch_seconds();
        let cookies = self.lock();
        Ok(cookies
            .iter()
            .filter(|c| {
                c.name == name
                    && domain_matches(&c.domain, &host)
                    && path_matches(&c.path, &path)
                    && !c.is_expired_at(now)
            })
            .max_by_key(|c| c.path.len())
            .cloned())
    }

    async fn set(&self, url: &str, mut cookie: SessionCookie) -> Result<SessionCookie, BridgeError> {
        let (host, _) = Self::parse_url(url)?;
        if cookie.domain.is_empty() {
            cookie.domain = host.clone();
        }
        if cookie.path.is_empty() {
            cookie.path = "/".to_string();
        }
        if !domain_matches(&cookie.domain, &host) {
            return Err(BridgeError::CookieStore(format!(
                "cookie domain {} does not cover {}",
                cookie.domain, host
            )));
        }

        let replaced = {
            let mut cookies = self.lock();
            let mut next = cookies.clone();
            let position = next.iter().position(|c| {
                c.name == cookie.name
                    && same_domain(&c.domain, &cookie.domain)
                    && c.path == cookie.path
            });
            let replaced = position.map(|index| next.remove(index));
            next.push(cookie.clone());
            // The jar only changes once the file has it.
            self.persist(&next)?;
            *cookies = next;
            replaced
        };

        if let Some(old) = replaced {
            self.publish(old, true, ChangeCause::Overwrite);
        }
        self.publish(cookie.clone(), false, ChangeCause::Explicit);
        Ok(cookie)
    }
}
