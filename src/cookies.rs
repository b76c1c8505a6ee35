use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::client::RemoteClient;
use crate::error::BridgeError;

/// Name of the tracked session cookie.
pub const SESSION_COOKIE_NAME: &str = "id";

/// A cookie as the browser cookie store describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the epoch, possibly fractional. `None` for browser-session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    #[serde(default)]
    pub secure: bool,
}

impl SessionCookie {
    pub fn is_expired_at(&self, now_epoch_seconds: f64) -> bool {
        self.expiration_date
            .map(|expires| expires <= now_epoch_seconds)
            .unwrap_or(false)
    }
}

/// A cookie as Harvest sends and receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, serialize_with = "serialize_expires")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
}

fn serialize_expires<S: Serializer>(expires: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match expires {
        Some(expires) => serializer.serialize_i64(expires.round() as i64),
        None => serializer.serialize_none(),
    }
}

impl From<&SessionCookie> for WireCookie {
    fn from(cookie: &SessionCookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            http_only: cookie.http_only,
            expires: cookie.expiration_date.map(f64::round),
            secure: cookie.secure,
        }
    }
}

impl From<WireCookie> for SessionCookie {
    fn from(cookie: WireCookie) -> Self {
        Self {
            name: cookie.name,
            value: cookie.value,
            domain: cookie.domain,
            path: cookie.path,
            http_only: cookie.http_only,
            expiration_date: cookie.expires,
            secure: cookie.secure,
        }
    }
}

/// Body of the cookie-sync PUT, in both directions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieSync {
    #[serde(default)]
    pub cookies: Vec<WireCookie>,
}

/// Narrow accessor over the browser cookie store.
#[async_trait]
pub trait CookieStore: Send + Sync {
    async fn get(&self, url: &str, name: &str) -> Result<Option<SessionCookie>, BridgeError>;

    /// Install a cookie for `url`. Attributes are taken from `cookie` verbatim.
    async fn set(&self, url: &str, cookie: SessionCookie) -> Result<SessionCookie, BridgeError>;
}

/// A tracker site whose session Harvest can take over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    /// Realm name on the Harvest side
    pub name: String,
    /// URL the session cookie is scoped to
    pub cookie_url: String,
    /// Harvest endpoint that exchanges cookies for this realm
    pub cookies_endpoint: String,
}

impl Tracker {
    pub fn new(name: impl Into<String>, cookie_url: impl Into<String>) -> Self {
        let name = name.into();
        let cookies_endpoint = format!("/api/plugins/{}/cookies", name);
        Self {
            name,
            cookie_url: cookie_url.into(),
            cookies_endpoint,
        }
    }

    pub fn redacted() -> Self {
        Self::new("redacted", "https://redacted.ch/")
    }

    pub fn with_cookies_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.cookies_endpoint = endpoint.into();
        self
    }

    pub fn cookie_host(&self) -> Option<String> {
        Url::parse(&self.cookie_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    /// Whether a changed cookie is the tracked session cookie for this tracker.
    pub fn matches_cookie(&self, cookie: &SessionCookie) -> bool {
        if cookie.name != SESSION_COOKIE_NAME {
            return false;
        }
        match self.cookie_host() {
            Some(host) => cookie.domain.trim_start_matches('.').eq_ignore_ascii_case(&host),
            None => false,
        }
    }
}

/// Keeps the tracker session cookie consistent between the local cookie store and Harvest.
#[derive(Clone)]
pub struct CookieBridge {
    client: RemoteClient,
    cookies: Arc<dyn CookieStore>,
    tracker: Tracker,
}

impl CookieBridge {
    pub fn new(client: RemoteClient, cookies: Arc<dyn CookieStore>, tracker: Tracker) -> Self {
        Self {
            client,
            cookies,
            tracker,
        }
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Send the local session cookie to Harvest and, when `receive_enabled`,
    /// install whatever session cookie Harvest answers with.
    ///
    /// Returns whether Harvest holds at least one cookie for this session.
    pub async fn synchronize(&self, receive_enabled: bool) -> Result<bool, BridgeError> {
        let local = self
            .cookies
            .get(&self.tracker.cookie_url, SESSION_COOKIE_NAME)
            .await?;

        let request = CookieSync {
            cookies: local.iter().map(WireCookie::from).collect(),
        };
        log::debug!(
            "[Cookie Sync] Sending {} cookie(s) to {}",
            request.cookies.len(),
            self.tracker.cookies_endpoint
        );

        let response: CookieSync = self
            .client
            .put(&self.tracker.cookies_endpoint, &request)
            .await?;

        if receive_enabled {
            for remote in &response.cookies {
                if remote.name != SESSION_COOKIE_NAME {
                    continue;
                }
                let differs = local
                    .as_ref()
                    .map(|cookie| cookie.value != remote.value)
                    .unwrap_or(true);
                if differs {
                    log::info!("[Cookie Sync] Installing session cookie from Harvest");
                    self.cookies
                        .set(&self.tracker.cookie_url, SessionCookie::from(remote.clone()))
                        .await?;
                }
            }
        }

        Ok(!response.cookies.is_empty())
    }
}
