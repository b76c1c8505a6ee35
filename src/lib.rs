mod client;
mod cookies;
mod error;
mod jar;
mod probe;
mod reconciler;
mod router;
mod store;
mod torrents;

pub use client::{api_url, ClientOptions, RemoteClient, DEFAULT_TIMEOUT};
pub use cookies::{CookieBridge, CookieStore, CookieSync, SessionCookie, Tracker, WireCookie, SESSION_COOKIE_NAME};
pub use error::{detail_from_body, BridgeError};
pub use jar::{ChangeCause, CookieChange, CookieJar};
pub use probe::{ConnectionProbe, CONNECTION_OK_MESSAGE, PING_PATH};
pub use reconciler::{
    ItemStatus, PageGateway, PollingConfig, ReconcilerEvent, RowState, StatusGateway, StatusReconciler,
    TrackedItem,
};
pub use router::{Envelope, LoginEventRouter, Request, Response, RouterHandle, NO_COOKIES_DETAIL};
pub use store::{ConfigSource, Settings, StoreManager, STORE_FILENAME};
pub use torrents::{
    added_torrent_name, statuses_path, AddTorrentFromTracker, TorrentInfo, TorrentStatus, TorrentStatuses,
    ADD_FROM_TRACKER_PATH,
};
