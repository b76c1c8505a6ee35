use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::cookies::CookieBridge;
use crate::error::BridgeError;
use crate::jar::{ChangeCause, CookieChange};
use crate::torrents::{statuses_path, TorrentStatuses};

pub const NO_COOKIES_DETAIL: &str = "No working cookies received from server.";

/// Messages a foreground context can send to the background router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    RequestLogin,
    #[serde(rename_all = "camelCase")]
    GetTorrentStatuses {
        realm_name: String,
        torrent_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    LoginSuccessful,
    LoginFailed { detail: String },
    LoginDisabled,
    GetTorrentStatusesSuccess { torrents: TorrentStatuses },
    GetTorrentStatusesError { detail: String },
}

/// A request paired with the channel its single reply goes out on.
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

fn failure_detail(err: &BridgeError) -> String {
    err.detail().unwrap_or_else(|| err.to_string())
}

/// Background listener reacting to cookie changes and login requests.
#[derive(Clone)]
pub struct LoginEventRouter {
    bridge: CookieBridge,
}

impl LoginEventRouter {
    pub fn new(bridge: CookieBridge) -> Self {
        Self { bridge }
    }

    /// Produce the one reply owed to `request`.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::RequestLogin => self.request_login().await,
            Request::GetTorrentStatuses {
                realm_name,
                torrent_ids,
            } => self.torrent_statuses(&realm_name, &torrent_ids).await,
        }
    }

    async fn request_login(&self) -> Response {
        let settings = match self.bridge.client().config().load().await {
            Ok(settings) => settings,
            Err(err) => {
                return Response::LoginFailed {
                    detail: err.to_string(),
                }
            }
        };

        if !settings.auto_login {
            log::info!("[Router] Login requested but autologin is disabled");
            return Response::LoginDisabled;
        }

        match self.bridge.synchronize(true).await {
            Ok(true) => {
                log::info!("[Router] Login successful");
                Response::LoginSuccessful
            }
            Ok(false) => {
                log::warn!("[Router] Login failed: no cookies from Harvest");
                Response::LoginFailed {
                    detail: NO_COOKIES_DETAIL.to_string(),
                }
            }
            Err(err) => {
                log::warn!("[Router] Login failed: {}", err);
                Response::LoginFailed {
                    detail: err.to_string(),
                }
            }
        }
    }

    async fn torrent_statuses(&self, realm_name: &str, torrent_ids: &[String]) -> Response {
        let path = statuses_path(realm_name, torrent_ids);
        match self.bridge.client().get::<TorrentStatuses>(&path).await {
            Ok(torrents) => Response::GetTorrentStatusesSuccess { torrents },
            Err(err) => {
                log::warn!("[Router] Status query for {} failed: {}", realm_name, err);
                Response::GetTorrentStatusesError {
                    detail: failure_detail(&err),
                }
            }
        }
    }

    /// Only explicit sets/removals of the tracked cookie are pushed to Harvest.
    pub fn should_sync(&self, change: &CookieChange) -> bool {
        change.cause == ChangeCause::Explicit && self.bridge.tracker().matches_cookie(&change.cookie)
    }

    /// Best-effort push of the local cookie. Never installs anything locally,
    /// so reacting to our own writes cannot loop. Errors are swallowed.
    pub async fn on_cookie_change(&self, change: &CookieChange) {
        if !self.should_sync(change) {
            return;
        }
        match self.bridge.synchronize(false).await {
            Ok(_) => log::debug!("[Router] Pushed changed session cookie to Harvest"),
            Err(err) => log::debug!("[Router] Background cookie push failed: {}", err),
        }
    }

    /// Start listening. The router stops when every handle is dropped or
    /// `shutdown` is called.
    pub fn spawn(self, mut changes: broadcast::Receiver<CookieChange>) -> RouterHandle {
        let (request_tx, mut request_rx) = mpsc::channel::<Envelope>(32);
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut changes_open = true;
            loop {
                tokio::select! {
                    envelope = request_rx.recv() => {
                        let Some(Envelope { request, reply }) = envelope else {
                            break;
                        };
                        let router = self.clone();
                        tokio::spawn(async move {
                            let response = router.handle(request).await;
                            if reply.send(response).is_err() {
                                log::debug!("[Router] Requester went away before the reply");
                            }
                        });
                    }
                    change = changes.recv(), if changes_open => {
                        match change {
                            Ok(change) => {
                                let router = self.clone();
                                tokio::spawn(async move {
                                    router.on_cookie_change(&change).await;
                                });
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                log::warn!("[Router] Missed {} cookie change(s)", skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                changes_open = false;
                            }
                        }
                    }
                    _ = cancel_rx.recv() => {
                        log::info!("[Router] Shut down");
                        break;
                    }
                }
            }
        });

        RouterHandle {
            requests: request_tx,
            cancel: cancel_tx,
        }
    }
}

/// Foreground side of the message channel to a running router.
#[derive(Clone)]
pub struct RouterHandle {
    requests: mpsc::Sender<Envelope>,
    cancel: mpsc::Sender<()>,
}

impl RouterHandle {
    /// Send a request and wait for its reply.
    pub async fn request(&self, request: Request) -> Result<Response, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Envelope { request, reply })
            .await
            .map_err(|_| BridgeError::RouterUnavailable)?;
        response.await.map_err(|_| BridgeError::RouterUnavailable)
    }

    pub async fn shutdown(&self) {
        let _ = self.cancel.send(()).await;
    }
}
