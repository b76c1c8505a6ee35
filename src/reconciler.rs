use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};

use crate::client::RemoteClient;
use crate::error::BridgeError;
use crate::router::{Request, Response, RouterHandle};
use crate::torrents::{added_torrent_name, AddTorrentFromTracker, TorrentStatus, ADD_FROM_TRACKER_PATH};

/// Where a page gets torrent statuses from and sends download requests to.
#[async_trait]
pub trait StatusGateway: Send + Sync {
    async fn torrent_statuses(
        &self,
        realm_name: &str,
        torrent_ids: &[String],
    ) -> Result<Vec<TorrentStatus>, BridgeError>;

    /// Ask Harvest to fetch a torrent from the tracker. Returns Harvest's answer.
    async fn add_torrent_from_tracker(
        &self,
        realm_name: &str,
        tracker_id: &str,
    ) -> Result<Value, BridgeError>;
}

/// Statuses are relayed through the background router; downloads go straight to Harvest.
pub struct PageGateway {
    router: RouterHandle,
    client: RemoteClient,
}

impl PageGateway {
    pub fn new(router: RouterHandle, client: RemoteClient) -> Self {
        Self { router, client }
    }
}

#[async_trait]
impl StatusGateway for PageGateway {
    async fn torrent_statuses(
        &self,
        realm_name: &str,
        torrent_ids: &[String],
    ) -> Result<Vec<TorrentStatus>, BridgeError> {
        let request = Request::GetTorrentStatuses {
            realm_name: realm_name.to_string(),
            torrent_ids: torrent_ids.to_vec(),
        };
        match self.router.request(request).await? {
            Response::GetTorrentStatusesSuccess { torrents } => Ok(torrents.results),
            Response::GetTorrentStatusesError { detail } => {
                Err(BridgeError::StatusQueryFailed { detail })
            }
            other => Err(BridgeError::StatusQueryFailed {
                detail: format!("unexpected reply {:?}", other),
            }),
        }
    }

    async fn add_torrent_from_tracker(
        &self,
        realm_name: &str,
        tracker_id: &str,
    ) -> Result<Value, BridgeError> {
        let body = AddTorrentFromTracker {
            tracker_name: realm_name,
            tracker_id,
            download_path: None,
        };
        self.client.post(ADD_FROM_TRACKER_PATH, &body).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedItem {
    pub external_id: String,
    pub display_id: String,
}

impl TrackedItem {
    pub fn new(external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        Self {
            display_id: external_id.clone(),
            external_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStatus {
    pub external_id: String,
    pub progress: f64,
    pub error: Option<String>,
}

impl From<&TorrentStatus> for ItemStatus {
    fn from(status: &TorrentStatus) -> Self {
        Self {
            external_id: status.torrent_info.tracker_id.clone(),
            progress: status.progress,
            error: status.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowState {
    /// Before the first poll answered
    Unknown,
    NotStarted,
    Downloading,
    Downloaded,
    /// A user action on this row is in progress
    InFlight,
}

impl RowState {
    /// Rows in these states show a loading indicator instead of actions.
    pub fn is_loading(self) -> bool {
        matches!(self, RowState::Unknown | RowState::InFlight)
    }

    pub fn for_status(status: Option<&ItemStatus>) -> Self {
        match status {
            None => RowState::NotStarted,
            Some(status) if status.progress == 1.0 => RowState::Downloaded,
            Some(_) => RowState::Downloading,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcilerEvent {
    /// One row's action controls need re-rendering.
    RowChanged {
        index: usize,
        display_id: String,
        state: RowState,
        progress: Option<f64>,
    },
    DownloadAdded {
        external_id: String,
        name: Option<String>,
    },
    DownloadFailed {
        external_id: String,
        detail: String,
    },
    StatusError {
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Periodic polling only runs while the page tracks fewer items than this
    pub max_items: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            interval: Duration::from_secs(3),
            max_items: 256,
        }
    }
}

struct Row {
    item: TrackedItem,
    state: RowState,
    status: Option<ItemStatus>,
}

/// Polls Harvest for the statuses of one page's rows and folds them into row state.
pub struct StatusReconciler {
    realm_name: String,
    rows: Mutex<Vec<Row>>,
    gateway: Arc<dyn StatusGateway>,
    events: mpsc::UnboundedSender<ReconcilerEvent>,
    polling: PollingConfig,
}

impl StatusReconciler {
    pub fn new(
        realm_name: impl Into<String>,
        items: Vec<TrackedItem>,
        gateway: Arc<dyn StatusGateway>,
        polling: PollingConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ReconcilerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let rows = items
            .into_iter()
            .map(|item| Row {
                item,
                state: RowState::Unknown,
                status: None,
            })
            .collect();
        let reconciler = Arc::new(Self {
            realm_name: realm_name.into(),
            rows: Mutex::new(rows),
            gateway,
            events,
            polling,
        });
        (reconciler, receiver)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Row>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ReconcilerEvent) {
        // The page may have stopped listening; nothing to do then.
        let _ = self.events.send(event);
    }

    fn emit_row(&self, index: usize, row: &Row) {
        self.emit(ReconcilerEvent::RowChanged {
            index,
            display_id: row.item.display_id.clone(),
            state: row.state,
            progress: row.status.as_ref().map(|s| s.progress),
        });
    }

    fn set_state(&self, index: usize, state: RowState) {
        let mut rows = self.lock();
        if let Some(row) = rows.get_mut(index) {
            row.state = state;
            self.emit_row(index, row);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, index: usize) -> Option<RowState> {
        self.lock().get(index).map(|row| row.state)
    }

    pub fn states(&self) -> Vec<RowState> {
        self.lock().iter().map(|row| row.state).collect()
    }

    pub fn external_ids(&self) -> Vec<String> {
        self.lock().iter().map(|row| row.item.external_id.clone()).collect()
    }

    /// Fold one status into a row. Returns whether the row changed state.
    ///
    /// An in-flight row keeps its state; the status is still remembered.
    pub fn receive(&self, index: usize, status: Option<ItemStatus>) -> bool {
        let mut rows = self.lock();
        let Some(row) = rows.get_mut(index) else {
            return false;
        };
        row.status = status;
        if row.state == RowState::InFlight {
            return false;
        }

        let target = RowState::for_status(row.status.as_ref());
        if target == row.state {
            return false;
        }
        row.state = target;
        self.emit_row(index, row);
        true
    }

    /// Match a poll response against every row by external id.
    pub fn apply_statuses(&self, statuses: &[TorrentStatus]) {
        let by_id: HashMap<&str, &TorrentStatus> = statuses
            .iter()
            .map(|status| (status.torrent_info.tracker_id.as_str(), status))
            .collect();
        let ids = self.external_ids();
        for (index, external_id) in ids.iter().enumerate() {
            let status = by_id.get(external_id.as_str()).map(|s| ItemStatus::from(*s));
            self.receive(index, status);
        }
    }

    /// One poll covering the whole tracked set.
    pub async fn refresh_statuses(&self) {
        let ids = self.external_ids();
        if ids.is_empty() {
            return;
        }
        match self.gateway.torrent_statuses(&self.realm_name, &ids).await {
            Ok(statuses) => self.apply_statuses(&statuses),
            Err(err) => {
                log::warn!("[Polling] Failed getting Harvest torrent statuses: {}", err);
                self.emit(ReconcilerEvent::StatusError {
                    detail: err.detail().unwrap_or_else(|| err.to_string()),
                });
            }
        }
    }

    /// Start a download for one row, then re-poll the whole set right away.
    pub async fn start_download(&self, index: usize) -> Result<(), BridgeError> {
        // Check and claim under one lock so concurrent callers cannot both post.
        let external_id = {
            let mut rows = self.lock();
            match rows.get_mut(index) {
                Some(row) if row.state != RowState::InFlight => {
                    row.state = RowState::InFlight;
                    self.emit_row(index, row);
                    row.item.external_id.clone()
                }
                Some(_) => {
                    log::debug!("[Polling] Row {} already has an action in flight", index);
                    return Ok(());
                }
                None => return Ok(()),
            }
        };

        let result = self
            .gateway
            .add_torrent_from_tracker(&self.realm_name, &external_id)
            .await;

        let outcome = match result {
            Ok(response) => {
                let name = added_torrent_name(&response);
                log::info!("[Polling] Added torrent {} ({:?})", external_id, name);
                self.emit(ReconcilerEvent::DownloadAdded {
                    external_id: external_id.clone(),
                    name,
                });
                Ok(())
            }
            Err(err) => {
                log::warn!("[Polling] Error adding torrent {}: {}", external_id, err);
                self.emit(ReconcilerEvent::DownloadFailed {
                    external_id: external_id.clone(),
                    detail: err.detail().unwrap_or_else(|| err.to_string()),
                });
                Err(err)
            }
        };

        self.set_state(index, RowState::Unknown);
        self.refresh_statuses().await;
        outcome
    }

    pub fn periodic_polling_enabled(&self) -> bool {
        self.len() < self.polling.max_items
    }

    /// Start polling: once shortly after start, then on a fixed interval while
    /// the tracked set is under the size cap.
    ///
    /// Polling stops when the returned sender fires or is dropped. Returns
    /// `None` when there is nothing to track.
    pub fn start_polling(self: &Arc<Self>) -> Option<mpsc::Sender<()>> {
        if self.is_empty() {
            return None;
        }
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let reconciler = Arc::clone(self);
        let periodic = self.periodic_polling_enabled();
        let polling = self.polling.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(polling.initial_delay) => {}
                _ = cancel_rx.recv() => return,
            }
            reconciler.refresh_statuses().await;

            if !periodic {
                log::info!(
                    "[Polling] {} rows tracked, periodic polling disabled",
                    reconciler.len()
                );
                return;
            }

            let mut interval = tokio::time::interval(polling.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first tick (immediate fire)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        reconciler.refresh_statuses().await;
                    }
                    _ = cancel_rx.recv() => {
                        log::debug!("[Polling] Cancelled");
                        break;
                    }
                }
            }
        });

        Some(cancel_tx)
    }
}
