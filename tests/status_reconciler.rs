use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use harvest_bridge::{
    BridgeError, PollingConfig, ReconcilerEvent, RowState, StatusGateway, StatusReconciler,
    TorrentInfo, TorrentStatus, TrackedItem,
};

#[derive(Default)]
struct FakeGateway {
    statuses: Mutex<Vec<TorrentStatus>>,
    status_error: Mutex<Option<String>>,
    status_calls: AtomicUsize,
    add_calls: Mutex<Vec<(String, String)>>,
    add_fails: Mutex<bool>,
    add_gate: Option<Arc<Notify>>,
}

impl FakeGateway {
    fn set_statuses(&self, statuses: Vec<TorrentStatus>) {
        *self.statuses.lock().unwrap() = statuses;
    }

    fn calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusGateway for FakeGateway {
    async fn torrent_statuses(
        &self,
        _realm_name: &str,
        _torrent_ids: &[String],
    ) -> Result<Vec<TorrentStatus>, BridgeError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(detail) = self.status_error.lock().unwrap().clone() {
            return Err(BridgeError::StatusQueryFailed { detail });
        }
        Ok(self.statuses.lock().unwrap().clone())
    }

    async fn add_torrent_from_tracker(
        &self,
        realm_name: &str,
        tracker_id: &str,
    ) -> Result<Value, BridgeError> {
        self.add_calls
            .lock()
            .unwrap()
            .push((realm_name.to_string(), tracker_id.to_string()));
        if let Some(gate) = &self.add_gate {
            gate.notified().await;
        }
        if *self.add_fails.lock().unwrap() {
            return Err(BridgeError::RemoteRequestFailed {
                status: 400,
                body: r#"{"detail": "Torrent already exists."}"#.to_string(),
            });
        }
        Ok(json!({"torrent_info": {"metadata": {"group": {"name": "Some Album"}}}}))
    }
}

fn status(tracker_id: &str, progress: f64) -> TorrentStatus {
    TorrentStatus {
        torrent_info: TorrentInfo {
            tracker_id: tracker_id.to_string(),
            metadata: None,
        },
        progress,
        error: None,
    }
}

fn items(ids: &[&str]) -> Vec<TrackedItem> {
    ids.iter().map(|id| TrackedItem::new(*id)).collect()
}

fn drain(events: &mut tokio::sync::mpsc::UnboundedReceiver<ReconcilerEvent>) -> Vec<ReconcilerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn poll_response_folds_into_row_states() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.set_statuses(vec![status("1", 0.4)]);
    let (reconciler, mut events) =
        StatusReconciler::new("redacted", items(&["1", "2"]), gateway.clone(), PollingConfig::default());

    assert_eq!(reconciler.states(), vec![RowState::Unknown, RowState::Unknown]);
    reconciler.refresh_statuses().await;

    assert_eq!(
        reconciler.states(),
        vec![RowState::Downloading, RowState::NotStarted]
    );
    let changed = drain(&mut events);
    assert_eq!(changed.len(), 2);
    assert_eq!(
        changed[0],
        ReconcilerEvent::RowChanged {
            index: 0,
            display_id: "1".to_string(),
            state: RowState::Downloading,
            progress: Some(0.4),
        }
    );
}

#[tokio::test]
async fn unchanged_rows_are_not_re_rendered() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.set_statuses(vec![status("1", 0.4)]);
    let (reconciler, mut events) =
        StatusReconciler::new("redacted", items(&["1", "2"]), gateway.clone(), PollingConfig::default());

    reconciler.refresh_statuses().await;
    drain(&mut events);

    gateway.set_statuses(vec![status("1", 1.0)]);
    reconciler.refresh_statuses().await;

    let changed = drain(&mut events);
    assert_eq!(changed.len(), 1);
    assert!(matches!(
        changed[0],
        ReconcilerEvent::RowChanged {
            index: 0,
            state: RowState::Downloaded,
            ..
        }
    ));
    assert_eq!(reconciler.state(1), Some(RowState::NotStarted));
}

#[tokio::test]
async fn status_errors_leave_rows_untouched() {
    let gateway = Arc::new(FakeGateway::default());
    *gateway.status_error.lock().unwrap() = Some("Harvest is down".to_string());
    let (reconciler, mut events) =
        StatusReconciler::new("redacted", items(&["1"]), gateway.clone(), PollingConfig::default());

    reconciler.refresh_statuses().await;

    assert_eq!(reconciler.state(0), Some(RowState::Unknown));
    assert_eq!(
        drain(&mut events),
        vec![ReconcilerEvent::StatusError {
            detail: "Harvest is down".to_string()
        }]
    );
}

#[tokio::test]
async fn in_flight_row_ignores_concurrent_poll_results() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(FakeGateway {
        add_gate: Some(gate.clone()),
        ..FakeGateway::default()
    });
    let (reconciler, _events) =
        StatusReconciler::new("redacted", items(&["1", "2"]), gateway.clone(), PollingConfig::default());
    reconciler.refresh_statuses().await;
    assert_eq!(reconciler.state(0), Some(RowState::NotStarted));

    let download = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.start_download(0).await })
    };
    while reconciler.state(0) != Some(RowState::InFlight) {
        tokio::task::yield_now().await;
    }

    assert!(!reconciler.receive(
        0,
        Some(harvest_bridge::ItemStatus {
            external_id: "1".to_string(),
            progress: 1.0,
            error: None,
        })
    ));
    gateway.set_statuses(vec![status("1", 1.0)]);
    reconciler.refresh_statuses().await;
    assert_eq!(reconciler.state(0), Some(RowState::InFlight));

    gate.notify_one();
    download.await.expect("join").expect("download");

    assert_eq!(reconciler.state(0), Some(RowState::Downloaded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_downloads_on_one_row_post_once() {
    let gate = Arc::new(Notify::new());
    let gateway = Arc::new(FakeGateway {
        add_gate: Some(gate.clone()),
        ..FakeGateway::default()
    });
    let (reconciler, _events) =
        StatusReconciler::new("redacted", items(&["1"]), gateway.clone(), PollingConfig::default());
    reconciler.refresh_statuses().await;

    let barrier = Arc::new(tokio::sync::Barrier::new(8));
    let downloads: Vec<_> = (0..8)
        .map(|_| {
            let reconciler = Arc::clone(&reconciler);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                reconciler.start_download(0).await
            })
        })
        .collect();

    while gateway.add_calls.lock().unwrap().is_empty() {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.notify_one();
    for download in downloads {
        download.await.expect("join").expect("download");
    }

    assert_eq!(gateway.add_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn download_posts_then_re_polls_immediately() {
    let gateway = Arc::new(FakeGateway::default());
    let (reconciler, mut events) =
        StatusReconciler::new("redacted", items(&["7"]), gateway.clone(), PollingConfig::default());
    reconciler.refresh_statuses().await;
    drain(&mut events);
    let polls_before = gateway.calls();

    gateway.set_statuses(vec![status("7", 0.0)]);
    reconciler.start_download(0).await.expect("download");

    assert_eq!(
        gateway.add_calls.lock().unwrap().clone(),
        vec![("redacted".to_string(), "7".to_string())]
    );
    assert_eq!(gateway.calls(), polls_before + 1);
    assert_eq!(reconciler.state(0), Some(RowState::Downloading));

    let seen = drain(&mut events);
    let states: Vec<RowState> = seen
        .iter()
        .filter_map(|event| match event {
            ReconcilerEvent::RowChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![RowState::InFlight, RowState::Unknown, RowState::Downloading]
    );
    assert!(seen.contains(&ReconcilerEvent::DownloadAdded {
        external_id: "7".to_string(),
        name: Some("Some Album".to_string()),
    }));
}

#[tokio::test]
async fn failed_download_reports_detail_and_recovers() {
    let gateway = Arc::new(FakeGateway::default());
    *gateway.add_fails.lock().unwrap() = true;
    let (reconciler, mut events) =
        StatusReconciler::new("redacted", items(&["7"]), gateway.clone(), PollingConfig::default());
    reconciler.refresh_statuses().await;
    drain(&mut events);

    let err = reconciler.start_download(0).await.unwrap_err();
    assert_eq!(err.status(), Some(400));

    assert_eq!(reconciler.state(0), Some(RowState::NotStarted));
    assert!(drain(&mut events).contains(&ReconcilerEvent::DownloadFailed {
        external_id: "7".to_string(),
        detail: "Torrent already exists.".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn polling_runs_immediately_then_on_interval() {
    let gateway = Arc::new(FakeGateway::default());
    let (reconciler, _events) =
        StatusReconciler::new("redacted", items(&["1", "2"]), gateway.clone(), PollingConfig::default());

    let cancel = reconciler.start_polling().expect("polling");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.calls(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(gateway.calls(), 2);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(gateway.calls(), 3);

    drop(cancel);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn large_pages_poll_only_once() {
    let gateway = Arc::new(FakeGateway::default());
    let polling = PollingConfig {
        max_items: 3,
        ..PollingConfig::default()
    };
    let (reconciler, _events) =
        StatusReconciler::new("redacted", items(&["1", "2", "3"]), gateway.clone(), polling);

    assert!(!reconciler.periodic_polling_enabled());
    let _cancel = reconciler.start_polling().expect("polling");
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn empty_pages_do_not_poll() {
    let gateway = Arc::new(FakeGateway::default());
    let (reconciler, _events) =
        StatusReconciler::new("redacted", Vec::new(), gateway.clone(), PollingConfig::default());
    assert!(reconciler.start_polling().is_none());
    assert_eq!(gateway.calls(), 0);
}
