use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use harvest_bridge::{
    BridgeError, ConfigSource, ConnectionProbe, CookieBridge, CookieJar, CookieStore,
    LoginEventRouter, PageGateway, PollingConfig, ReconcilerEvent, RemoteClient, Request,
    StatusReconciler, StoreManager, TrackedItem, Tracker,
};

#[derive(Debug, Parser)]
#[command(name = "harvest-bridge", version, about = "Share a tracker session with Harvest")]
struct Cli {
    /// Settings file holding url, token and autoLogin
    #[arg(long, env = "HARVEST_BRIDGE_CONFIG", default_value = "settings.json")]
    config: PathBuf,

    /// Cookie jar file standing in for the browser cookie store
    #[arg(long, env = "HARVEST_BRIDGE_COOKIES", default_value = "cookies.json")]
    cookies: PathBuf,

    /// Tracker realm name
    #[arg(long, default_value = "redacted")]
    tracker: String,

    /// URL the tracker session cookie is scoped to
    #[arg(long, default_value = "https://redacted.ch/")]
    tracker_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store the Harvest URL and token
    Configure {
        #[arg(long)]
        url: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        auto_login: Option<bool>,
    },
    /// Ping Harvest and sync cookies once
    TestConnection,
    /// Exchange the session cookie with Harvest
    Sync {
        /// Only push the local cookie, never install one from Harvest
        #[arg(long)]
        no_receive: bool,
    },
    /// Ask the background router for a login, as a page would
    Login,
    /// Print Harvest's view of the given tracker ids
    Statuses { ids: Vec<String> },
    /// Track the given ids and log row changes until interrupted
    Watch {
        ids: Vec<String>,
        /// Start a download for this id once the first poll answered
        #[arg(long)]
        download: Option<String>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), BridgeError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), BridgeError> {
    let store = Arc::new(StoreManager::open(cli.config.clone())?);

    if let Command::Configure {
        url,
        token,
        auto_login,
    } = &cli.command
    {
        store.set_connection(url, token)?;
        if let Some(enabled) = auto_login {
            store.set_auto_login(*enabled)?;
        }
        log::info!("Settings saved to {}", cli.config.display());
        return Ok(());
    }

    let config: Arc<dyn ConfigSource> = store;
    let jar = Arc::new(CookieJar::open(cli.cookies.clone())?);
    jar.sweep_expired()?;
    let cookies: Arc<dyn CookieStore> = jar.clone();

    let client = RemoteClient::new(config)?;
    let tracker = Tracker::new(cli.tracker.clone(), cli.tracker_url.clone());
    let bridge = CookieBridge::new(client.clone(), cookies, tracker.clone());

    match cli.command {
        Command::Configure { .. } => Ok(()),
        Command::TestConnection => {
            let message = ConnectionProbe::new(bridge).test_connection().await?;
            println!("{}", message);
            Ok(())
        }
        Command::Sync { no_receive } => {
            let held = bridge.synchronize(!no_receive).await?;
            println!("Harvest holds cookies for this session: {}", held);
            Ok(())
        }
        Command::Login => {
            let router = LoginEventRouter::new(bridge).spawn(jar.subscribe());
            let response = router.request(Request::RequestLogin).await?;
            router.shutdown().await;
            print_json(&response)
        }
        Command::Statuses { ids } => {
            let router = LoginEventRouter::new(bridge).spawn(jar.subscribe());
            let response = router
                .request(Request::GetTorrentStatuses {
                    realm_name: tracker.name.clone(),
                    torrent_ids: ids,
                })
                .await?;
            router.shutdown().await;
            print_json(&response)
        }
        Command::Watch { ids, download } => {
            let router = LoginEventRouter::new(bridge).spawn(jar.subscribe());
            let gateway = Arc::new(PageGateway::new(router.clone(), client));
            let items = ids.iter().map(TrackedItem::new).collect::<Vec<_>>();
            let (reconciler, mut events) =
                StatusReconciler::new(tracker.name.clone(), items, gateway, PollingConfig::default());
            let _polling = reconciler.start_polling();

            let mut pending_download = download.and_then(|id| ids.iter().position(|i| *i == id));
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        match &event {
                            ReconcilerEvent::RowChanged { display_id, state, progress, .. } => {
                                log::info!("{} -> {:?} {:?}", display_id, state, progress);
                            }
                            ReconcilerEvent::DownloadAdded { external_id, name } => {
                                log::info!("Added torrent {} - {}", external_id, name.as_deref().unwrap_or("?"));
                            }
                            ReconcilerEvent::DownloadFailed { external_id, detail } => {
                                log::error!("Error adding torrent {}: {}", external_id, detail);
                            }
                            ReconcilerEvent::StatusError { detail } => {
                                log::error!("Failed getting Harvest torrent statuses: {}", detail);
                            }
                        }
                        if let Some(index) = pending_download {
                            if reconciler.state(index).is_some_and(|s| !s.is_loading()) {
                                pending_download = None;
                                let reconciler = Arc::clone(&reconciler);
                                tokio::spawn(async move {
                                    let _ = reconciler.start_download(index).await;
                                });
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            router.shutdown().await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logger
    env_logger::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
