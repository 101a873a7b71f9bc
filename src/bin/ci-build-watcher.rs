use anyhow::Result;
use ci_build_watcher::{
    ClientBus, ConnectionId, DashboardHub, HubCommand, MemoryStore, Project, RefreshOrchestrator,
    SharedClientBus, SubscriptionRegistry, TeamCityClient, WatcherConfig,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{
    fs,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "ci-build-watcher.toml")]
    config: PathBuf,
}

#[derive(Deserialize, Default)]
struct AppConfig {
    #[serde(flatten)]
    watcher: WatcherConfig,
    #[serde(default)]
    seeds: Vec<SeedUser>,
}

#[derive(Deserialize)]
struct SeedUser {
    user: String,
    #[serde(default)]
    projects: Vec<Project>,
}

/// Session handshake; everything after it is a `HubCommand`.
#[derive(Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum SessionCommand {
    Connect { user: String },
}

static NEXT_CONN: AtomicU64 = AtomicU64::new(0);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let cfg: AppConfig = match fs::read_to_string(&args.config) {
        Ok(data) => toml::from_str(&data)?,
        Err(_) => AppConfig::default(),
    };

    let registry = SubscriptionRegistry::new();
    let bus: SharedClientBus = Arc::new(ClientBus::new(1024));
    let provider = Arc::new(TeamCityClient::new(cfg.watcher.teamcity.clone())?);
    let store = Arc::new(MemoryStore::new());
    for seed in cfg.seeds {
        store.seed(&seed.user, seed.projects);
    }

    let refresh = RefreshOrchestrator::new(registry.clone(), provider, bus.clone());
    refresh.spawn_periodic(cfg.watcher.refresh_interval_secs);
    let hub = Arc::new(DashboardHub::new(registry, refresh, store, bus.clone()));

    let listener = TcpListener::bind(&cfg.watcher.listen_addr).await?;
    info!(addr = %cfg.watcher.listen_addr, "listening for dashboard clients");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let conn =
                    ConnectionId::new(format!("conn-{}", NEXT_CONN.fetch_add(1, Ordering::Relaxed)));
                info!(conn=%conn, %peer, "client connected");
                let hub = hub.clone();
                let bus = bus.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn.clone(), hub.clone(), bus).await {
                        warn!(err=%e, conn=%conn, "connection ended with error");
                    }
                    hub.on_disconnected(&conn);
                });
            }
            Err(e) => warn!(err=%e, "accept failed"),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn: ConnectionId,
    hub: Arc<DashboardHub>,
    bus: SharedClientBus,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut rx = bus.subscribe();

    let outbound_conn = conn.clone();
    let outbound = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let mine = envelope
                        .to
                        .as_ref()
                        .map(|to| *to == outbound_conn)
                        .unwrap_or(true);
                    if !mine {
                        continue;
                    }
                    let text = match serde_json::to_string(&envelope.message) {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    let mut user = String::from("guest");
    while let Some(frame) = read.next().await {
        let frame = frame?;
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        if let Ok(SessionCommand::Connect { user: name }) = serde_json::from_str(&text) {
            user = name;
            hub.on_connected(&user, &conn).await;
            continue;
        }
        match serde_json::from_str::<HubCommand>(&text) {
            Ok(command) => hub.dispatch(&user, &conn, command).await,
            Err(e) => warn!(err=%e, conn=%conn, "unrecognized command"),
        }
    }

    outbound.abort();
    Ok(())
}
