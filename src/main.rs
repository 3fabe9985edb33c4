//! Wanchat server binary
//!
//! Loads configuration, restores the room from disk and serves the
//! WebSocket endpoint until a signal arrives or someone runs `/killall`.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use wanchat::api::handlers::AppState;
use wanchat::api::server::init_tracing;
use wanchat::api::{ApiServer, Hub};
use wanchat::appraisal::Appraiser;
use wanchat::clock::TimerEvent;
use wanchat::config::ConfigLoader;
use wanchat::errors::{WanchatError, WanchatResult};
use wanchat::metrics::RoomMetrics;
use wanchat::room::{Room, RoomEvent};
use wanchat::storage::JsonFileStore;

#[derive(Parser, Debug)]
#[command(name = "wanchat")]
#[command(about = "Multiplayer chat room with games and a shared economy", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the JSON record files
    #[arg(long)]
    data_dir: Option<String>,

    /// Text generator endpoint for appraisals (enables the generator)
    #[arg(long)]
    generator_url: Option<String>,

    /// Always use the local appraisal fallback
    #[arg(long)]
    offline_generator: bool,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        error!("Fatal: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> WanchatResult<()> {
    let loader = match args.config {
        Some(ref path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(url) = args.generator_url {
        config.generator.url = url;
        config.generator.enabled = true;
    }
    if args.offline_generator {
        config.generator.enabled = false;
    }
    loader.validate(&config)?;

    if let Some(path) = args.write_config {
        loader.save(&config, &path)?;
        println!("✅ Configuration written to {}", path);
        return Ok(());
    }

    init_tracing(&config.logging.filter);
    info!("🚀 Starting wanchat v{}", env!("CARGO_PKG_VERSION"));
    info!("   Data directory: {}", config.storage.data_dir);
    if config.generator.enabled {
        info!("   Appraisal generator: {} ({})", config.generator.url, config.generator.model);
    } else {
        info!("   Appraisal generator: offline");
    }

    let store = JsonFileStore::open(&config.storage.data_dir)?;
    let hub = Arc::new(Hub::new(config.server.broadcast_capacity));
    let metrics = Arc::new(RoomMetrics::new());
    let appraiser = Appraiser::from_config(&config.generator);

    let (room, handle) = Room::new(
        config.clone(),
        Box::new(store),
        hub.clone(),
        appraiser,
        metrics.clone(),
    )?;
    let mut room_task = tokio::spawn(room.run());
    let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel::<()>();

    let state = Arc::new(AppState {
        room: handle.clone(),
        hub,
        metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let server = ApiServer::new(config.server.clone(), state);
    let mut served = tokio::spawn(server.run(async move {
        let _ = stopped_rx.await;
    }));

    // Either the room stops by itself or the server is told to stop
    tokio::select! {
        _ = &mut room_task => {
            let _ = stopped_tx.send(());
            served.await.map_err(|e| WanchatError::Server(e.to_string()))??;
        }
        result = &mut served => {
            handle.send(RoomEvent::Timer(TimerEvent::Shutdown));
            let _ = room_task.await;
            result.map_err(|e| WanchatError::Server(e.to_string()))??;
        }
    }

    info!("👋 Wanchat shut down");
    Ok(())
}
