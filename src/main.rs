use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use sandlot::cli::Cli;
use sandlot::core::broadcast::BroadcastBus;
use sandlot::core::connection::ConnectionTable;
use sandlot::core::history::MessageHistory;
use sandlot::core::registry::ConnectionRegistry;
use sandlot::core::scene::SceneRegistry;
use sandlot::scripting::ScriptEngine;
use sandlot::{Router, WebSocketServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = Cli::parse().into_config();

    // 1. Shared state, built once and handed out by Arc
    let table = Arc::new(ConnectionTable::new());
    let bus = Arc::new(BroadcastBus::new(table));
    let scene = Arc::new(SceneRegistry::new(bus));
    let history = Arc::new(MessageHistory::default());
    let mut registry = ConnectionRegistry::new(scene.clone());
    if config.replay_history {
        registry = registry.with_history_replay(history.clone());
    }
    let registry = Arc::new(registry);

    // 2. Populate the scene and start warming up scripting in the background
    scene.reset(&registry);
    let scripts = ScriptEngine::new(scene, config.scripts.clone());
    let warm_up = scripts.warm_up();
    tokio::spawn(async move {
        if let Err(err) = warm_up.await {
            error!(error = %err, "scripting warm-up task failed");
        }
    });

    // 3. Serve until interrupted
    if let Some(root) = &config.static_root {
        info!(root = %root.display(), "static client root");
    }
    let router = Router::new(registry, history, scripts);
    let server = WebSocketServer::bind(config, router).await?;
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
