//! face-bridge - expression-driven scene switching for OBS
//!
//! Bridges a webcam facial-expression classifier to OBS Studio: each detected
//! expression makes the like-named scene item the only visible one in the
//! configured scene.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod config;
mod expression;
mod obs;

use crate::cache::{SettingsCache, CONNECTION_KEY};
use crate::config::{AppConfig, ConnectionSettings};
use crate::obs::{
    ConnectionState, ExpressionSceneController, ObsConnection, ObsEvent, SceneRemote,
};

/// Face Bridge - drive OBS scene items from detected facial expressions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Override the HTTP listen address from the config file
    #[arg(long)]
    listen: Option<String>,

    /// Override the settings-cache file location
    #[arg(long)]
    cache: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Face Bridge...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load_or_default(&args.config).await?;

    let cache_path = args
        .cache
        .map(Into::into)
        .unwrap_or_else(SettingsCache::default_path);
    let cache = Arc::new(SettingsCache::open(&cache_path).await);

    // Last-used settings win over the config file.
    let settings: ConnectionSettings = cache.get(CONNECTION_KEY).unwrap_or_else(|| {
        debug!("No cached connection settings; using config defaults");
        config.obs.clone()
    });

    let connection = Arc::new(ObsConnection::new(
        Duration::from_millis(config.call_timeout_ms),
        Duration::from_millis(config.connect_timeout_ms),
    ));
    let controller = Arc::new(ExpressionSceneController::new(
        Arc::clone(&connection) as Arc<dyn SceneRemote>,
        config.scene.clone(),
        config.min_confidence,
        Duration::from_millis(config.ready_grace_ms),
    ));

    register_scene_event_handlers(&connection, &controller, &config.scene);

    let (reconnect_tx, reconnect_rx) = mpsc::channel::<ConnectionSettings>(8);

    // HTTP boundary for the UI and the classifier
    let api_state = Arc::new(api::ApiState {
        connection: Arc::clone(&connection),
        controller: Arc::clone(&controller),
        cache: Arc::clone(&cache),
        reconnect_tx,
    });
    let listen = args.listen.unwrap_or_else(|| config.http_listen.clone());
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_state, &listen).await {
            error!("API server stopped: {:#}", e);
        }
    });

    tokio::select! {
        _ = run_supervisor(
            Arc::clone(&connection),
            Arc::clone(&controller),
            settings,
            reconnect_rx,
        ) => {}
        _ = shutdown_signal() => {}
    }

    controller.reset();
    connection.disconnect();
    info!("Face Bridge shutdown complete");
    Ok(())
}

/// Invalidate the controller's mirror when the target scene's structure
/// changes remotely.
fn register_scene_event_handlers(
    connection: &Arc<ObsConnection>,
    controller: &Arc<ExpressionSceneController>,
    scene: &str,
) {
    for event_type in [
        "SceneItemCreated",
        "SceneItemRemoved",
        "SceneItemListReindexed",
    ] {
        let controller = Arc::clone(controller);
        let scene = scene.to_string();
        connection.subscribe(
            event_type,
            Arc::new(move |event: &ObsEvent| {
                let changed_scene = event.data.get("sceneName").and_then(|v| v.as_str());
                if changed_scene == Some(scene.as_str()) {
                    controller.mark_scene_changed();
                }
            }),
        );
    }

    connection.subscribe(
        "CurrentProgramSceneChanged",
        Arc::new(|event: &ObsEvent| {
            let name = event.data.get("sceneName").and_then(|v| v.as_str());
            debug!("Program scene changed to {:?}", name);
        }),
    );
}

/// Keep the connection alive: connect, initialize the controller, and on loss
/// retry with linear backoff capped at 30s. New settings from the API cause an
/// immediate reconnect.
async fn run_supervisor(
    connection: Arc<ObsConnection>,
    controller: Arc<ExpressionSceneController>,
    mut settings: ConnectionSettings,
    mut reconnect_rx: mpsc::Receiver<ConnectionSettings>,
) {
    let mut attempts: u32 = 0;

    loop {
        match connection.connect(&settings).await {
            Ok(_info) => {
                attempts = 0;
                if let Err(e) = controller.initialize().await {
                    warn!("Controller initialization failed: {}", e);
                }

                let mut states = connection.state_changes();
                tokio::select! {
                    result = states.wait_for(|s| {
                        matches!(s, ConnectionState::Disconnected | ConnectionState::Failed(_))
                    }) => {
                        controller.reset();
                        if result.is_err() {
                            return;
                        }
                        info!("Connection lost; reconnecting");
                    }
                    maybe_settings = reconnect_rx.recv() => {
                        let Some(new_settings) = maybe_settings else { return };
                        settings = new_settings;
                        controller.reset();
                        connection.disconnect();
                    }
                }
            },
            Err(e) => {
                attempts += 1;
                let backoff = Duration::from_millis((1000 * attempts as u64).min(30_000));
                warn!("Connection attempt failed: {} (retrying in {:?})", e, backoff);
                tokio::select! {
                    _ = sleep(backoff) => {}
                    maybe_settings = reconnect_rx.recv() => {
                        let Some(new_settings) = maybe_settings else { return };
                        settings = new_settings;
                        attempts = 0;
                    }
                }
            },
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
