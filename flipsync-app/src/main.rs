//! flipsync: headless host for the frame-synchronized audio engine.
//!
//! Loads settings, runs the frame loop against the configured audio
//! backend until Ctrl-C, a time limit, or a frame limit, then prints the
//! loop diagnostics as JSON.

mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flipsync_core::{
    debug::PixelBuffer, error::Result as CoreResult, EngineStatus, FlipService, GameHandle,
    SyncEngine, ToneGame,
};

use crate::settings::{default_settings_path, load_settings, save_settings, CliArgs, USAGE};

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DisplayStats {
    flips: u64,
    last_frame_checksum: u64,
}

/// Display without a window: keeps a running count and a checksum of the
/// last presented frame.
struct HeadlessDisplay {
    stats: Arc<Mutex<DisplayStats>>,
}

impl FlipService for HeadlessDisplay {
    fn flip(&mut self, frame: &PixelBuffer) -> CoreResult<()> {
        let checksum = frame
            .pixels()
            .iter()
            .fold(0u64, |acc, px| acc.rotate_left(5) ^ u64::from(*px));
        let mut stats = self.stats.lock();
        stats.flips += 1;
        stats.last_frame_checksum = checksum;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport {
    status: EngineStatus,
    diagnostics: flipsync_core::DiagnosticsSnapshot,
    display: DisplayStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flipsync=info,flipsync_core=info")),
        )
        .init();

    let cli = CliArgs::parse(std::env::args().skip(1))?;
    if cli.help {
        println!("{USAGE}");
        return Ok(());
    }

    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    settings.apply_cli(&cli);
    settings.normalize();
    if cli.save {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("failed to save {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    let config = settings.to_engine_config();
    info!(
        backend = ?config.backend,
        update_hz = config.game_update_hz,
        tone_hz = config.tone_hz,
        safety_bytes = config.safety_bytes(),
        "flipsync starting"
    );

    let engine = SyncEngine::new(config, GameHandle::new(ToneGame::new()));

    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => info!(status = ?event.status, detail = ?event.detail, "engine status"),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "status listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let stats = Arc::new(Mutex::new(DisplayStats::default()));
    engine.start_with_display(HeadlessDisplay {
        stats: Arc::clone(&stats),
    })?;

    let deadline = async {
        match settings.run_limit() {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            _ = &mut deadline => {
                info!("run time limit reached");
                break;
            }
            _ = poll.tick() => {
                if !engine.is_running() {
                    break;
                }
            }
        }
    }

    if engine.is_running() {
        if let Err(e) = engine.stop() {
            warn!("stop: {e}");
        }
    }
    engine.join().await?;

    let report = RunReport {
        status: engine.status(),
        diagnostics: engine.diagnostics_snapshot(),
        display: stats.lock().clone(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
