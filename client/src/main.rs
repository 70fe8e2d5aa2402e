//! xr-stream-client: XR session lifecycle and remote frame pacing.
//!
//! Drives an XR session through its runtime-managed lifecycle and, each
//! tick, displays either a remotely rendered frame or the local scene.

mod backend;
mod render;
mod state;
pub mod vr;

use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::headless::HeadlessConfig;
use crate::backend::{BackendType, LoopConfig};
use crate::state::ClientConfig;
use crate::vr::frame_pacer::PacerMode;

#[derive(Parser, Debug)]
#[command(name = "xr-stream-client", about = "XR remote streaming client")]
struct Cli {
    /// Backend to use: headless, openxr, or auto
    #[arg(long, default_value = "auto")]
    backend: String,

    /// Frame pacing strategy: direct or queued
    #[arg(long, default_value = "direct")]
    pacer: String,

    /// Longest wait for a remote frame per tick, in milliseconds
    #[arg(long, default_value_t = 100)]
    frame_deadline_ms: u64,

    /// Request session exit after N seconds (CI)
    #[arg(long)]
    exit_after: Option<u64>,

    /// Session recreations allowed after a session loss
    #[arg(long, default_value_t = 3)]
    max_restarts: u32,

    /// Render loop rate while the session runs
    #[arg(long, default_value_t = 72)]
    tick_hz: u32,

    /// Simulated remote frame rate (headless; 0 = no remote)
    #[arg(long, default_value_t = 72)]
    sim_frame_hz: u32,

    /// Simulated remote disconnect N seconds after media ready (headless)
    #[arg(long)]
    sim_disconnect_after: Option<u64>,

    /// Simulated session loss N seconds after each session starts (headless)
    #[arg(long)]
    sim_loss_after: Option<u64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("xr-stream-client {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xr_stream_client=info".into()),
        )
        .init();

    info!("xr-stream-client v{} starting", env!("CARGO_PKG_VERSION"));
    info!("backend: {}", cli.backend);

    let Some(mode) = PacerMode::parse(&cli.pacer) else {
        eprintln!("Unknown pacer: {}. Use: direct or queued", cli.pacer);
        std::process::exit(1);
    };

    let backend_type = match cli.backend.as_str() {
        "headless" => BackendType::Headless,
        "openxr" => BackendType::OpenXr,
        "auto" => {
            if std::env::var("XR_CLIENT_FORCE_HEADLESS").is_ok() {
                info!("auto-detected: XR_CLIENT_FORCE_HEADLESS set, using headless backend");
                BackendType::Headless
            } else if backend::openxr::available()? {
                info!("auto-detected: OpenXR runtime found, using openxr backend");
                BackendType::OpenXr
            } else {
                warn!("auto-detected: no OpenXR runtime, falling back to headless backend");
                BackendType::Headless
            }
        }
        other => {
            eprintln!("Unknown backend: {other}. Use: headless, openxr, or auto");
            std::process::exit(1);
        }
    };

    let mut client_config = ClientConfig::default();
    client_config.pacer.mode = mode;
    client_config.pacer.deadline = Duration::from_millis(cli.frame_deadline_ms);

    let loop_config = LoopConfig {
        exit_after: cli.exit_after.map(Duration::from_secs),
        max_restarts: cli.max_restarts,
        tick_interval: Duration::from_secs_f64(1.0 / cli.tick_hz.max(1) as f64),
        ..Default::default()
    };

    info!(
        "running {} backend (pacer={}, deadline={}ms)",
        backend_type.as_str(),
        mode.as_str(),
        cli.frame_deadline_ms
    );
    match backend_type {
        BackendType::Headless => {
            let headless = HeadlessConfig {
                frame_hz: cli.sim_frame_hz,
                disconnect_after: cli.sim_disconnect_after.map(Duration::from_secs),
                loss_after: cli.sim_loss_after.map(Duration::from_secs),
                ..Default::default()
            };
            backend::headless::run(headless, client_config, loop_config)
        }
        BackendType::OpenXr => backend::openxr::run(client_config, loop_config),
    }
}
