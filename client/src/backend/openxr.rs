//! OpenXR backend: the client on a real runtime.
//!
//! The runtime adapters come from [`crate::vr::OpenXrRuntime`], which is
//! a stub unless the `vr` feature is enabled.  No streaming service is
//! wired in here, so every tick draws the local scene.

use tracing::info;

use super::{BackendSession, LoopConfig, StaticHead};
use crate::render::TraceScene;
use crate::state::{ClientConfig, ClientParts, ClientState};
use crate::vr::frame_pacer::OfflinePipeline;
use crate::vr::pose::Pose;
use crate::vr::remote::LoggedOrigin;
use crate::vr::OpenXrRuntime;

/// Standing eye height for the fixed head pose.
const EYE_HEIGHT_M: f32 = 1.6;

/// Probe for a usable OpenXR runtime.
pub fn available() -> anyhow::Result<bool> {
    Ok(OpenXrRuntime::initialize()?.is_some())
}

fn build(client_config: &ClientConfig) -> anyhow::Result<BackendSession> {
    let Some(parts) = OpenXrRuntime::initialize()? else {
        anyhow::bail!("OpenXR runtime became unavailable");
    };
    info!("OpenXR backend: {}", parts.description);

    let parts = ClientParts {
        runtime: parts.runtime,
        events: parts.events,
        actions: parts.actions,
        pipeline: Box::new(OfflinePipeline),
        local_scene: Box::new(TraceScene::new("local")),
        remote_scene: Box::new(TraceScene::new("remote")),
        tracking_origin: Box::new(LoggedOrigin::default()),
    };
    Ok(BackendSession {
        client: ClientState::new(parts, client_config.clone()),
        head: Box::new(StaticHead(Pose {
            position: [0.0, EYE_HEIGHT_M, 0.0],
            ..Pose::default()
        })),
    })
}

/// Run the client on the OpenXR runtime.  Each restart recreates the
/// instance as well as the session.
pub fn run(client_config: ClientConfig, loop_config: LoopConfig) -> anyhow::Result<()> {
    super::run_client(&loop_config, || build(&client_config))?;
    info!("OpenXR backend shutting down");
    Ok(())
}
