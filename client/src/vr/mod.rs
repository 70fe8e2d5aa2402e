//! XR subsystem: session lifecycle, controller input and remote frame pacing.
//!
//! Provides:
//! - `event` / `session`: runtime events and the session state machine
//! - `input`: edge-triggered controller polling
//! - `frame_pacer` / `latency`: remote frame acquisition and instrumentation
//! - `remote`: connection callbacks from the streaming pipeline
//! - `OpenXrRuntime`: OpenXR adapters (gated behind `vr` feature)

pub mod event;
pub mod frame_pacer;
pub mod input;
pub mod latency;
pub mod pose;
pub mod remote;
pub mod session;

#[cfg(feature = "vr")]
pub mod openxr_state;

#[cfg(feature = "vr")]
pub use openxr_state::OpenXrRuntime;

#[cfg(not(feature = "vr"))]
pub mod stub;

#[cfg(not(feature = "vr"))]
pub use stub::OpenXrRuntime;

/// Runtime-side collaborators produced by a runtime adapter.
pub struct RuntimeParts {
    pub runtime: Box<dyn session::SessionRuntime>,
    pub events: Box<dyn event::EventSource>,
    pub actions: Box<dyn input::ActionSource>,
    /// Runtime and system name, for logs.
    pub description: String,
}
