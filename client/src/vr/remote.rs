//! Remote link: connection state of the streaming session.
//!
//! The remote pipeline reports connection changes through the
//! [`StateObserver`] capability.  [`RemoteLink`] owns the `connected`
//! flag the frame pacer and scene selection read, together with the
//! last displayed remote frame.  [`LinkObserver`] applies a callback to
//! the link, the scenes and the tracking origin in one place.

use tracing::{error, info, warn};

use super::frame_pacer::FrameSlot;
use super::pose::Pose;
use crate::render::Scenes;

// ── Callbacks ──────────────────────────────────────────────

/// Why the remote side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Media transport channel closed.
    TransportClosed,
    /// Render server dropped its control connection.
    RenderServerClosed,
    /// Proxy server in front of the render server closed.
    ProxyServerClosed,
    Other(i32),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportClosed => "transport-closed",
            Self::RenderServerClosed => "render-server-closed",
            Self::ProxyServerClosed => "proxy-server-closed",
            Self::Other(_) => "other",
        }
    }

    /// Message shown to the user, if the reason has one.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::TransportClosed => Some("media channel closed, check the network"),
            Self::RenderServerClosed => Some("render server closed the connection"),
            Self::ProxyServerClosed => Some("proxy server closed, the session has ended"),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Connected,
    MediaReady,
    Closed(CloseReason),
}

/// Error code for a failed application entry.  The link stays up.
pub const ERROR_ENTER_APP_FAILED: i32 = 1;

/// Receiver of remote pipeline callbacks.
pub trait StateObserver {
    fn on_state_changed(&mut self, state: RemoteState);
    fn on_error(&mut self, code: i32, message: &str);
}

// ── Tracking origin ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOriginKind {
    /// Seated: origin at the headset's eye height.
    EyeLevel,
    /// Standing: origin on the floor.
    FloorLevel,
}

impl TrackingOriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EyeLevel => "eye-level",
            Self::FloorLevel => "floor-level",
        }
    }
}

pub trait TrackingOrigin {
    /// Returns false if the runtime refused the change.
    fn reset(&mut self, kind: TrackingOriginKind) -> bool;
}

// ── Link ───────────────────────────────────────────────────

pub struct RemoteLink {
    connected: bool,
    last_frame: Option<FrameSlot>,
    origin: Box<dyn TrackingOrigin>,
    /// Callbacks received since startup.
    pub events: u64,
    pub errors: u64,
}

impl RemoteLink {
    pub fn new(origin: Box<dyn TrackingOrigin>) -> Self {
        Self {
            connected: false,
            last_frame: None,
            origin,
            events: 0,
            errors: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Remember the frame just handed to the remote scene.
    pub fn set_frame(&mut self, slot: FrameSlot) {
        self.last_frame = Some(slot);
    }

    /// Pose of the last displayed remote frame.  `None` while disconnected
    /// or before the first frame.
    pub fn render_pose(&self) -> Option<Pose> {
        if !self.connected {
            return None;
        }
        self.last_frame
            .filter(|slot| slot.frame_index != 0)
            .map(|slot| slot.pose)
    }

    fn reset_tracking(&mut self, kind: TrackingOriginKind) {
        if !self.origin.reset(kind) {
            warn!(origin = kind.as_str(), "tracking origin reset failed");
        }
    }
}

/// Applies callbacks for the duration of one dispatch.
pub struct LinkObserver<'a> {
    pub link: &'a mut RemoteLink,
    pub scenes: &'a mut Scenes,
}

impl<'a> LinkObserver<'a> {
    pub fn new(link: &'a mut RemoteLink, scenes: &'a mut Scenes) -> Self {
        Self { link, scenes }
    }
}

impl StateObserver for LinkObserver<'_> {
    fn on_state_changed(&mut self, state: RemoteState) {
        self.link.events += 1;
        match state {
            RemoteState::Connected => {
                info!("remote link connected");
                self.link.connected = true;
                self.scenes.remote.on_connect();
            }
            RemoteState::MediaReady => {
                info!("remote media ready");
                self.scenes.remote.on_media_ready();
                self.link.reset_tracking(TrackingOriginKind::FloorLevel);
            }
            RemoteState::Closed(reason) => {
                self.link.connected = false;
                self.link.last_frame = None;
                self.scenes.remote.on_close();
                self.scenes.local.home_page();
                match (reason, reason.user_message()) {
                    (_, Some(msg)) => warn!(reason = reason.as_str(), "remote closed: {}", msg),
                    (CloseReason::Other(code), None) => info!(code, "remote closed"),
                    _ => info!(reason = reason.as_str(), "remote closed"),
                }
                self.link.reset_tracking(TrackingOriginKind::EyeLevel);
            }
        }
    }

    fn on_error(&mut self, code: i32, message: &str) {
        self.link.errors += 1;
        error!(code, "remote error: {}", message);
        if code != ERROR_ENTER_APP_FAILED {
            self.link.connected = false;
        }
        self.scenes.local.home_page();
        self.link.reset_tracking(TrackingOriginKind::EyeLevel);
    }
}

/// Tracking origin that only logs.  Used where no runtime reference
/// space can be recentred.
#[derive(Debug, Default)]
pub struct LoggedOrigin {
    pub current: Option<TrackingOriginKind>,
}

impl TrackingOrigin for LoggedOrigin {
    fn reset(&mut self, kind: TrackingOriginKind) -> bool {
        info!(origin = kind.as_str(), "tracking origin reset");
        self.current = Some(kind);
        true
    }
}
