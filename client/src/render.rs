//! Scene selection: which renderer draws this tick.
//!
//! The client keeps two scenes.  The local scene is the home page shown
//! while no streaming session is up; the remote scene displays decoded
//! remote frames.  Pose updates and per-eye draws go to the remote scene
//! while connected and to the local scene otherwise.  The draw calls
//! themselves are collaborators behind [`SceneRenderer`].

use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

use crate::vr::frame_pacer::FrameSlot;
use crate::vr::pose::Pose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// A scene the render loop can draw.
pub trait SceneRenderer {
    fn name(&self) -> &'static str;
    fn update_pose(&mut self, rotation: [f32; 4], position: [f32; 3]);
    fn draw(&mut self, eye: Eye);

    // Connection notifications.  Scenes ignore the ones they don't use.
    fn on_connect(&mut self) {}
    fn on_close(&mut self) {}
    fn on_media_ready(&mut self) {}
    fn home_page(&mut self) {}
    /// A new remote frame is ready to be sampled by the next draw.
    fn set_video_frame(&mut self, _slot: &FrameSlot) {}
}

/// The local/remote scene pair.
pub struct Scenes {
    pub local: Box<dyn SceneRenderer>,
    pub remote: Box<dyn SceneRenderer>,
}

impl Scenes {
    pub fn new(local: Box<dyn SceneRenderer>, remote: Box<dyn SceneRenderer>) -> Self {
        Self { local, remote }
    }

    /// Scene that owns the display for the given link state.
    pub fn active(&mut self, connected: bool) -> &mut dyn SceneRenderer {
        if connected {
            self.remote.as_mut()
        } else {
            self.local.as_mut()
        }
    }

    pub fn update_pose(&mut self, connected: bool, pose: &Pose) {
        self.active(connected)
            .update_pose(pose.orientation, pose.position);
    }

    pub fn draw_eyes(&mut self, connected: bool) {
        let scene = self.active(connected);
        for eye in Eye::BOTH {
            scene.draw(eye);
        }
    }
}

// ── Trace scene ────────────────────────────────────────────

/// Counters a [`TraceScene`] accumulates.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SceneCounters {
    pub draws: u64,
    pub pose_updates: u64,
    pub connects: u32,
    pub closes: u32,
    pub media_ready: u32,
    pub home_pages: u32,
    pub video_frames: u64,
    pub last_frame_index: u64,
    pub last_rotation: [f32; 4],
}

/// Shared read handle on a [`TraceScene`]'s counters.
pub type SceneProbe = Rc<RefCell<SceneCounters>>;

/// Scene that draws nothing and records what it was asked to do.
/// Used by the headless backend.
pub struct TraceScene {
    name: &'static str,
    counters: SceneProbe,
}

impl TraceScene {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            counters: Rc::new(RefCell::new(SceneCounters::default())),
        }
    }

    pub fn probe(&self) -> SceneProbe {
        Rc::clone(&self.counters)
    }
}

impl SceneRenderer for TraceScene {
    fn name(&self) -> &'static str {
        self.name
    }

    fn update_pose(&mut self, rotation: [f32; 4], _position: [f32; 3]) {
        let mut c = self.counters.borrow_mut();
        c.pose_updates += 1;
        c.last_rotation = rotation;
    }

    fn draw(&mut self, eye: Eye) {
        let mut c = self.counters.borrow_mut();
        if c.draws == 0 {
            debug!(scene = self.name, eye = eye.as_str(), "first draw");
        }
        c.draws += 1;
    }

    fn on_connect(&mut self) {
        info!(scene = self.name, "remote connected");
        self.counters.borrow_mut().connects += 1;
    }

    fn on_close(&mut self) {
        info!(scene = self.name, "remote closed");
        self.counters.borrow_mut().closes += 1;
    }

    fn on_media_ready(&mut self) {
        self.counters.borrow_mut().media_ready += 1;
    }

    fn home_page(&mut self) {
        debug!(scene = self.name, "home page");
        self.counters.borrow_mut().home_pages += 1;
    }

    fn set_video_frame(&mut self, slot: &FrameSlot) {
        let mut c = self.counters.borrow_mut();
        c.video_frames += 1;
        c.last_frame_index = slot.frame_index;
    }
}
