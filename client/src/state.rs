//! Client state: the context object that owns every component.
//!
//! A single `ClientState` is built by the backend and driven one tick at
//! a time.  Nothing lives in globals; collaborators are handed in through
//! [`ClientParts`].

use std::time::Duration;
use tracing::{debug, info};

use crate::render::{SceneRenderer, Scenes};
use crate::vr::event::{EventSource, SessionState};
use crate::vr::frame_pacer::{
    build_pacer, Clock, FramePacer, FrameResult, MonotonicClock, PacerConfig, RemotePipeline,
};
use crate::vr::input::{ActionSource, InputConfig, InputPoller};
use crate::vr::latency::{LatencyCollector, LatencyConfig, LatencySink};
use crate::vr::pose::{angular_delta_degrees, Pose};
use crate::vr::remote::{LinkObserver, RemoteLink, TrackingOrigin};
use crate::vr::session::{PollOutcome, SessionMachine, SessionRuntime};

/// Tunables for the per-tick components.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub pacer: PacerConfig,
    pub latency: LatencyConfig,
    pub input: InputConfig,
}

/// Collaborators a backend supplies.
pub struct ClientParts {
    pub runtime: Box<dyn SessionRuntime>,
    pub events: Box<dyn EventSource>,
    pub actions: Box<dyn ActionSource>,
    pub pipeline: Box<dyn RemotePipeline>,
    pub local_scene: Box<dyn SceneRenderer>,
    pub remote_scene: Box<dyn SceneRenderer>,
    pub tracking_origin: Box<dyn TrackingOrigin>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickOutcome {
    pub poll: PollOutcome,
    /// `None` when the session was not running and nothing was drawn.
    pub frame: Option<FrameResult>,
    /// One-shot back navigation from the controllers.
    pub navigate_back: bool,
}

/// Running counters for status reporting.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub ticks: u64,
    pub remote_frames: u64,
    pub local_frames: u64,
    pub timed_out: u64,
    pub pending: u64,
}

pub struct ClientState {
    pub config: ClientConfig,
    pub session: SessionMachine,
    events: Box<dyn EventSource>,
    actions: Box<dyn ActionSource>,
    pub input: InputPoller,
    pipeline: Box<dyn RemotePipeline>,
    pacer: Box<dyn FramePacer>,
    pub link: RemoteLink,
    pub scenes: Scenes,
    pub latency: LatencyCollector,
    clock: MonotonicClock,
    pub stats: ClientStats,
}

impl ClientState {
    pub fn new(parts: ClientParts, config: ClientConfig) -> Self {
        let pacer = build_pacer(&config.pacer);
        info!(
            "client: pacer={} deadline={}ms",
            pacer.mode().as_str(),
            config.pacer.deadline.as_millis()
        );
        Self {
            session: SessionMachine::new(parts.runtime),
            events: parts.events,
            actions: parts.actions,
            input: InputPoller::new(config.input.clone()),
            pipeline: parts.pipeline,
            pacer,
            link: RemoteLink::new(parts.tracking_origin),
            scenes: Scenes::new(parts.local_scene, parts.remote_scene),
            latency: LatencyCollector::new(config.latency.clone()),
            clock: MonotonicClock::new(),
            stats: ClientStats::default(),
            config,
        }
    }

    /// Create the session.  Lifecycle events then arrive through ticks.
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.session.create()?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Pose of the last displayed remote frame.
    pub fn render_pose(&self) -> Option<Pose> {
        self.link.render_pose()
    }

    /// Run one render-loop iteration with the current head pose.
    pub fn tick(&mut self, hmd: &Pose) -> anyhow::Result<TickOutcome> {
        let poll = self.session.poll_events(self.events.as_mut())?;
        let mut outcome = TickOutcome {
            poll,
            ..Default::default()
        };
        if poll.exit_loop || !self.session.is_running() {
            return Ok(outcome);
        }
        self.stats.ticks += 1;

        let input = self.input.poll(self.actions.as_mut())?;
        if input.request_exit {
            self.session.request_exit()?;
        }
        outcome.navigate_back = input.navigate_back;

        self.pipeline
            .dispatch(&mut LinkObserver::new(&mut self.link, &mut self.scenes));
        let connected = self.link.is_connected();

        self.scenes.update_pose(connected, hmd);
        if connected {
            let frame_index = self.pipeline.submit_pose(hmd);
            self.latency.record_submit(frame_index, self.clock.now());
        }

        let result = if connected {
            self.pacer
                .acquire(self.pipeline.as_mut(), self.config.pacer.deadline)
        } else {
            FrameResult::Local
        };
        if let FrameResult::Remote(slot) = result {
            self.link.set_frame(slot);
            self.scenes.remote.set_video_frame(&slot);
        }

        self.scenes
            .draw_eyes(connected && result != FrameResult::Local);

        match result {
            FrameResult::Remote(slot) => {
                self.latency
                    .record_rendered(slot.frame_index, self.clock.now());
                let delta = angular_delta_degrees(&slot.pose, hmd);
                self.latency.submit(slot.frame_index, delta);
                self.stats.remote_frames += 1;
            }
            FrameResult::Local => self.stats.local_frames += 1,
            FrameResult::TimedOut => self.stats.timed_out += 1,
            FrameResult::Pending => self.stats.pending += 1,
        }
        self.pacer.finish_frame(self.pipeline.as_mut());

        outcome.frame = Some(result);
        Ok(outcome)
    }

    /// Ask the runtime to begin the stop sequence.
    pub fn request_exit(&mut self) -> anyhow::Result<()> {
        self.session.request_exit()
    }

    /// Destroy the session.  Safe to call more than once.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        debug!("client: shutdown");
        self.session.destroy()
    }

    /// One-line status for periodic logs.
    pub fn status_line(&self, elapsed: Duration) -> String {
        format!(
            "{}s state={} connected={} ticks={} remote={} local={} timed-out={} latency={}",
            elapsed.as_secs(),
            self.session.state().as_str(),
            self.link.is_connected(),
            self.stats.ticks,
            self.stats.remote_frames,
            self.stats.local_frames,
            self.stats.timed_out,
            self.latency.stats_sexp(),
        )
    }
}
