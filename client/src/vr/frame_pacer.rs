//! Frame pacing between the render loop and the remote video pipeline.
//!
//! Each tick the pacer either hands back a freshly decoded remote frame
//! or tells the caller to fall back.  The wait for a remote frame is a
//! cooperative spin bounded by wall-clock time: the check order in every
//! iteration is disconnect, deadline, frame.  A frame that shows up after
//! the deadline has passed is left for the next tick.
//!
//! The pipeline holds at most one pending frame.  If it produces two
//! before the render loop claims one, the older one is overwritten.

use std::time::{Duration, Instant};
use tracing::{trace, warn};

use super::pose::Pose;
use super::remote::StateObserver;

// ── Frames ─────────────────────────────────────────────────

/// A decoded remote frame, claimed at most once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSlot {
    /// Pipeline frame counter.  Zero means "no frame yet".
    pub frame_index: u64,
    /// Head pose the remote renderer used for this frame.
    pub pose: Pose,
}

/// Outcome of one acquire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameResult {
    /// A new remote frame to display.
    Remote(FrameSlot),
    /// Not connected: draw the local scene.
    Local,
    /// Connected but nothing arrived in time: redisplay the last frame.
    TimedOut,
    /// Connected, stream not started yet: nothing to wait for.
    Pending,
}

impl FrameResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote(_) => "remote",
            Self::Local => "local",
            Self::TimedOut => "timed-out",
            Self::Pending => "pending",
        }
    }
}

/// Remote rendering pipeline, written by its own decode thread.
///
/// `render` must be an exclusive claim: once it returns a slot, the
/// pending flag is cleared and no later call returns the same frame.
pub trait RemotePipeline {
    fn is_connected(&self) -> bool;
    fn media_ready(&self) -> bool;
    fn has_new_frame(&self) -> bool;
    /// Claim the pending frame, if any.
    fn render(&mut self) -> Option<FrameSlot>;
    /// Hand the render texture back after the frame was displayed.
    fn release_render_texture(&mut self);
    /// Send the current head pose upstream; returns the frame index the
    /// remote renderer will tag its frame with.
    fn submit_pose(&mut self, pose: &Pose) -> u64;
    /// Deliver queued connection callbacks to `observer`.
    fn dispatch(&mut self, observer: &mut dyn StateObserver);
}

// ── Clock ──────────────────────────────────────────────────

/// Monotonic time source for the bounded wait.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    /// Give up the CPU briefly between polls.
    fn relax(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

// ── Config ─────────────────────────────────────────────────

/// Which pacing strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerMode {
    /// Poll the new-frame flag, then render into the buffer.
    Direct,
    /// Render into a queued texture, released at frame end.
    Queued,
}

impl PacerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Queued => "queued",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "queued" => Some(Self::Queued),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub mode: PacerMode,
    /// Longest wait for a remote frame per tick.
    pub deadline: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            mode: PacerMode::Direct,
            deadline: Duration::from_millis(100),
        }
    }
}

// ── Strategies ─────────────────────────────────────────────

pub trait FramePacer {
    fn mode(&self) -> PacerMode;
    fn acquire(&mut self, pipeline: &mut dyn RemotePipeline, deadline: Duration) -> FrameResult;
    /// Called once per tick after both eyes were drawn.
    fn finish_frame(&mut self, pipeline: &mut dyn RemotePipeline);
}

/// Build the strategy selected by `config`.
pub fn build_pacer(config: &PacerConfig) -> Box<dyn FramePacer> {
    match config.mode {
        PacerMode::Direct => Box::new(DirectPacer::new(MonotonicClock::new())),
        PacerMode::Queued => Box::new(QueuedPacer::new(MonotonicClock::new())),
    }
}

fn log_timeout(waited: Duration) {
    warn!(
        "wait for new frame timed out after {}ms, skipping",
        waited.as_millis()
    );
}

/// Polls `has_new_frame` and claims through `render`.  Waits only while
/// the media stream is ready.
pub struct DirectPacer<C: Clock> {
    clock: C,
}

impl<C: Clock> DirectPacer<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> FramePacer for DirectPacer<C> {
    fn mode(&self) -> PacerMode {
        PacerMode::Direct
    }

    fn acquire(&mut self, pipeline: &mut dyn RemotePipeline, deadline: Duration) -> FrameResult {
        if !pipeline.is_connected() {
            return FrameResult::Local;
        }
        if !pipeline.media_ready() {
            return FrameResult::Pending;
        }

        let start = self.clock.now();
        loop {
            if !pipeline.is_connected() {
                return FrameResult::Local;
            }
            let waited = self.clock.now().saturating_sub(start);
            if waited > deadline {
                log_timeout(waited);
                return FrameResult::TimedOut;
            }
            if pipeline.has_new_frame() {
                if let Some(slot) = pipeline.render() {
                    trace!(frame = slot.frame_index, "remote frame claimed");
                    return FrameResult::Remote(slot);
                }
            }
            self.clock.relax();
        }
    }

    fn finish_frame(&mut self, _pipeline: &mut dyn RemotePipeline) {}
}

/// Attempts `render` every iteration; holds the render texture until
/// [`finish_frame`](FramePacer::finish_frame).
pub struct QueuedPacer<C: Clock> {
    clock: C,
    holding_texture: bool,
}

impl<C: Clock> QueuedPacer<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            holding_texture: false,
        }
    }
}

impl<C: Clock> FramePacer for QueuedPacer<C> {
    fn mode(&self) -> PacerMode {
        PacerMode::Queued
    }

    fn acquire(&mut self, pipeline: &mut dyn RemotePipeline, deadline: Duration) -> FrameResult {
        if !pipeline.is_connected() {
            return FrameResult::Local;
        }

        let start = self.clock.now();
        loop {
            if !pipeline.is_connected() {
                return FrameResult::Local;
            }
            let waited = self.clock.now().saturating_sub(start);
            if waited > deadline {
                log_timeout(waited);
                return FrameResult::TimedOut;
            }
            if let Some(slot) = pipeline.render() {
                trace!(frame = slot.frame_index, "remote frame queued");
                self.holding_texture = true;
                return FrameResult::Remote(slot);
            }
            if !pipeline.media_ready() {
                return FrameResult::Pending;
            }
            self.clock.relax();
        }
    }

    fn finish_frame(&mut self, pipeline: &mut dyn RemotePipeline) {
        if self.holding_texture {
            pipeline.release_render_texture();
            self.holding_texture = false;
        }
    }
}

/// Pipeline that never connects.  Used when no streaming service is
/// configured; every tick renders the local scene.
#[derive(Debug, Default)]
pub struct OfflinePipeline;

impl RemotePipeline for OfflinePipeline {
    fn is_connected(&self) -> bool {
        false
    }
    fn media_ready(&self) -> bool {
        false
    }
    fn has_new_frame(&self) -> bool {
        false
    }
    fn render(&mut self) -> Option<FrameSlot> {
        None
    }
    fn release_render_texture(&mut self) {}
    fn submit_pose(&mut self, _pose: &Pose) -> u64 {
        0
    }
    fn dispatch(&mut self, _observer: &mut dyn StateObserver) {}
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    /// Clock that only moves when the pacer relaxes, 1ms per relax.
    #[derive(Clone, Default)]
    pub(crate) struct StepClock {
        pub now_ms: Rc<Cell<u64>>,
    }

    impl Clock for StepClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.now_ms.get())
        }
        fn relax(&self) {
            self.now_ms.set(self.now_ms.get() + 1);
        }
    }

    /// Pipeline double driven by the shared step clock.
    pub(crate) struct FakePipeline {
        pub clock: StepClock,
        pub connected: bool,
        pub media_ready: bool,
        /// Frame becomes available at this clock reading.
        pub frame_at_ms: Option<u64>,
        /// Connection drops at this clock reading.
        pub disconnect_at_ms: Option<u64>,
        pub pending: bool,
        pub next_index: u64,
        pub renders: u32,
        pub releases: u32,
    }

    impl FakePipeline {
        pub fn new(clock: StepClock) -> Self {
            Self {
                clock,
                connected: true,
                media_ready: true,
                frame_at_ms: None,
                disconnect_at_ms: None,
                pending: false,
                next_index: 1,
                renders: 0,
                releases: 0,
            }
        }

        fn refresh(&mut self) {
            let now = self.clock.now_ms.get();
            if let Some(at) = self.frame_at_ms {
                if now >= at {
                    self.pending = true;
                    self.frame_at_ms = None;
                }
            }
        }
    }

    impl RemotePipeline for FakePipeline {
        fn is_connected(&self) -> bool {
            match self.disconnect_at_ms {
                Some(at) if self.clock.now_ms.get() >= at => false,
                _ => self.connected,
            }
        }
        fn media_ready(&self) -> bool {
            self.media_ready
        }
        fn has_new_frame(&self) -> bool {
            let now = self.clock.now_ms.get();
            self.pending || self.frame_at_ms.is_some_and(|at| now >= at)
        }
        fn render(&mut self) -> Option<FrameSlot> {
            self.refresh();
            if !self.pending {
                return None;
            }
            self.pending = false;
            self.renders += 1;
            let slot = FrameSlot {
                frame_index: self.next_index,
                pose: Pose::default(),
            };
            self.next_index += 1;
            Some(slot)
        }
        fn release_render_texture(&mut self) {
            self.releases += 1;
        }
        fn submit_pose(&mut self, _pose: &Pose) -> u64 {
            self.next_index
        }
        fn dispatch(&mut self, _observer: &mut dyn StateObserver) {}
    }

    fn deadline() -> Duration {
        Duration::from_millis(100)
    }

    #[test]
    fn test_disconnected_is_local_immediately() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.connected = false;
        let mut pacer = DirectPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Local);
        assert_eq!(clock.now_ms.get(), 0);
    }

    #[test]
    fn test_media_not_ready_is_pending() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.media_ready = false;
        pipe.frame_at_ms = Some(5);
        let mut pacer = DirectPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Pending);
        assert_eq!(clock.now_ms.get(), 0);
    }

    #[test]
    fn test_frame_within_deadline_is_remote_once() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(40);
        let mut pacer = DirectPacer::new(clock.clone());

        match pacer.acquire(&mut pipe, deadline()) {
            FrameResult::Remote(slot) => assert_eq!(slot.frame_index, 1),
            other => panic!("expected remote, got {:?}", other),
        }
        assert_eq!(clock.now_ms.get(), 40);
        assert_eq!(pipe.renders, 1);

        // No new frame: a second acquire never yields the same frame.
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::TimedOut);
        assert_eq!(pipe.renders, 1);
    }

    #[test]
    fn test_frame_after_deadline_times_out() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(101);
        let mut pacer = DirectPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::TimedOut);
        assert_eq!(pipe.renders, 0);

        // Still pending for the next tick.
        assert!(matches!(
            pacer.acquire(&mut pipe, deadline()),
            FrameResult::Remote(_)
        ));
    }

    #[test]
    fn test_frame_exactly_at_deadline_is_accepted() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(100);
        let mut pacer = DirectPacer::new(clock);
        assert!(matches!(
            pacer.acquire(&mut pipe, deadline()),
            FrameResult::Remote(_)
        ));
    }

    #[test]
    fn test_disconnect_mid_wait_is_local() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(80);
        pipe.disconnect_at_ms = Some(30);
        let mut pacer = DirectPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Local);
        assert_eq!(clock.now_ms.get(), 30);
    }

    #[test]
    fn test_queued_releases_texture_after_remote() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(3);
        let mut pacer = QueuedPacer::new(clock.clone());

        assert!(matches!(
            pacer.acquire(&mut pipe, deadline()),
            FrameResult::Remote(_)
        ));
        pacer.finish_frame(&mut pipe);
        assert_eq!(pipe.releases, 1);

        // Nothing held after a timeout.
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::TimedOut);
        pacer.finish_frame(&mut pipe);
        assert_eq!(pipe.releases, 1);
    }

    #[test]
    fn test_queued_without_media_is_pending() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.media_ready = false;
        let mut pacer = QueuedPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Pending);

        // A frame already queued is still taken.
        pipe.pending = true;
        assert!(matches!(
            pacer.acquire(&mut pipe, deadline()),
            FrameResult::Remote(_)
        ));
    }

    #[test]
    fn test_queued_deadline_and_disconnect() {
        let clock = StepClock::default();
        let mut pipe = FakePipeline::new(clock.clone());
        pipe.frame_at_ms = Some(150);
        let mut pacer = QueuedPacer::new(clock.clone());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::TimedOut);

        pipe.disconnect_at_ms = Some(clock.now_ms.get() + 10);
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Local);
    }

    #[test]
    fn test_build_pacer_selects_mode() {
        let mut config = PacerConfig::default();
        assert_eq!(build_pacer(&config).mode(), PacerMode::Direct);
        config.mode = PacerMode::Queued;
        assert_eq!(build_pacer(&config).mode(), PacerMode::Queued);
        assert_eq!(PacerMode::parse("queued"), Some(PacerMode::Queued));
        assert_eq!(PacerMode::parse("fast"), None);
    }

    #[test]
    fn test_offline_pipeline_is_local() {
        let mut pipe = OfflinePipeline;
        let mut pacer = DirectPacer::new(MonotonicClock::new());
        assert_eq!(pacer.acquire(&mut pipe, deadline()), FrameResult::Local);
    }

    #[test]
    fn test_monotonic_deadline_with_real_clock() {
        // Connected and media ready, but no frame ever arrives.
        let mut pipe = FakePipeline::new(StepClock::default());
        let mut pacer = DirectPacer::new(MonotonicClock::new());
        let wait = Duration::from_millis(20);
        let started = Instant::now();
        assert_eq!(pacer.acquire(&mut pipe, wait), FrameResult::TimedOut);
        assert!(started.elapsed() >= wait);
    }
}
