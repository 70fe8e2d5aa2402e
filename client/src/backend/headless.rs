//! Headless backend: a simulated runtime for CI and development.
//!
//! The simulated runtime walks the session lifecycle the way a real
//! runtime would, a scripted controller exercises every input path and a
//! producer thread plays the remote renderer: it connects, starts the
//! media stream, and renders one frame per submitted head pose.

use anyhow::bail;
use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{BackendSession, HeadPoseSource, LoopConfig};
use crate::render::TraceScene;
use crate::state::{ClientConfig, ClientParts, ClientState};
use crate::vr::event::{EventQueue, EventSource, SessionHandle, SessionState, XrEvent};
use crate::vr::frame_pacer::{FrameSlot, OfflinePipeline, RemotePipeline};
use crate::vr::input::{ActionSource, ActionState, ActionValue, Control, Hand};
use crate::vr::pose::Pose;
use crate::vr::remote::{CloseReason, LoggedOrigin, RemoteState, StateObserver};
use crate::vr::session::SessionRuntime;

/// Headless simulation configuration.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Remote frame rate.  0 disables the remote side entirely.
    pub frame_hz: u32,
    /// Delay before the simulated server connects.
    pub connect_delay: Duration,
    /// Delay between connect and media ready.
    pub media_delay: Duration,
    /// Drop the remote connection this long after media ready.
    pub disconnect_after: Option<Duration>,
    /// Report session loss this long after each session is created.
    pub loss_after: Option<Duration>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frame_hz: 72,
            connect_delay: Duration::from_millis(500),
            media_delay: Duration::from_millis(250),
            disconnect_after: None,
            loss_after: None,
        }
    }
}

// ── Runtime ────────────────────────────────────────────────

/// Session runtime that answers calls with the events a conformant
/// runtime would queue.
pub struct SimRuntime {
    queue: EventQueue,
    current: Rc<Cell<SessionHandle>>,
    next_handle: u64,
    /// Set once STOPPING has been queued; `end` is refused before that.
    stopping: bool,
    origin: Instant,
}

impl SimRuntime {
    pub fn new(queue: EventQueue) -> Self {
        Self {
            queue,
            current: Rc::new(Cell::new(SessionHandle::NULL)),
            next_handle: 0x1000,
            stopping: false,
            origin: Instant::now(),
        }
    }

    fn push(&self, session: SessionHandle, states: &[SessionState]) {
        let time_ns = self.origin.elapsed().as_nanos() as i64;
        for &state in states {
            self.queue.push(XrEvent::SessionStateChanged {
                session,
                state,
                time_ns,
            });
        }
    }

    fn check(&self, session: SessionHandle) -> anyhow::Result<()> {
        if session.is_null() || session != self.current.get() {
            bail!("XR_ERROR_HANDLE_INVALID ({:#x})", session.0);
        }
        Ok(())
    }
}

impl SessionRuntime for SimRuntime {
    fn create(&mut self) -> anyhow::Result<SessionHandle> {
        if !self.current.get().is_null() {
            bail!("XR_ERROR_LIMIT_REACHED: session already exists");
        }
        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;
        self.current.set(handle);
        self.stopping = false;
        self.push(handle, &[SessionState::Idle, SessionState::Ready]);
        Ok(handle)
    }

    fn begin(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.check(session)?;
        self.push(
            session,
            &[
                SessionState::Synchronized,
                SessionState::Visible,
                SessionState::Focused,
            ],
        );
        Ok(())
    }

    fn end(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.check(session)?;
        if !self.stopping {
            bail!("XR_ERROR_SESSION_NOT_STOPPING ({:#x})", session.0);
        }
        self.stopping = false;
        self.push(session, &[SessionState::Idle, SessionState::Exiting]);
        Ok(())
    }

    fn request_exit(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.check(session)?;
        self.stopping = true;
        self.push(session, &[SessionState::Stopping]);
        Ok(())
    }

    fn destroy(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.check(session)?;
        self.current.set(SessionHandle::NULL);
        Ok(())
    }
}

/// Event source over the simulated queue that can inject a session loss.
pub struct SimEvents {
    queue: EventQueue,
    current: Rc<Cell<SessionHandle>>,
    loss_at: Option<Instant>,
}

impl SimEvents {
    pub fn new(runtime: &SimRuntime, loss_after: Option<Duration>) -> Self {
        Self {
            queue: runtime.queue.clone(),
            current: Rc::clone(&runtime.current),
            loss_at: loss_after.map(|d| Instant::now() + d),
        }
    }
}

impl EventSource for SimEvents {
    fn try_next(&mut self) -> anyhow::Result<Option<XrEvent>> {
        let session = self.current.get();
        if !session.is_null() && self.loss_at.is_some_and(|at| Instant::now() >= at) {
            self.loss_at = None;
            warn!("Headless: simulating session loss");
            self.queue.push(XrEvent::SessionStateChanged {
                session,
                state: SessionState::LossPending,
                time_ns: 0,
            });
        }
        self.queue.try_next()
    }
}

// ── Controller ─────────────────────────────────────────────

/// Ticks between A-button presses on the simulated right controller.
const PRESS_PERIOD: u64 = 144;
/// Ticks the A button stays down.
const PRESS_HOLD: u64 = 36;

/// Scripted controllers: both hands tracked, analog controls sweep, and
/// the right A button is pressed periodically.
#[derive(Debug, Default)]
pub struct SimController {
    syncs: u64,
    pub haptics: u32,
}

impl SimController {
    fn phase(&self) -> f32 {
        (self.syncs as f32 / 72.0) * std::f32::consts::TAU * 0.5
    }
}

impl ActionSource for SimController {
    fn sync(&mut self) -> anyhow::Result<()> {
        self.syncs += 1;
        Ok(())
    }

    fn state(&mut self, hand: Hand, control: Control) -> anyhow::Result<ActionState> {
        let active = |current| ActionState {
            is_active: true,
            changed_since_last_sync: false,
            current,
        };
        let state = match control {
            Control::Pose => active(ActionValue::Bool(true)),
            Control::Trigger => active(ActionValue::Float(0.5 + 0.5 * self.phase().sin())),
            Control::Battery => active(ActionValue::Float(0.8)),
            Control::Joystick => {
                let p = self.phase();
                active(ActionValue::Vector2([0.5 * p.cos(), 0.5 * p.sin()]))
            }
            Control::A if hand == Hand::Right => {
                let t = self.syncs % PRESS_PERIOD;
                ActionState {
                    is_active: true,
                    changed_since_last_sync: t == 1 || t == 1 + PRESS_HOLD,
                    current: ActionValue::Bool((1..=PRESS_HOLD).contains(&t)),
                }
            }
            _ => ActionState::inactive(),
        };
        Ok(state)
    }

    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> anyhow::Result<()> {
        debug!("Headless: haptic {} amplitude {:.2}", hand.as_str(), amplitude);
        self.haptics += 1;
        Ok(())
    }
}

/// Head sweeping +-30 degrees of yaw at standing height.
pub struct SimHead;

impl HeadPoseSource for SimHead {
    fn head_pose(&mut self, elapsed: Duration) -> Pose {
        let yaw = 30.0 * (elapsed.as_secs_f32() * std::f32::consts::TAU * 0.25).sin();
        Pose::from_yaw_degrees(yaw, [0.0, 1.6, 0.0])
    }
}

// ── Remote pipeline ────────────────────────────────────────

struct Shared {
    connected: AtomicBool,
    media_ready: AtomicBool,
    has_new_frame: AtomicBool,
    stop: AtomicBool,
    /// Written by the producer with `has_new_frame` set under the lock.
    slot: Mutex<FrameSlot>,
    /// Latest submitted pose not yet rendered.
    request: Mutex<Option<(u64, Pose)>>,
    callbacks: Mutex<VecDeque<RemoteState>>,
    produced: AtomicU64,
}

impl Shared {
    fn notify(&self, state: RemoteState) {
        if let Ok(mut q) = self.callbacks.lock() {
            q.push_back(state);
        }
    }

    /// Sleep in short steps.  Returns false if asked to stop.
    fn nap(&self, dur: Duration) -> bool {
        let until = Instant::now() + dur;
        while Instant::now() < until {
            if self.stop.load(Ordering::Acquire) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5).min(dur));
        }
        !self.stop.load(Ordering::Acquire)
    }
}

/// Remote pipeline backed by a producer thread.
pub struct SimPipeline {
    shared: Arc<Shared>,
    next_index: u64,
    worker: Option<JoinHandle<()>>,
    pub releases: u64,
}

impl SimPipeline {
    pub fn spawn(config: &HeadlessConfig) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            media_ready: AtomicBool::new(false),
            has_new_frame: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            slot: Mutex::new(FrameSlot {
                frame_index: 0,
                pose: Pose::default(),
            }),
            request: Mutex::new(None),
            callbacks: Mutex::new(VecDeque::new()),
            produced: AtomicU64::new(0),
        });
        let producer = Arc::clone(&shared);
        let config = config.clone();
        let worker = std::thread::Builder::new()
            .name("sim-remote".into())
            .spawn(move || produce(&producer, &config))?;
        Ok(Self {
            shared,
            next_index: 0,
            worker: Some(worker),
            releases: 0,
        })
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Relaxed)
    }
}

fn produce(shared: &Shared, config: &HeadlessConfig) {
    if !shared.nap(config.connect_delay) {
        return;
    }
    shared.connected.store(true, Ordering::Release);
    shared.notify(RemoteState::Connected);

    if !shared.nap(config.media_delay) {
        return;
    }
    shared.media_ready.store(true, Ordering::Release);
    shared.notify(RemoteState::MediaReady);

    let period = Duration::from_secs_f64(1.0 / config.frame_hz.max(1) as f64);
    let streaming = Instant::now();
    while !shared.stop.load(Ordering::Acquire) {
        if config.disconnect_after.is_some_and(|d| streaming.elapsed() >= d) {
            info!("Headless: simulated server closing the stream");
            shared.connected.store(false, Ordering::Release);
            shared.media_ready.store(false, Ordering::Release);
            shared.notify(RemoteState::Closed(CloseReason::TransportClosed));
            return;
        }

        let request = shared.request.lock().ok().and_then(|mut r| r.take());
        if let Some((frame_index, pose)) = request {
            if let Ok(mut slot) = shared.slot.lock() {
                // Overwrites an unclaimed frame: latest wins.
                *slot = FrameSlot { frame_index, pose };
                shared.has_new_frame.store(true, Ordering::Release);
            }
            shared.produced.fetch_add(1, Ordering::Relaxed);
        }
        if !shared.nap(period) {
            return;
        }
    }
}

impl RemotePipeline for SimPipeline {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn media_ready(&self) -> bool {
        self.shared.media_ready.load(Ordering::Acquire)
    }

    fn has_new_frame(&self) -> bool {
        self.shared.has_new_frame.load(Ordering::Acquire)
    }

    fn render(&mut self) -> Option<FrameSlot> {
        let slot = self.shared.slot.lock().ok()?;
        if !self.shared.has_new_frame.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(*slot)
    }

    fn release_render_texture(&mut self) {
        self.releases += 1;
    }

    fn submit_pose(&mut self, pose: &Pose) -> u64 {
        self.next_index += 1;
        if let Ok(mut r) = self.shared.request.lock() {
            *r = Some((self.next_index, *pose));
        }
        self.next_index
    }

    fn dispatch(&mut self, observer: &mut dyn StateObserver) {
        let pending: Vec<RemoteState> = match self.shared.callbacks.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(_) => return,
        };
        for state in pending {
            observer.on_state_changed(state);
        }
    }
}

impl Drop for SimPipeline {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Backend ────────────────────────────────────────────────

/// Assemble one simulated session.
pub fn build(config: &HeadlessConfig, client_config: &ClientConfig) -> anyhow::Result<BackendSession> {
    let queue = EventQueue::new();
    let runtime = SimRuntime::new(queue);
    let events = SimEvents::new(&runtime, config.loss_after);
    let pipeline: Box<dyn RemotePipeline> = if config.frame_hz == 0 {
        Box::new(OfflinePipeline)
    } else {
        Box::new(SimPipeline::spawn(config)?)
    };

    let parts = ClientParts {
        runtime: Box::new(runtime),
        events: Box::new(events),
        actions: Box::new(SimController::default()),
        pipeline,
        local_scene: Box::new(TraceScene::new("local")),
        remote_scene: Box::new(TraceScene::new("remote")),
        tracking_origin: Box::new(LoggedOrigin::default()),
    };
    Ok(BackendSession {
        client: ClientState::new(parts, client_config.clone()),
        head: Box::new(SimHead),
    })
}

/// Run the client against the simulated runtime.
pub fn run(
    config: HeadlessConfig,
    client_config: ClientConfig,
    loop_config: LoopConfig,
) -> anyhow::Result<()> {
    info!(
        "Headless backend: tick {}ms, remote {}Hz, disconnect after {:?}",
        loop_config.tick_interval.as_millis(),
        config.frame_hz,
        config.disconnect_after
    );
    super::run_client(&loop_config, || build(&config, &client_config))?;
    info!("Headless backend shutting down");
    Ok(())
}
