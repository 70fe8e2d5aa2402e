//! Runtime event source.
//!
//! Drains the runtime's event queue one event at a time.  `try_next`
//! never blocks: an empty queue is `Ok(None)`, any other failure is
//! returned as an error and treated as fatal by the render loop.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};
use tracing::warn;

// ── Handles and states ─────────────────────────────────────

/// Opaque runtime session handle.  Zero is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionHandle(pub u64);

impl SessionHandle {
    pub const NULL: SessionHandle = SessionHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Session lifecycle states as reported by the runtime.
///
/// `Synchronized` is the "syncing" phase; `Visible` and `Focused` are
/// both "running" from the render loop's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss-pending",
            Self::Exiting => "exiting",
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// A decoded runtime event.  Read once, never retained.
#[derive(Debug, Clone, PartialEq)]
pub enum XrEvent {
    /// The runtime instance is about to be lost.
    InstanceLossPending { loss_time_ns: i64 },
    /// A session changed lifecycle state.
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time_ns: i64,
    },
    /// Input bindings were rebound to a different device profile.
    InteractionProfileChanged { session: SessionHandle },
    /// A reference space origin is about to move.
    ReferenceSpaceChangePending { session: SessionHandle },
    /// Vendor controller connection status event.
    ControllerStateChanged { controller: u32, status: u32 },
    /// The runtime's event queue overflowed.
    EventsLost { count: u32 },
    /// Any event this client does not handle.
    Unknown { kind: &'static str },
}

impl XrEvent {
    /// Short name for logging.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::InstanceLossPending { .. } => "instance-loss-pending",
            Self::SessionStateChanged { .. } => "session-state-changed",
            Self::InteractionProfileChanged { .. } => "interaction-profile-changed",
            Self::ReferenceSpaceChangePending { .. } => "reference-space-change-pending",
            Self::ControllerStateChanged { .. } => "controller-state-changed",
            Self::EventsLost { .. } => "events-lost",
            Self::Unknown { kind } => kind,
        }
    }
}

/// Warn when the runtime reports dropped events.  Sources call this on
/// every event they hand out.
pub fn note_lost_events(event: &XrEvent) {
    if let XrEvent::EventsLost { count } = event {
        warn!("XR: {} events lost", count);
    }
}

// ── Source trait ───────────────────────────────────────────

/// Non-blocking access to the runtime event queue.
pub trait EventSource {
    /// Next pending event, or `Ok(None)` when the queue is empty.
    fn try_next(&mut self) -> anyhow::Result<Option<XrEvent>>;
}

/// In-process event queue.
///
/// Cloning yields another handle to the same queue, so a simulated
/// runtime can publish events that the render loop drains.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Rc<RefCell<VecDeque<XrEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: XrEvent) {
        self.inner.borrow_mut().push_back(event);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl EventSource for EventQueue {
    fn try_next(&mut self) -> anyhow::Result<Option<XrEvent>> {
        let event = self.inner.borrow_mut().pop_front();
        if let Some(ev) = &event {
            note_lost_events(ev);
        }
        Ok(event)
    }
}
