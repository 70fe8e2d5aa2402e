//! Session lifecycle state machine.
//!
//! Reacts to `SessionStateChanged` events from the runtime and applies
//! the matching side effect:
//! - READY -> begin the session, running
//! - STOPPING -> end the session, not running
//! - EXITING -> leave the render loop, no restart
//! - LOSS_PENDING -> leave the render loop, restart
//!
//! `InstanceLossPending` also requests a restart and stops the drain
//! for the current tick.  The two exit flags in [`PollOutcome`] are the
//! only signal this machine sends back to the render loop.

use anyhow::{bail, Context};
use tracing::{debug, error, info, warn};

use super::event::{EventSource, SessionHandle, SessionState, XrEvent};

/// Runtime session operations.  Every failure is fatal.
pub trait SessionRuntime {
    fn create(&mut self) -> anyhow::Result<SessionHandle>;
    fn begin(&mut self, session: SessionHandle) -> anyhow::Result<()>;
    fn end(&mut self, session: SessionHandle) -> anyhow::Result<()>;
    /// Ask the runtime to move the session towards STOPPING.
    fn request_exit(&mut self, session: SessionHandle) -> anyhow::Result<()>;
    fn destroy(&mut self, session: SessionHandle) -> anyhow::Result<()>;
}

/// Flags handed back to the render loop after each event drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollOutcome {
    /// Leave the render loop.
    pub exit_loop: bool,
    /// Recreate the instance and session after leaving.
    pub request_restart: bool,
}

/// Owns the session handle and its lifecycle state.
pub struct SessionMachine {
    runtime: Box<dyn SessionRuntime>,
    handle: SessionHandle,
    state: SessionState,
    running: bool,
    /// State-change events dropped because they named another session.
    pub foreign_events: u64,
}

impl SessionMachine {
    pub fn new(runtime: Box<dyn SessionRuntime>) -> Self {
        Self {
            runtime,
            handle: SessionHandle::NULL,
            state: SessionState::Unknown,
            running: false,
            foreign_events: 0,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Create the runtime session.  Valid only once per machine until
    /// [`destroy`](Self::destroy) is called.
    pub fn create(&mut self) -> anyhow::Result<SessionHandle> {
        if !self.handle.is_null() {
            bail!("session {:?} already exists", self.handle);
        }
        let handle = self.runtime.create().context("session create failed")?;
        if handle.is_null() {
            bail!("runtime returned a null session handle");
        }
        info!("XR: session created ({:#x})", handle.0);
        self.handle = handle;
        self.state = SessionState::Unknown;
        self.running = false;
        Ok(handle)
    }

    /// Drain every pending event and apply its effects.
    ///
    /// Both flags are cleared on entry.  Returns early, leaving the rest
    /// of the queue untouched, on `InstanceLossPending`.
    pub fn poll_events(&mut self, source: &mut dyn EventSource) -> anyhow::Result<PollOutcome> {
        let mut outcome = PollOutcome::default();

        while let Some(event) = source.try_next().context("event poll failed")? {
            match event {
                XrEvent::InstanceLossPending { loss_time_ns } => {
                    warn!("XR: instance loss pending at {}", loss_time_ns);
                    outcome.exit_loop = true;
                    outcome.request_restart = true;
                    return Ok(outcome);
                }
                XrEvent::SessionStateChanged {
                    session,
                    state,
                    time_ns,
                } => {
                    self.handle_state_change(session, state, time_ns, &mut outcome)?;
                }
                XrEvent::ControllerStateChanged { controller, status } => {
                    info!(controller, status, "XR: controller state changed");
                }
                XrEvent::InteractionProfileChanged { session } => {
                    info!("XR: interaction profile changed ({:#x})", session.0);
                }
                other => {
                    debug!("XR: ignoring event {}", other.kind_str());
                }
            }
        }

        Ok(outcome)
    }

    fn handle_state_change(
        &mut self,
        session: SessionHandle,
        new_state: SessionState,
        time_ns: i64,
        outcome: &mut PollOutcome,
    ) -> anyhow::Result<()> {
        if session != self.handle || session.is_null() {
            error!(
                "XR: state change to {} for unknown session {:#x} (own {:#x})",
                new_state.as_str(),
                session.0,
                self.handle.0
            );
            self.foreign_events += 1;
            return Ok(());
        }

        let old = self.state;
        self.state = new_state;
        info!(
            "XR: session state {} -> {} (time {})",
            old.as_str(),
            new_state.as_str(),
            time_ns
        );

        match new_state {
            SessionState::Ready => {
                if self.running {
                    debug!("XR: session already running, begin skipped");
                } else {
                    self.runtime
                        .begin(self.handle)
                        .context("session begin failed")?;
                    self.running = true;
                }
            }
            SessionState::Stopping => {
                if self.running {
                    self.running = false;
                    self.runtime.end(self.handle).context("session end failed")?;
                } else {
                    debug!("XR: session not running, end skipped");
                }
            }
            SessionState::Exiting => {
                // User closed the session; do not come back.
                outcome.exit_loop = true;
                outcome.request_restart = false;
            }
            SessionState::LossPending => {
                outcome.exit_loop = true;
                outcome.request_restart = true;
            }
            _ => {}
        }
        Ok(())
    }

    /// Ask the runtime to wind the session down.  No-op without a session.
    pub fn request_exit(&mut self) -> anyhow::Result<()> {
        if self.handle.is_null() {
            return Ok(());
        }
        info!("XR: requesting session exit");
        self.runtime
            .request_exit(self.handle)
            .context("session exit request failed")
    }

    /// Destroy the session.  The runtime only accepts `end` from
    /// STOPPING, so a session still running here (after a loss) is
    /// destroyed without ending it.
    pub fn destroy(&mut self) -> anyhow::Result<()> {
        if self.handle.is_null() {
            return Ok(());
        }
        if self.running {
            debug!("XR: destroying running session without end");
            self.running = false;
        }
        self.runtime
            .destroy(self.handle)
            .context("session destroy failed")?;
        info!("XR: session destroyed ({:#x})", self.handle.0);
        self.handle = SessionHandle::NULL;
        self.state = SessionState::Unknown;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vr::event::EventQueue;
    use proptest::prelude::*;
    use std::{cell::RefCell, rc::Rc};

    /// Runtime double that records every call.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingRuntime {
        pub calls: Rc<RefCell<Vec<String>>>,
        pub fail_begin: bool,
        pub fail_end: bool,
    }

    impl SessionRuntime for RecordingRuntime {
        fn create(&mut self) -> anyhow::Result<SessionHandle> {
            self.calls.borrow_mut().push("create".into());
            Ok(SessionHandle(42))
        }
        fn begin(&mut self, _session: SessionHandle) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("begin".into());
            if self.fail_begin {
                bail!("XR_ERROR_RUNTIME_FAILURE");
            }
            Ok(())
        }
        fn end(&mut self, _session: SessionHandle) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("end".into());
            if self.fail_end {
                bail!("XR_ERROR_SESSION_NOT_STOPPING");
            }
            Ok(())
        }
        fn request_exit(&mut self, _session: SessionHandle) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("request_exit".into());
            Ok(())
        }
        fn destroy(&mut self, _session: SessionHandle) -> anyhow::Result<()> {
            self.calls.borrow_mut().push("destroy".into());
            Ok(())
        }
    }

    fn machine() -> (SessionMachine, RecordingRuntime) {
        let runtime = RecordingRuntime::default();
        let mut machine = SessionMachine::new(Box::new(runtime.clone()));
        machine.create().unwrap();
        (machine, runtime)
    }

    fn changed(state: SessionState) -> XrEvent {
        XrEvent::SessionStateChanged {
            session: SessionHandle(42),
            state,
            time_ns: 0,
        }
    }

    #[test]
    fn test_ready_begins_session() {
        let (mut m, rt) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Idle));
        q.push(changed(SessionState::Ready));

        let out = m.poll_events(&mut q).unwrap();
        assert_eq!(out, PollOutcome::default());
        assert!(m.is_running());
        assert_eq!(m.state(), SessionState::Ready);
        assert_eq!(*rt.calls.borrow(), vec!["create", "begin"]);
    }

    #[test]
    fn test_ready_twice_begins_once() {
        let (mut m, rt) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        q.push(changed(SessionState::Ready));
        m.poll_events(&mut q).unwrap();
        assert_eq!(
            rt.calls.borrow().iter().filter(|c| *c == "begin").count(),
            1
        );
    }

    #[test]
    fn test_ready_stopping_exiting_scenario() {
        let (mut m, rt) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        q.push(changed(SessionState::Stopping));
        q.push(changed(SessionState::Exiting));

        let out = m.poll_events(&mut q).unwrap();
        assert!(!m.is_running());
        assert!(out.exit_loop);
        assert!(!out.request_restart);
        assert_eq!(*rt.calls.borrow(), vec!["create", "begin", "end"]);
    }

    #[test]
    fn test_loss_pending_requests_restart() {
        let (mut m, _) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::LossPending));
        let out = m.poll_events(&mut q).unwrap();
        assert!(out.exit_loop);
        assert!(out.request_restart);
    }

    #[test]
    fn test_instance_loss_stops_drain() {
        let (mut m, _) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        q.push(XrEvent::InstanceLossPending { loss_time_ns: 99 });
        q.push(changed(SessionState::Stopping));

        let out = m.poll_events(&mut q).unwrap();
        assert!(out.exit_loop);
        assert!(out.request_restart);
        // STOPPING is still queued and was not applied.
        assert!(m.is_running());
        assert_eq!(q.len(), 1);

        let next = m.poll_events(&mut q).unwrap();
        assert_eq!(next, PollOutcome::default());
        assert!(!m.is_running());
    }

    #[test]
    fn test_flags_reset_each_poll() {
        let (mut m, _) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Exiting));
        assert!(m.poll_events(&mut q).unwrap().exit_loop);
        assert!(!m.poll_events(&mut q).unwrap().exit_loop);
    }

    #[test]
    fn test_foreign_session_is_ignored() {
        let (mut m, rt) = machine();
        let mut q = EventQueue::new();
        for state in [
            SessionState::Ready,
            SessionState::Exiting,
            SessionState::LossPending,
        ] {
            q.push(XrEvent::SessionStateChanged {
                session: SessionHandle(7),
                state,
                time_ns: 0,
            });
        }
        let out = m.poll_events(&mut q).unwrap();
        assert_eq!(out, PollOutcome::default());
        assert!(!m.is_running());
        assert_eq!(m.state(), SessionState::Unknown);
        assert_eq!(m.foreign_events, 3);
        assert_eq!(*rt.calls.borrow(), vec!["create"]);
    }

    #[test]
    fn test_events_before_create_are_ignored() {
        let runtime = RecordingRuntime::default();
        let mut m = SessionMachine::new(Box::new(runtime.clone()));
        let mut q = EventQueue::new();
        q.push(XrEvent::SessionStateChanged {
            session: SessionHandle::NULL,
            state: SessionState::Ready,
            time_ns: 0,
        });
        m.poll_events(&mut q).unwrap();
        assert!(!m.is_running());
        assert!(runtime.calls.borrow().is_empty());
    }

    #[test]
    fn test_begin_failure_is_fatal() {
        let runtime = RecordingRuntime {
            fail_begin: true,
            ..Default::default()
        };
        let mut m = SessionMachine::new(Box::new(runtime));
        m.create().unwrap();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        let err = m.poll_events(&mut q).unwrap_err();
        assert!(format!("{err:#}").contains("session begin failed"));
        assert!(!m.is_running());
    }

    #[test]
    fn test_create_twice_fails() {
        let (mut m, _) = machine();
        assert!(m.create().is_err());
    }

    #[test]
    fn test_destroy_running_session_skips_end() {
        let (mut m, rt) = machine();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        m.poll_events(&mut q).unwrap();

        m.destroy().unwrap();
        assert!(m.handle().is_null());
        assert!(!m.is_running());
        assert_eq!(*rt.calls.borrow(), vec!["create", "begin", "destroy"]);
        // Second destroy is a no-op.
        m.destroy().unwrap();
        assert_eq!(rt.calls.borrow().len(), 3);
    }

    #[test]
    fn test_destroy_after_loss_pending() {
        let runtime = RecordingRuntime {
            fail_end: true,
            ..Default::default()
        };
        let mut m = SessionMachine::new(Box::new(runtime.clone()));
        m.create().unwrap();
        let mut q = EventQueue::new();
        q.push(changed(SessionState::Ready));
        q.push(changed(SessionState::LossPending));
        let out = m.poll_events(&mut q).unwrap();
        assert!(out.request_restart);
        assert!(m.is_running());

        m.destroy().unwrap();
        assert!(m.handle().is_null());
        assert_eq!(*runtime.calls.borrow(), vec!["create", "begin", "destroy"]);
    }

    #[test]
    fn test_request_exit_without_session_is_noop() {
        let runtime = RecordingRuntime::default();
        let mut m = SessionMachine::new(Box::new(runtime.clone()));
        m.request_exit().unwrap();
        assert!(runtime.calls.borrow().is_empty());
    }

    fn state_strategy() -> impl Strategy<Value = SessionState> {
        prop_oneof![
            Just(SessionState::Idle),
            Just(SessionState::Ready),
            Just(SessionState::Synchronized),
            Just(SessionState::Focused),
            Just(SessionState::Stopping),
            Just(SessionState::Exiting),
            Just(SessionState::LossPending),
        ]
    }

    proptest! {
        #[test]
        fn test_running_tracks_last_ready_or_stopping(
            events in prop::collection::vec((state_strategy(), any::<bool>()), 0..40)
        ) {
            let (mut m, _) = machine();
            let mut q = EventQueue::new();
            let mut expected = false;
            for (state, own) in &events {
                let session = if *own { SessionHandle(42) } else { SessionHandle(9) };
                q.push(XrEvent::SessionStateChanged { session, state: *state, time_ns: 0 });
                if *own {
                    match state {
                        SessionState::Ready => expected = true,
                        SessionState::Stopping => expected = false,
                        _ => {}
                    }
                }
            }
            let out = m.poll_events(&mut q).unwrap();
            prop_assert_eq!(m.is_running(), expected);

            let last_exit = events
                .iter()
                .filter(|(s, own)| *own && matches!(s, SessionState::Exiting | SessionState::LossPending))
                .last();
            prop_assert_eq!(out.exit_loop, last_exit.is_some());
            prop_assert_eq!(
                out.request_restart,
                matches!(last_exit, Some((SessionState::LossPending, _)))
            );
        }
    }
}
