//! Backend abstraction: headless simulation and OpenXR.
//!
//! Both backends build a [`ClientState`] and hand it to [`run_client`],
//! which owns the render loop, shutdown signals and the restart policy.

pub mod headless;
pub mod openxr;

use anyhow::bail;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::state::ClientState;
use crate::vr::pose::Pose;

/// Backend type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Headless,
    OpenXr,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headless => "headless",
            Self::OpenXr => "openxr",
        }
    }
}

/// Render-loop settings shared by the backends.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Request session exit after this long (CI).
    pub exit_after: Option<Duration>,
    /// Session recreations allowed after a loss.
    pub max_restarts: u32,
    /// Target tick period while the session runs.
    pub tick_interval: Duration,
    pub status_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            exit_after: None,
            max_restarts: 3,
            tick_interval: Duration::from_micros(1_000_000 / 72),
            status_interval: Duration::from_secs(10),
        }
    }
}

/// Sleep between ticks while no session is running.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Minimum spacing between restart attempts.
const RESTART_SPACING: Duration = Duration::from_secs(1);

// ── Signals ────────────────────────────────────────────────

/// Flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

// ── Restart policy ─────────────────────────────────────────

/// Bounded, spaced session recreation after a loss.
#[derive(Debug)]
pub struct RestartPolicy {
    pub max_retries: u32,
    pub spacing: Duration,
    retry_count: u32,
    last_retry: Option<Instant>,
}

impl RestartPolicy {
    pub fn new(max_retries: u32, spacing: Duration) -> Self {
        Self {
            max_retries,
            spacing,
            retry_count: 0,
            last_retry: None,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Claim the next attempt.  Returns how long to wait before it, or
    /// `None` once the retries are used up.
    pub fn next_attempt(&mut self, now: Instant) -> Option<Duration> {
        if self.retry_count >= self.max_retries {
            return None;
        }
        let wait = match self.last_retry {
            Some(last) => self.spacing.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        };
        self.retry_count += 1;
        self.last_retry = Some(now + wait);
        Some(wait)
    }
}

// ── Driver ─────────────────────────────────────────────────

/// Supplies the head pose each tick.
pub trait HeadPoseSource {
    fn head_pose(&mut self, elapsed: Duration) -> Pose;
}

/// Head that never moves.  Used with runtimes that expose no view pose.
pub struct StaticHead(pub Pose);

impl HeadPoseSource for StaticHead {
    fn head_pose(&mut self, _elapsed: Duration) -> Pose {
        self.0
    }
}

/// A client plus the head it tracks, as built by a backend.
pub struct BackendSession {
    pub client: ClientState,
    pub head: Box<dyn HeadPoseSource>,
}

/// How one session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SessionEnd {
    restart: bool,
}

/// Run sessions built by `build` until one exits without asking for a
/// restart.
pub fn run_client<B>(config: &LoopConfig, mut build: B) -> anyhow::Result<()>
where
    B: FnMut() -> anyhow::Result<BackendSession>,
{
    install_signal_handlers();
    let start = Instant::now();
    let mut policy = RestartPolicy::new(config.max_restarts, RESTART_SPACING);

    loop {
        let mut session = build()?;
        session.client.start()?;
        let end = run_session(&mut session, config, start)?;
        session.client.shutdown()?;
        info!("client: session ended ({})", session.client.status_line(start.elapsed()));

        if !end.restart {
            return Ok(());
        }
        match policy.next_attempt(Instant::now()) {
            Some(wait) => {
                info!(
                    "client: restart attempt {}/{} in {}ms",
                    policy.retry_count(),
                    policy.max_retries,
                    wait.as_millis()
                );
                std::thread::sleep(wait);
            }
            None => {
                error!("client: max restarts ({}) reached", policy.max_retries);
                bail!("session lost after {} restarts", policy.max_retries);
            }
        }
    }
}

fn run_session(
    session: &mut BackendSession,
    config: &LoopConfig,
    start: Instant,
) -> anyhow::Result<SessionEnd> {
    let client = &mut session.client;
    let mut exit_requested = false;
    let mut last_status_log = Instant::now();

    loop {
        if !exit_requested {
            let timer_fired = config.exit_after.is_some_and(|d| start.elapsed() >= d);
            if shutdown_requested() || timer_fired {
                if timer_fired {
                    info!("client: exit timer fired after {}s", start.elapsed().as_secs());
                } else {
                    info!("client: shutdown signal received");
                }
                exit_requested = true;
                if !client.is_running() {
                    return Ok(SessionEnd { restart: false });
                }
                client.request_exit()?;
            }
        }

        let tick_start = Instant::now();
        let pose = session.head.head_pose(start.elapsed());
        let out = client.tick(&pose)?;
        if out.navigate_back {
            info!("client: navigate back");
        }
        if out.poll.exit_loop {
            if out.poll.request_restart && !exit_requested {
                warn!("client: session lost, restart requested");
                return Ok(SessionEnd { restart: true });
            }
            return Ok(SessionEnd { restart: false });
        }

        if last_status_log.elapsed() >= config.status_interval {
            info!("client status: {}", client.status_line(start.elapsed()));
            last_status_log = Instant::now();
        }

        if client.is_running() {
            std::thread::sleep(config.tick_interval.saturating_sub(tick_start.elapsed()));
        } else {
            std::thread::sleep(IDLE_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_first_attempt_is_immediate() {
        let mut p = RestartPolicy::new(3, Duration::from_secs(1));
        assert_eq!(p.next_attempt(Instant::now()), Some(Duration::ZERO));
        assert_eq!(p.retry_count(), 1);
    }

    #[test]
    fn test_restart_policy_spacing() {
        let mut p = RestartPolicy::new(3, Duration::from_secs(1));
        let t0 = Instant::now();
        p.next_attempt(t0);
        let wait = p.next_attempt(t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(wait, Duration::from_millis(700));
        // Long after the last attempt: no wait.
        let wait = p.next_attempt(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_restart_policy_exhausts() {
        let mut p = RestartPolicy::new(3, Duration::ZERO);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(p.next_attempt(now).is_some());
        }
        assert_eq!(p.next_attempt(now), None);
        assert_eq!(p.retry_count(), 3);
    }

    #[test]
    fn test_restart_policy_zero_max() {
        let mut p = RestartPolicy::new(0, Duration::from_secs(1));
        assert_eq!(p.next_attempt(Instant::now()), None);
    }

    #[test]
    fn test_static_head() {
        let pose = Pose::from_yaw_degrees(15.0, [0.0, 1.7, 0.0]);
        let mut head = StaticHead(pose);
        assert_eq!(head.head_pose(Duration::from_secs(9)), pose);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendType::Headless.as_str(), "headless");
        assert_eq!(BackendType::OpenXr.as_str(), "openxr");
    }
}
