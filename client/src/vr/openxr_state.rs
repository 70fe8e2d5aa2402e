//! OpenXR runtime adapter.
//!
//! Loads the OpenXR runtime, creates an instance with extension
//! negotiation and exposes it through the crate's runtime traits:
//! - [`SessionRuntime`]: create/begin/end/request-exit/destroy
//! - [`EventSource`]: `xrPollEvent` decoded into [`XrEvent`]
//! - [`ActionSource`]: one action per [`Control`], synced per tick
//!
//! Sessions are created with `XR_MND_headless`; no swapchains or
//! graphics bindings are involved.  All three adapters share one
//! [`OpenXrContext`] on the render-loop thread.

use anyhow::{bail, Context as _};
use openxrs as xr;
use openxrs::sys::Handle as _;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, warn};

use super::event::{EventSource, SessionHandle, SessionState, XrEvent};
use super::input::{ActionSource, ActionState, ActionValue, Control, ControlKind, Hand};
use super::session::SessionRuntime;
use super::RuntimeParts;

/// Runtime name and HMD name, for logs.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub runtime_name: String,
    pub system_name: String,
    pub headless: bool,
}

/// Shared OpenXR objects.
pub struct OpenXrContext {
    instance: xr::Instance,
    system: xr::SystemId,
    session: Option<xr::Session<xr::Headless>>,
    // Kept alive for the session's lifetime; a headless session never
    // submits frames.
    _frame_waiter: Option<xr::FrameWaiter>,
    _frame_stream: Option<xr::FrameStream<xr::Headless>>,
    actions: Option<ControllerActions>,
}

type SharedContext = Rc<RefCell<OpenXrContext>>;

/// Entry point for the OpenXR backend.
pub struct OpenXrRuntime;

impl OpenXrRuntime {
    /// Load the runtime and build the adapters.
    /// Returns Ok(None) if no usable runtime is installed.
    pub fn initialize() -> anyhow::Result<Option<RuntimeParts>> {
        info!("XR: loading OpenXR runtime...");
        let entry = match unsafe { xr::Entry::load() } {
            Ok(e) => e,
            Err(e) => {
                warn!("XR: OpenXR loader not available: {}", e);
                return Ok(None);
            }
        };

        let available = match entry.enumerate_extensions() {
            Ok(exts) => exts,
            Err(e) => {
                warn!("XR: failed to enumerate extensions: {}", e);
                return Ok(None);
            }
        };
        if !available.mnd_headless {
            warn!("XR: runtime lacks XR_MND_headless, cannot create a session");
            return Ok(None);
        }

        let mut extensions = xr::ExtensionSet::default();
        extensions.mnd_headless = true;

        let app_info = xr::ApplicationInfo {
            application_name: "xr-stream-client",
            application_version: 1,
            engine_name: "xr-stream-client",
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = match entry.create_instance(&app_info, &extensions, &[]) {
            Ok(inst) => inst,
            Err(e) => {
                warn!("XR: failed to create OpenXR instance: {}", e);
                return Ok(None);
            }
        };

        let runtime_name = instance
            .properties()
            .map(|p| format!("{} v{}", p.runtime_name, p.runtime_version))
            .unwrap_or_else(|_| "unknown".to_string());

        let system = match instance.system(xr::FormFactor::HEAD_MOUNTED_DISPLAY) {
            Ok(id) => id,
            Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => {
                warn!("XR: no HMD connected");
                return Ok(None);
            }
            Err(e) => {
                warn!("XR: system discovery failed: {}", e);
                return Ok(None);
            }
        };
        let system_name = instance
            .system_properties(system)
            .map(|p| p.system_name)
            .unwrap_or_else(|_| "unknown".to_string());

        let info = SystemInfo {
            runtime_name,
            system_name,
            headless: true,
        };
        info!(
            "XR: runtime {}, system {} (headless={})",
            info.runtime_name, info.system_name, info.headless
        );

        let context: SharedContext = Rc::new(RefCell::new(OpenXrContext {
            instance,
            system,
            session: None,
            _frame_waiter: None,
            _frame_stream: None,
            actions: None,
        }));

        Ok(Some(RuntimeParts {
            runtime: Box::new(XrSessionRuntime {
                context: Rc::clone(&context),
            }),
            events: Box::new(XrEventSource {
                context: Rc::clone(&context),
                buffer: xr::EventDataBuffer::new(),
            }),
            actions: Box::new(XrActionSource { context }),
            description: format!("{} / {}", info.runtime_name, info.system_name),
        }))
    }
}

fn raw_handle(session: &xr::Session<xr::Headless>) -> SessionHandle {
    SessionHandle(session.as_raw().into_raw())
}

// ── Session ────────────────────────────────────────────────

struct XrSessionRuntime {
    context: SharedContext,
}

impl XrSessionRuntime {
    fn with_session<T>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&xr::Session<xr::Headless>) -> xr::Result<T>,
    ) -> anyhow::Result<T> {
        let ctx = self.context.borrow();
        let Some(session) = ctx.session.as_ref() else {
            bail!("no OpenXR session");
        };
        if raw_handle(session) != handle {
            bail!("stale session handle {:#x}", handle.0);
        }
        Ok(f(session)?)
    }
}

impl SessionRuntime for XrSessionRuntime {
    fn create(&mut self) -> anyhow::Result<SessionHandle> {
        let mut ctx = self.context.borrow_mut();
        if ctx.session.is_some() {
            bail!("OpenXR session already exists");
        }
        let (session, waiter, stream) = unsafe {
            ctx.instance
                .create_session::<xr::Headless>(ctx.system, &xr::headless::SessionCreateInfo {})
        }
        .context("xrCreateSession")?;

        let actions = ControllerActions::new(&ctx.instance, &session)?;
        let handle = raw_handle(&session);
        ctx.session = Some(session);
        ctx._frame_waiter = Some(waiter);
        ctx._frame_stream = Some(stream);
        ctx.actions = Some(actions);
        Ok(handle)
    }

    fn begin(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.with_session(session, |s| {
            s.begin(xr::ViewConfigurationType::PRIMARY_STEREO)
                .map(|_| ())
        })
    }

    fn end(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.with_session(session, |s| s.end().map(|_| ()))
    }

    fn request_exit(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        self.with_session(session, |s| s.request_exit().map(|_| ()))
    }

    fn destroy(&mut self, session: SessionHandle) -> anyhow::Result<()> {
        let mut ctx = self.context.borrow_mut();
        match ctx.session.as_ref() {
            Some(s) if raw_handle(s) == session => {}
            _ => bail!("destroy of unknown session {:#x}", session.0),
        }
        // Actions and frame objects reference the session; drop them first.
        ctx.actions = None;
        ctx._frame_stream = None;
        ctx._frame_waiter = None;
        ctx.session = None;
        Ok(())
    }
}

// ── Events ─────────────────────────────────────────────────

fn map_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

struct XrEventSource {
    context: SharedContext,
    buffer: xr::EventDataBuffer,
}

impl EventSource for XrEventSource {
    fn try_next(&mut self) -> anyhow::Result<Option<XrEvent>> {
        let ctx = self.context.borrow();
        let Some(event) = ctx
            .instance
            .poll_event(&mut self.buffer)
            .context("xrPollEvent")?
        else {
            return Ok(None);
        };

        let decoded = match event {
            xr::Event::InstanceLossPending(e) => XrEvent::InstanceLossPending {
                loss_time_ns: e.loss_time().as_nanos(),
            },
            xr::Event::SessionStateChanged(e) => XrEvent::SessionStateChanged {
                session: SessionHandle(e.session().into_raw()),
                state: map_state(e.state()),
                time_ns: e.time().as_nanos(),
            },
            xr::Event::InteractionProfileChanged(e) => XrEvent::InteractionProfileChanged {
                session: SessionHandle(e.session().into_raw()),
            },
            xr::Event::ReferenceSpaceChangePending(e) => XrEvent::ReferenceSpaceChangePending {
                session: SessionHandle(e.session().into_raw()),
            },
            xr::Event::EventsLost(e) => XrEvent::EventsLost {
                count: e.lost_event_count(),
            },
            _ => XrEvent::Unknown { kind: "other" },
        };
        Ok(Some(decoded))
    }
}

// ── Actions ────────────────────────────────────────────────

enum ControlAction {
    Bool(xr::Action<bool>),
    Float(xr::Action<f32>),
    Vector2(xr::Action<xr::Vector2f>),
    Pose(xr::Action<xr::Posef>),
}

impl ControlAction {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_> {
        match self {
            Self::Bool(a) => xr::Binding::new(a, path),
            Self::Float(a) => xr::Binding::new(a, path),
            Self::Vector2(a) => xr::Binding::new(a, path),
            Self::Pose(a) => xr::Binding::new(a, path),
        }
    }
}

/// Touch controller bindings.  `*` expands to both hands.
const TOUCH_BINDINGS: &[(Control, &str)] = &[
    (Control::Grab, "*/input/squeeze/value"),
    (Control::Quit, "/user/hand/left/input/menu/click"),
    (Control::Touchpad, "*/input/thumbstick/click"),
    (Control::Trigger, "*/input/trigger/value"),
    (Control::Joystick, "*/input/thumbstick"),
    (Control::RockerTouch, "*/input/thumbstick/touch"),
    (Control::TriggerTouch, "*/input/trigger/touch"),
    (Control::ThumbrestTouch, "*/input/thumbrest/touch"),
    (Control::Grip, "*/input/squeeze/value"),
    (Control::B, "/user/hand/right/input/b/click"),
    (Control::Y, "/user/hand/left/input/y/click"),
    (Control::A, "/user/hand/right/input/a/click"),
    (Control::X, "/user/hand/left/input/x/click"),
    (Control::ATouch, "/user/hand/right/input/a/touch"),
    (Control::XTouch, "/user/hand/left/input/x/touch"),
    (Control::BTouch, "/user/hand/right/input/b/touch"),
    (Control::YTouch, "/user/hand/left/input/y/touch"),
    (Control::Pose, "*/input/grip/pose"),
];

const SIMPLE_BINDINGS: &[(Control, &str)] = &[
    (Control::Back, "*/input/menu/click"),
    (Control::Trigger, "*/input/select/click"),
    (Control::Pose, "*/input/grip/pose"),
];

struct ControllerActions {
    set: xr::ActionSet,
    controls: Vec<(Control, ControlAction)>,
    haptic: xr::Action<xr::Haptic>,
    hands: [xr::Path; 2],
}

impl ControllerActions {
    fn new(instance: &xr::Instance, session: &xr::Session<xr::Headless>) -> anyhow::Result<Self> {
        let set = instance
            .create_action_set("controllers", "Controllers", 0)
            .context("xrCreateActionSet")?;
        let hands = [
            instance.string_to_path("/user/hand/left")?,
            instance.string_to_path("/user/hand/right")?,
        ];

        let mut controls = Vec::with_capacity(Control::POLL_ORDER.len());
        for control in Control::POLL_ORDER {
            let name = control.as_str();
            let action = match control.kind() {
                ControlKind::Button => ControlAction::Bool(set.create_action(name, name, &hands)?),
                ControlKind::Analog => ControlAction::Float(set.create_action(name, name, &hands)?),
                ControlKind::Axis2 => {
                    ControlAction::Vector2(set.create_action(name, name, &hands)?)
                }
                ControlKind::Pose => ControlAction::Pose(set.create_action(name, name, &hands)?),
            };
            controls.push((control, action));
        }
        let haptic = set.create_action::<xr::Haptic>("haptic", "Haptic", &hands)?;

        let actions = Self {
            set,
            controls,
            haptic,
            hands,
        };
        actions.suggest(instance, "/interaction_profiles/oculus/touch_controller", TOUCH_BINDINGS)?;
        actions.suggest(instance, "/interaction_profiles/khr/simple_controller", SIMPLE_BINDINGS)?;

        session
            .attach_action_sets(&[&actions.set])
            .context("xrAttachSessionActionSets")?;
        Ok(actions)
    }

    fn action(&self, control: Control) -> Option<&ControlAction> {
        self.controls
            .iter()
            .find(|(c, _)| *c == control)
            .map(|(_, a)| a)
    }

    fn suggest(
        &self,
        instance: &xr::Instance,
        profile: &str,
        table: &[(Control, &str)],
    ) -> anyhow::Result<()> {
        let mut bindings = Vec::new();
        for (control, pattern) in table {
            let Some(action) = self.action(*control) else {
                continue;
            };
            let paths: Vec<String> = match pattern.strip_prefix('*') {
                Some(rest) => vec![
                    format!("/user/hand/left{rest}"),
                    format!("/user/hand/right{rest}"),
                ],
                None => vec![pattern.to_string()],
            };
            for path in paths {
                bindings.push(action.binding(instance.string_to_path(&path)?));
            }
        }
        for hand in ["left", "right"] {
            let path = instance.string_to_path(&format!("/user/hand/{hand}/output/haptic"))?;
            bindings.push(xr::Binding::new(&self.haptic, path));
        }

        let profile_path = instance.string_to_path(profile)?;
        if let Err(e) = instance.suggest_interaction_profile_bindings(profile_path, &bindings) {
            warn!("XR: binding suggestion rejected for {}: {}", profile, e);
        }
        Ok(())
    }
}

struct XrActionSource {
    context: SharedContext,
}

impl ActionSource for XrActionSource {
    fn sync(&mut self) -> anyhow::Result<()> {
        let ctx = self.context.borrow();
        let (Some(session), Some(actions)) = (ctx.session.as_ref(), ctx.actions.as_ref()) else {
            bail!("action sync without a session");
        };
        session
            .sync_actions(&[xr::ActiveActionSet::new(&actions.set)])
            .context("xrSyncActions")?;
        Ok(())
    }

    fn state(&mut self, hand: Hand, control: Control) -> anyhow::Result<ActionState> {
        let ctx = self.context.borrow();
        let (Some(session), Some(actions)) = (ctx.session.as_ref(), ctx.actions.as_ref()) else {
            return Ok(ActionState::inactive());
        };
        let Some(action) = actions.action(control) else {
            return Ok(ActionState::inactive());
        };
        let path = actions.hands[hand.index()];

        let state = match action {
            ControlAction::Bool(a) => {
                let s = a.state(session, path)?;
                ActionState {
                    is_active: s.is_active,
                    changed_since_last_sync: s.changed_since_last_sync,
                    current: ActionValue::Bool(s.current_state),
                }
            }
            ControlAction::Float(a) => {
                let s = a.state(session, path)?;
                ActionState {
                    is_active: s.is_active,
                    changed_since_last_sync: s.changed_since_last_sync,
                    current: ActionValue::Float(s.current_state),
                }
            }
            ControlAction::Vector2(a) => {
                let s = a.state(session, path)?;
                ActionState {
                    is_active: s.is_active,
                    changed_since_last_sync: s.changed_since_last_sync,
                    current: ActionValue::Vector2([s.current_state.x, s.current_state.y]),
                }
            }
            ControlAction::Pose(a) => ActionState {
                is_active: a.is_active(session, path)?,
                changed_since_last_sync: false,
                current: ActionValue::Bool(false),
            },
        };
        Ok(state)
    }

    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> anyhow::Result<()> {
        let ctx = self.context.borrow();
        let (Some(session), Some(actions)) = (ctx.session.as_ref(), ctx.actions.as_ref()) else {
            return Ok(());
        };
        let vibration = xr::HapticVibration::new()
            .amplitude(amplitude)
            .duration(xr::Duration::MIN_HAPTIC)
            .frequency(xr::FREQUENCY_UNSPECIFIED);
        actions
            .haptic
            .apply_feedback(session, actions.hands[hand.index()], &vibration)?;
        debug!("XR: haptic pulse on {} hand", hand.as_str());
        Ok(())
    }
}
