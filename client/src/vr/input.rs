//! Controller input polling.
//!
//! Syncs the action set once per tick and walks every hand x control in
//! a fixed order.  Buttons produce edge-triggered press/release signals
//! (`is_active && changed_since_last_sync`); analog controls are sampled
//! every tick while active.
//!
//! Scale policy: some buttons set the hand's render scale to a
//! control-specific constant on press and back to 1.0 on release.  The
//! mutation is immediate, so when several scale-setting controls change
//! in the same tick the last one in [`Control::POLL_ORDER`] wins.  The
//! grab squeeze is processed first and rewrites the scale every tick it
//! is active.

use tracing::{debug, info};

// ── Hands and controls ─────────────────────────────────────

/// Which hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Tracked controller inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Grab,
    Quit,
    Touchpad,
    Home,
    Back,
    Side,
    Trigger,
    Joystick,
    Battery,
    RockerTouch,
    TriggerTouch,
    ThumbrestTouch,
    Grip,
    B,
    Y,
    A,
    X,
    ATouch,
    XTouch,
    BTouch,
    YTouch,
    Pose,
}

/// Value shape of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Button,
    Analog,
    Axis2,
    Pose,
}

impl Control {
    /// Order in which controls are read each tick.
    pub const POLL_ORDER: [Control; 22] = [
        Control::Grab,
        Control::Quit,
        Control::Touchpad,
        Control::Home,
        Control::Back,
        Control::Side,
        Control::Trigger,
        Control::Joystick,
        Control::Battery,
        Control::RockerTouch,
        Control::TriggerTouch,
        Control::ThumbrestTouch,
        Control::Grip,
        Control::B,
        Control::Y,
        Control::A,
        Control::X,
        Control::ATouch,
        Control::XTouch,
        Control::BTouch,
        Control::YTouch,
        Control::Pose,
    ];

    pub fn kind(&self) -> ControlKind {
        match self {
            Self::Grab | Self::Trigger | Self::Battery | Self::Grip => ControlKind::Analog,
            Self::Joystick => ControlKind::Axis2,
            Self::Pose => ControlKind::Pose,
            _ => ControlKind::Button,
        }
    }

    /// Hand scale applied while this button is held.
    pub fn press_scale(&self) -> Option<f32> {
        match self {
            Self::Touchpad => Some(0.1),
            Self::Side => Some(2.5),
            Self::B | Self::Y => Some(1.5),
            Self::A | Self::X => Some(0.5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grab => "grab",
            Self::Quit => "quit",
            Self::Touchpad => "touchpad",
            Self::Home => "home",
            Self::Back => "back",
            Self::Side => "side",
            Self::Trigger => "trigger",
            Self::Joystick => "joystick",
            Self::Battery => "battery",
            Self::RockerTouch => "rocker-touch",
            Self::TriggerTouch => "trigger-touch",
            Self::ThumbrestTouch => "thumbrest-touch",
            Self::Grip => "grip",
            Self::B => "b",
            Self::Y => "y",
            Self::A => "a",
            Self::X => "x",
            Self::ATouch => "a-touch",
            Self::XTouch => "x-touch",
            Self::BTouch => "b-touch",
            Self::YTouch => "y-touch",
            Self::Pose => "pose",
        }
    }
}

// ── Action state ───────────────────────────────────────────

/// Current value of an action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionValue {
    Bool(bool),
    Float(f32),
    Vector2([f32; 2]),
}

impl ActionValue {
    pub fn as_bool(&self) -> bool {
        match *self {
            Self::Bool(b) => b,
            Self::Float(v) => v > 0.5,
            Self::Vector2(_) => false,
        }
    }

    pub fn as_float(&self) -> f32 {
        match *self {
            Self::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Float(v) => v,
            Self::Vector2(_) => 0.0,
        }
    }

    pub fn as_vector2(&self) -> [f32; 2] {
        match *self {
            Self::Vector2(v) => v,
            _ => [0.0, 0.0],
        }
    }
}

/// Per-hand, per-control state read after a sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionState {
    pub is_active: bool,
    pub changed_since_last_sync: bool,
    pub current: ActionValue,
}

impl ActionState {
    pub fn inactive() -> Self {
        Self {
            is_active: false,
            changed_since_last_sync: false,
            current: ActionValue::Bool(false),
        }
    }

    /// Press/release edge, if one happened since the last sync.
    pub fn edge(&self) -> Option<Edge> {
        if self.is_active && self.changed_since_last_sync {
            Some(if self.current.as_bool() {
                Edge::Pressed
            } else {
                Edge::Released
            })
        } else {
            None
        }
    }
}

/// Direction of a button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Pressed,
    Released,
}

/// A discrete button transition observed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonSignal {
    pub hand: Hand,
    pub control: Control,
    pub edge: Edge,
}

/// Runtime action access.
pub trait ActionSource {
    /// Sync the active action set.  Must run before any `state` read.
    fn sync(&mut self) -> anyhow::Result<()>;
    fn state(&mut self, hand: Hand, control: Control) -> anyhow::Result<ActionState>;
    fn apply_haptic(&mut self, hand: Hand, amplitude: f32) -> anyhow::Result<()>;
}

// ── Per-hand state ─────────────────────────────────────────

/// Render-facing state of one hand.
#[derive(Debug, Clone, PartialEq)]
pub struct HandRuntimeState {
    pub scale: f32,
    /// Pose action active (controller tracked).
    pub active: bool,
    /// Joystick position.
    pub xy_position: [f32; 2],
    pub trigger: f32,
    pub grip: f32,
    pub battery: f32,
}

impl Default for HandRuntimeState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            active: false,
            xy_position: [0.0, 0.0],
            trigger: 0.0,
            grip: 0.0,
            battery: 0.0,
        }
    }
}

/// Configuration for input polling.
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Grab value above which a haptic pulse fires.
    pub haptic_threshold: f32,
    pub haptic_amplitude: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            haptic_threshold: 0.9,
            haptic_amplitude: 0.5,
        }
    }
}

/// Everything one poll produced for the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub signals: Vec<ButtonSignal>,
    /// Back released after a press.  Consume within this tick.
    pub navigate_back: bool,
    /// Quit pressed; the caller should request session exit.
    pub request_exit: bool,
    /// Haptic pulses issued during this poll.
    pub haptics: u32,
}

// ── Poller ─────────────────────────────────────────────────

pub struct InputPoller {
    pub config: InputConfig,
    hands: [HandRuntimeState; 2],
    back_armed: [bool; 2],
}

impl InputPoller {
    pub fn new(config: InputConfig) -> Self {
        Self {
            config,
            hands: [HandRuntimeState::default(), HandRuntimeState::default()],
            back_armed: [false, false],
        }
    }

    pub fn hand(&self, hand: Hand) -> &HandRuntimeState {
        &self.hands[hand.index()]
    }

    /// Forget all hand state, e.g. after a session restart.
    pub fn reset(&mut self) {
        self.hands = [HandRuntimeState::default(), HandRuntimeState::default()];
        self.back_armed = [false, false];
    }

    /// Sync and read every control once.
    pub fn poll(&mut self, source: &mut dyn ActionSource) -> anyhow::Result<InputFrame> {
        let mut frame = InputFrame::default();
        for hand in &mut self.hands {
            hand.active = false;
        }

        source.sync()?;

        for hand in Hand::ALL {
            for control in Control::POLL_ORDER {
                let state = source.state(hand, control)?;
                self.apply(hand, control, &state, source, &mut frame)?;
            }
        }
        Ok(frame)
    }

    fn apply(
        &mut self,
        hand: Hand,
        control: Control,
        state: &ActionState,
        source: &mut dyn ActionSource,
        frame: &mut InputFrame,
    ) -> anyhow::Result<()> {
        let idx = hand.index();

        match control.kind() {
            ControlKind::Pose => {
                self.hands[idx].active = state.is_active;
                return Ok(());
            }
            ControlKind::Axis2 => {
                if state.is_active {
                    self.hands[idx].xy_position = state.current.as_vector2();
                }
                return Ok(());
            }
            ControlKind::Analog => {
                if !state.is_active {
                    return Ok(());
                }
                let value = state.current.as_float();
                let hs = &mut self.hands[idx];
                match control {
                    Control::Grab => {
                        // 1.0 open, 0.5 fully squeezed.
                        hs.scale = 1.0 - 0.5 * value;
                        if value > self.config.haptic_threshold {
                            source.apply_haptic(hand, self.config.haptic_amplitude)?;
                            frame.haptics += 1;
                        }
                    }
                    Control::Trigger => hs.trigger = value,
                    Control::Grip => hs.grip = value,
                    Control::Battery => hs.battery = value,
                    _ => {}
                }
                return Ok(());
            }
            ControlKind::Button => {}
        }

        let Some(edge) = state.edge() else {
            return Ok(());
        };
        debug!(
            "input: {} {} {:?}",
            hand.as_str(),
            control.as_str(),
            edge
        );
        frame.signals.push(ButtonSignal {
            hand,
            control,
            edge,
        });

        match (control, edge) {
            (Control::Quit, Edge::Pressed) => {
                info!("input: quit pressed on {} hand", hand.as_str());
                frame.request_exit = true;
            }
            (Control::Back, Edge::Pressed) => self.back_armed[idx] = true,
            (Control::Back, Edge::Released) => {
                if self.back_armed[idx] {
                    self.back_armed[idx] = false;
                    frame.navigate_back = true;
                }
            }
            _ => {
                if let Some(pressed_scale) = control.press_scale() {
                    self.hands[idx].scale = match edge {
                        Edge::Pressed => pressed_scale,
                        Edge::Released => 1.0,
                    };
                }
            }
        }
        Ok(())
    }
}
