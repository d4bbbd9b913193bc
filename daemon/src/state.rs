use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Processing,
    Responding,
    Error,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Processing => "processing",
            TurnState::Responding => "responding",
            TurnState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    ButtonPressed,
    /// A usable recording is ready.
    CaptureCompleted,
    /// The capture was aborted or too short to send.
    CaptureDiscarded,
    DeviceFailed,
    ReplyReady,
    RelayFailed,
    PlaybackFinished,
    Recovered,
}

/// Work the controller performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Play the feedback sound, then record.
    StartCapture,
    InvokeRelay,
    PlayReply,
    PlayFallback,
    IgnorePress,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: TurnState,
    pub effect: Effect,
}

impl Transition {
    fn to(next: TurnState, effect: Effect) -> Self {
        Self { next, effect }
    }
}

/// The turn-taking state machine. Events that make no sense in the current
/// state leave it unchanged.
pub fn transition(state: TurnState, event: TurnEvent) -> Transition {
    use TurnEvent::*;
    use TurnState::*;

    match (state, event) {
        (Idle, ButtonPressed) => Transition::to(Listening, Effect::StartCapture),
        (current, ButtonPressed) => Transition::to(current, Effect::IgnorePress),

        (Listening, CaptureCompleted) => Transition::to(Processing, Effect::InvokeRelay),
        (Listening, CaptureDiscarded) => Transition::to(Idle, Effect::None),
        (Listening, DeviceFailed) => Transition::to(Error, Effect::None),

        (Processing, ReplyReady) => Transition::to(Responding, Effect::PlayReply),
        (Processing, RelayFailed) => Transition::to(Error, Effect::PlayFallback),

        (Responding, PlaybackFinished) => Transition::to(Idle, Effect::None),

        (Error, Recovered) => Transition::to(Idle, Effect::None),

        (current, _) => Transition::to(current, Effect::None),
    }
}

#[derive(Debug, Default)]
pub struct TurnStats {
    completed: AtomicU64,
    failed: AtomicU64,
    presses_ignored: AtomicU64,
}

impl TurnStats {
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.presses_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn presses_ignored(&self) -> u64 {
        self.presses_ignored.load(Ordering::Relaxed)
    }
}
