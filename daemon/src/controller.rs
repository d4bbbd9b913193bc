//! Owns the turn state and drives one turn at a time: feedback sound,
//! capture, relay round trip, reply or fallback playback.

use shared::ipc::StatusInfo;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioClip, AudioDevice, DeviceError};
use crate::button::ButtonEvent;
use crate::config::CaptureConfig;
use crate::relay::{RelayError, ResponseRelay, StatusUpdate};
use crate::session::{AbortHandle, CaptureError, CaptureOutcome, CaptureSession, Recording};
use crate::sounds::SoundBank;
use crate::state::{transition, Effect, TurnEvent, TurnState, TurnStats};
use crate::vad::SilenceDetector;

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Replied,
    Failed(RelayError),
    Discarded,
    DeviceUnavailable(DeviceError),
    Ignored,
}

pub struct TurnController {
    device: AudioDevice,
    relay: Arc<dyn ResponseRelay>,
    sounds: Arc<SoundBank>,
    capture: CaptureConfig,
    state: TurnState,
    state_tx: watch::Sender<TurnState>,
    stats: Arc<TurnStats>,
    updates: Option<broadcast::Receiver<StatusUpdate>>,
    abort: AbortHandle,
    idle_since: Instant,
}

/// Read-only view used by the control server.
#[derive(Clone)]
pub struct StatusHandle {
    state: watch::Receiver<TurnState>,
    stats: Arc<TurnStats>,
    relay: Arc<dyn ResponseRelay>,
}

impl StatusHandle {
    pub fn turn_state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn snapshot(&self) -> StatusInfo {
        StatusInfo {
            turn_state: self.turn_state().to_string(),
            relay_mode: self.relay.mode().to_string(),
            peer_connected: self.relay.peer_connected(),
            turns_completed: self.stats.completed(),
            turns_failed: self.stats.failed(),
            presses_ignored: self.stats.presses_ignored(),
        }
    }
}

impl TurnController {
    pub fn new(
        device: AudioDevice,
        relay: Arc<dyn ResponseRelay>,
        sounds: Arc<SoundBank>,
        capture: CaptureConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(TurnState::Idle);
        let updates = relay.status_updates();
        Self {
            device,
            relay,
            sounds,
            capture,
            state: TurnState::Idle,
            state_tx,
            stats: Arc::new(TurnStats::default()),
            updates,
            abort: AbortHandle::new(),
            idle_since: Instant::now(),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<TurnStats> {
        Arc::clone(&self.stats)
    }

    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            state: self.state_tx.subscribe(),
            stats: self.stats(),
            relay: Arc::clone(&self.relay),
        }
    }

    /// Cancels the capture of the turn in progress, if any.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn apply(&mut self, event: TurnEvent) -> Effect {
        let t = transition(self.state, event);
        if t.next != self.state {
            info!("Turn state: {} -> {} ({:?})", self.state, t.next, event);
            self.state = t.next;
            self.state_tx.send_replace(t.next);
            if t.next == TurnState::Idle {
                self.idle_since = Instant::now();
            }
        }
        t.effect
    }

    /// Consumes presses until the source closes. Presses made while a turn
    /// was running are dropped rather than starting a new turn afterwards.
    pub async fn run(mut self, mut presses: mpsc::Receiver<ButtonEvent>) {
        info!("Turn controller ready");
        while let Some(press) = self.next_press(&mut presses).await {
            if press.pressed_at < self.idle_since {
                debug!("Ignoring press made during the previous turn");
                self.stats.record_ignored();
                continue;
            }
            let outcome = self.handle_press().await;
            debug!("Turn finished: {:?}", outcome);
        }
        info!("Button source closed, turn controller stopping");
    }

    async fn next_press(
        &mut self,
        presses: &mut mpsc::Receiver<ButtonEvent>,
    ) -> Option<ButtonEvent> {
        loop {
            let Some(updates) = self.updates.as_mut() else {
                return presses.recv().await;
            };
            let closed = tokio::select! {
                press = presses.recv() => return press,
                update = updates.recv() => note_update(update),
            };
            if closed {
                self.updates = None;
            }
        }
    }

    /// Runs one full turn for a press. Returns once the state is back to
    /// Idle, or immediately if a turn is already running.
    pub async fn handle_press(&mut self) -> TurnOutcome {
        if self.apply(TurnEvent::ButtonPressed) != Effect::StartCapture {
            info!("Button press ignored while {}", self.state);
            self.stats.record_ignored();
            return TurnOutcome::Ignored;
        }
        self.abort.reset();

        let feedback = self.sounds.immediate();
        if let Err(e) = self.play(feedback).await {
            warn!("Feedback sound failed: {}", e);
        }

        let recording = match self.capture().await {
            Ok(outcome) => match self.accept(outcome) {
                Some(recording) => recording,
                None => {
                    self.apply(TurnEvent::CaptureDiscarded);
                    return TurnOutcome::Discarded;
                }
            },
            Err(CaptureError::DeviceUnavailable(e)) => {
                error!("No input device: {}", e);
                self.apply(TurnEvent::DeviceFailed);
                self.stats.record_failed();
                self.apply(TurnEvent::Recovered);
                return TurnOutcome::DeviceUnavailable(e);
            }
            Err(CaptureError::CaptureAborted(reason)) => {
                warn!("Capture aborted: {}", reason);
                self.apply(TurnEvent::CaptureDiscarded);
                return TurnOutcome::Discarded;
            }
        };

        self.apply(TurnEvent::CaptureCompleted);
        match self.invoke_relay(recording).await {
            Ok(reply) => {
                self.apply(TurnEvent::ReplyReady);
                if let Err(e) = self.play(reply).await {
                    warn!("Reply playback failed: {}", e);
                }
                self.apply(TurnEvent::PlaybackFinished);
                self.stats.record_completed();
                TurnOutcome::Replied
            }
            Err(e) => {
                error!("Turn failed: {}", e);
                if self.apply(TurnEvent::RelayFailed) == Effect::PlayFallback {
                    if let Err(play_err) = self.play(self.sounds.fallback()).await {
                        warn!("Fallback phrase failed: {}", play_err);
                    }
                }
                self.stats.record_failed();
                self.apply(TurnEvent::Recovered);
                TurnOutcome::Failed(e)
            }
        }
    }

    /// Keeps recordings long enough to be worth sending.
    fn accept(&self, outcome: CaptureOutcome) -> Option<Recording> {
        let recording = outcome.into_recording();
        if recording.is_empty() || recording.duration_ms() < self.capture.min_recording_ms {
            info!(
                "Recording too short ({} ms), not sending",
                recording.duration_ms()
            );
            return None;
        }
        Some(recording)
    }

    async fn capture(&self) -> Result<CaptureOutcome, CaptureError> {
        let detector = SilenceDetector::from_config(&self.capture, self.device.format());
        let mut session = CaptureSession::new(
            self.device.clone(),
            detector,
            self.capture.max_duration_ms,
            self.abort.clone(),
        );

        tokio::task::spawn_blocking(move || session.run())
            .await
            .map_err(|e| CaptureError::CaptureAborted(format!("capture task failed: {}", e)))?
    }

    async fn play(&self, clip: AudioClip) -> Result<(), DeviceError> {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || device.play_clip(&clip))
            .await
            .map_err(|e| DeviceError::PlaybackError {
                device: "playback task".to_string(),
                reason: e.to_string(),
            })?
    }

    async fn invoke_relay(&mut self, recording: Recording) -> Result<AudioClip, RelayError> {
        let relay = Arc::clone(&self.relay);
        let process = relay.process(recording);
        tokio::pin!(process);

        loop {
            let Some(updates) = self.updates.as_mut() else {
                return process.await;
            };
            let closed = tokio::select! {
                result = &mut process => return result,
                update = updates.recv() => note_update(update),
            };
            if closed {
                self.updates = None;
            }
        }
    }
}

/// Logs a relay status update. Returns true once the channel has closed.
fn note_update(update: Result<StatusUpdate, broadcast::error::RecvError>) -> bool {
    match update {
        Ok(StatusUpdate::Info(text)) => info!("Relay: {}", text),
        Ok(StatusUpdate::PeerError(text)) => warn!("Relay reported an error: {}", text),
        Ok(StatusUpdate::PeerConnected) => info!("Relay peer connected"),
        Ok(StatusUpdate::PeerDisconnected) => info!("Relay peer disconnected"),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!("Missed {} relay status updates", n);
        }
        Err(broadcast::error::RecvError::Closed) => return true,
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scripted::{loud_frame, silent_frame, ScriptedBackend};
    use crate::audio::{AudioFormat, DeviceProfile, DeviceRole};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    const FRAME: usize = 160;

    struct StubRelay {
        result: Result<AudioClip, RelayError>,
        received: Mutex<Vec<Recording>>,
    }

    impl StubRelay {
        fn replying() -> Arc<Self> {
            Arc::new(Self {
                result: Ok(AudioClip::tone(440.0, 200, 16000)),
                received: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: RelayError) -> Arc<Self> {
            Arc::new(Self {
                result: Err(err),
                received: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResponseRelay for StubRelay {
        async fn process(&self, recording: Recording) -> Result<AudioClip, RelayError> {
            self.received.lock().unwrap().push(recording);
            self.result.clone()
        }

        fn mode(&self) -> &'static str {
            "stub"
        }
    }

    fn controller(backend: &ScriptedBackend, relay: Arc<StubRelay>) -> TurnController {
        let device = AudioDevice::new(
            Arc::new(backend.clone()),
            vec![
                DeviceProfile::new("mic", DeviceRole::Input, 0),
                DeviceProfile::new("speaker", DeviceRole::Output, 0),
            ],
            AudioFormat {
                sample_rate: 16000,
                channels: 1,
                frame_samples: FRAME,
            },
            1.0,
        );
        let capture = CaptureConfig {
            max_duration_ms: 3000,
            silence_duration_ms: 500,
            min_recording_ms: 300,
            ..CaptureConfig::default()
        };
        TurnController::new(device, relay, Arc::new(SoundBank::default()), capture)
    }

    fn speak(backend: &ScriptedBackend, speech_frames: usize) {
        backend.push_frames(loud_frame(FRAME, 0.3), speech_frames);
        backend.repeat_forever(silent_frame(FRAME));
    }

    #[tokio::test]
    async fn test_successful_turn_plays_reply() {
        let backend = ScriptedBackend::new();
        speak(&backend, 100);
        let relay = StubRelay::replying();
        let mut controller = controller(&backend, relay.clone());
        let mut states = controller.subscribe();

        let outcome = controller.handle_press().await;

        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(controller.state(), TurnState::Idle);
        assert_eq!(*states.borrow_and_update(), TurnState::Idle);
        assert_eq!(relay.calls(), 1);
        // feedback then reply
        assert_eq!(backend.played_on().len(), 2);
        assert_eq!(controller.stats().completed(), 1);
    }

    #[tokio::test]
    async fn test_relay_failure_plays_fallback() {
        let backend = ScriptedBackend::new();
        speak(&backend, 100);
        let relay = StubRelay::failing(RelayError::Timeout(Duration::from_secs(30)));
        let mut controller = controller(&backend, relay);

        let outcome = controller.handle_press().await;

        assert_eq!(
            outcome,
            TurnOutcome::Failed(RelayError::Timeout(Duration::from_secs(30)))
        );
        assert_eq!(controller.state(), TurnState::Idle);
        assert_eq!(backend.played_on().len(), 2);
        assert_eq!(controller.stats().failed(), 1);
    }

    #[tokio::test]
    async fn test_short_recording_is_not_sent() {
        let backend = ScriptedBackend::new();
        let relay = StubRelay::replying();
        let mut controller = controller(&backend, relay.clone());
        controller.capture.max_duration_ms = 200;
        backend.repeat_forever(silent_frame(FRAME));

        let outcome = controller.handle_press().await;

        assert_eq!(outcome, TurnOutcome::Discarded);
        assert_eq!(relay.calls(), 0);
        assert_eq!(controller.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_missing_input_device_skips_relay_and_fallback() {
        let backend = ScriptedBackend::new();
        backend.mark_unavailable("mic");
        let relay = StubRelay::replying();
        let mut controller = controller(&backend, relay.clone());

        let outcome = controller.handle_press().await;

        assert!(matches!(outcome, TurnOutcome::DeviceUnavailable(_)));
        assert_eq!(relay.calls(), 0);
        // only the feedback sound
        assert_eq!(backend.played_on().len(), 1);
        assert_eq!(controller.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_press_outside_idle_is_ignored() {
        let backend = ScriptedBackend::new();
        let mut controller = controller(&backend, StubRelay::replying());
        controller.state = TurnState::Processing;

        assert_eq!(controller.handle_press().await, TurnOutcome::Ignored);
        assert_eq!(controller.state(), TurnState::Processing);
        assert_eq!(controller.stats().presses_ignored(), 1);
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let backend = ScriptedBackend::new();
        let controller = controller(&backend, StubRelay::replying());
        let status = controller.status_handle().snapshot();

        assert_eq!(status.turn_state, "idle");
        assert_eq!(status.relay_mode, "stub");
        assert!(!status.peer_connected);
        assert_eq!(status.turns_completed, 0);
    }
}
