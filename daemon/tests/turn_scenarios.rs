//! End-to-end turn behaviour against the scripted audio backend.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pollyd::audio::scripted::{loud_frame, silent_frame, ScriptedBackend};
use pollyd::audio::{AudioClip, AudioDevice, AudioFormat, DeviceProfile, DeviceRole};
use pollyd::button::ButtonEventSource;
use pollyd::config::CaptureConfig;
use pollyd::controller::{TurnController, TurnOutcome};
use pollyd::relay::{RelayError, RelayHub, RelayedRelay, ResponseRelay};
use pollyd::session::{AbortHandle, CaptureOutcome, CaptureSession, Recording};
use pollyd::sounds::SoundBank;
use pollyd::state::TurnState;
use pollyd::vad::SilenceDetector;
use shared::relay::{encode_data_uri, RelayMessage};

/// 10 ms frames at 16 kHz.
const FRAME: usize = 160;

fn format() -> AudioFormat {
    AudioFormat {
        sample_rate: 16000,
        channels: 1,
        frame_samples: FRAME,
    }
}

fn device(backend: &ScriptedBackend) -> AudioDevice {
    AudioDevice::new(
        Arc::new(backend.clone()),
        vec![
            DeviceProfile::new("usb-mic", DeviceRole::Input, 0),
            DeviceProfile::new("builtin-mic", DeviceRole::Input, 1),
            DeviceProfile::new("speaker", DeviceRole::Output, 0),
        ],
        format(),
        0.8,
    )
}

fn capture_config(max_duration_ms: u64) -> CaptureConfig {
    CaptureConfig {
        max_duration_ms,
        silence_duration_ms: 2000,
        min_recording_ms: 300,
        ..CaptureConfig::default()
    }
}

fn session(backend: &ScriptedBackend, max_duration_ms: u64) -> CaptureSession {
    let config = capture_config(max_duration_ms);
    CaptureSession::new(
        device(backend),
        SilenceDetector::from_config(&config, &format()),
        max_duration_ms,
        AbortHandle::new(),
    )
}

fn speech() -> Vec<f32> {
    loud_frame(FRAME, 0.25)
}

fn silence() -> Vec<f32> {
    silent_frame(FRAME)
}

/// Replies with a tone and remembers what it was given, along with the
/// input open/release counts seen at the moment it was called.
struct RecordingRelay {
    backend: ScriptedBackend,
    received: Mutex<Vec<(Recording, usize, usize)>>,
}

impl RecordingRelay {
    fn new(backend: &ScriptedBackend) -> Arc<Self> {
        Arc::new(Self {
            backend: backend.clone(),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<(Recording, usize, usize)> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseRelay for RecordingRelay {
    async fn process(&self, recording: Recording) -> Result<AudioClip, RelayError> {
        let opened = self.backend.opened_count(DeviceRole::Input);
        let released = self.backend.released_count(DeviceRole::Input);
        self.received
            .lock()
            .unwrap()
            .push((recording, opened, released));
        Ok(AudioClip::tone(440.0, 300, 16000))
    }

    fn mode(&self) -> &'static str {
        "recording"
    }
}

fn controller(
    backend: &ScriptedBackend,
    relay: Arc<dyn ResponseRelay>,
    max_duration_ms: u64,
) -> TurnController {
    TurnController::new(
        device(backend),
        relay,
        Arc::new(SoundBank::default()),
        capture_config(max_duration_ms),
    )
}

#[test]
fn scenario_a_speech_then_silence_stops_early() {
    let backend = ScriptedBackend::new();
    backend.push_frames(speech(), 300);
    backend.repeat_forever(silence());

    let outcome = session(&backend, 30_000).run().unwrap();

    match outcome {
        CaptureOutcome::Stopped(recording) => {
            assert_eq!(recording.frames(), 500);
            assert_eq!(recording.duration_ms(), 5000);
        }
        other => panic!("expected Stopped, got {:?}", other),
    }
    assert_eq!(backend.released_count(DeviceRole::Input), 1);
}

#[test]
fn scenario_b_silence_only_runs_to_cap() {
    let backend = ScriptedBackend::new();
    backend.repeat_forever(silence());

    let outcome = session(&backend, 5000).run().unwrap();

    assert!(matches!(outcome, CaptureOutcome::TimedOut(_)));
    assert_eq!(outcome.recording().frames(), 500);
}

#[test]
fn silence_detector_never_completes_without_speech() {
    let config = capture_config(30_000);
    let mut detector = SilenceDetector::from_config(&config, &format());
    let quiet_levels = [0.0, 0.001, 0.01, 0.029];

    for (i, level) in quiet_levels.iter().cycle().take(2000).enumerate() {
        let observation = detector.observe(&loud_frame(FRAME, *level));
        assert!(!observation.turn_complete, "completed at frame {}", i);
    }
}

#[tokio::test]
async fn successful_turn_acquires_and_releases_input_once_before_relay() {
    let backend = ScriptedBackend::new();
    backend.push_frames(speech(), 150);
    backend.repeat_forever(silence());
    let relay = RecordingRelay::new(&backend);
    let mut controller = controller(&backend, relay.clone(), 30_000);

    let outcome = controller.handle_press().await;

    assert_eq!(outcome, TurnOutcome::Replied);
    let received = relay.received();
    assert_eq!(received.len(), 1);
    let (_, opened, released) = &received[0];
    assert_eq!((*opened, *released), (1, 1));
    assert_eq!(backend.opened_count(DeviceRole::Input), 1);
    assert_eq!(backend.released_count(DeviceRole::Input), 1);
}

#[tokio::test]
async fn recording_at_exact_cap_is_forwarded() {
    let backend = ScriptedBackend::new();
    backend.repeat_forever(silence());
    let relay = RecordingRelay::new(&backend);
    let mut controller = controller(&backend, relay.clone(), 4000);

    let outcome = controller.handle_press().await;

    assert_eq!(outcome, TurnOutcome::Replied);
    let received = relay.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.duration_ms(), 4000);
}

#[tokio::test]
async fn repeated_silent_presses_leave_no_residue() {
    let backend = ScriptedBackend::new();
    backend.repeat_forever(silence());
    let hub = Arc::new(RelayHub::new());
    let (_peer, _rx) = hub.attach_peer().await;
    let relay = Arc::new(RelayedRelay::new(hub.clone(), Duration::from_secs(1)));
    // cap shorter than the minimum recording: every turn is discarded
    let mut controller = controller(&backend, relay, 200);

    for _ in 0..5 {
        assert_eq!(controller.handle_press().await, TurnOutcome::Discarded);
        assert_eq!(controller.state(), TurnState::Idle);
        assert!(!hub.has_pending());
    }
    assert_eq!(
        backend.opened_count(DeviceRole::Input),
        backend.released_count(DeviceRole::Input)
    );
}

#[tokio::test]
async fn scenario_c_relay_timeout_plays_fallback_and_recovers() {
    let backend = ScriptedBackend::new();
    backend.push_frames(speech(), 100);
    backend.repeat_forever(silence());
    let hub = Arc::new(RelayHub::new());
    let (_peer, _rx) = hub.attach_peer().await;
    let timeout = Duration::from_millis(100);
    let relay = Arc::new(RelayedRelay::new(hub.clone(), timeout));
    let mut controller = controller(&backend, relay, 30_000);

    let outcome = tokio::time::timeout(Duration::from_secs(5), controller.handle_press())
        .await
        .expect("turn did not finish");

    assert_eq!(outcome, TurnOutcome::Failed(RelayError::Timeout(timeout)));
    assert_eq!(controller.state(), TurnState::Idle);
    // feedback sound, then the fallback phrase
    assert_eq!(backend.played_on().len(), 2);
    assert!(!hub.has_pending());
}

#[tokio::test]
async fn scenario_d_no_input_device_aborts_without_playback() {
    let backend = ScriptedBackend::new();
    backend.mark_unavailable("usb-mic");
    backend.mark_unavailable("builtin-mic");
    let relay = RecordingRelay::new(&backend);
    let mut controller = controller(&backend, relay.clone(), 30_000);

    let outcome = controller.handle_press().await;

    assert!(matches!(outcome, TurnOutcome::DeviceUnavailable(_)));
    assert_eq!(controller.state(), TurnState::Idle);
    assert!(relay.received().is_empty());
    // nothing after the feedback sound
    assert_eq!(backend.played_on().len(), 1);
}

#[tokio::test]
async fn scenario_d_no_devices_at_all_stays_available() {
    let backend = ScriptedBackend::new();
    for name in ["usb-mic", "builtin-mic", "speaker"] {
        backend.mark_unavailable(name);
    }
    let relay = RecordingRelay::new(&backend);
    let mut controller = controller(&backend, relay, 30_000);

    assert!(matches!(
        controller.handle_press().await,
        TurnOutcome::DeviceUnavailable(_)
    ));
    assert!(backend.played_on().is_empty());

    assert!(matches!(
        controller.handle_press().await,
        TurnOutcome::DeviceUnavailable(_)
    ));
    assert_eq!(controller.stats().failed(), 2);
}

#[tokio::test]
async fn reply_playback_failure_still_returns_to_idle() {
    let backend = ScriptedBackend::new();
    backend.fail_playback_on("speaker");
    backend.push_frames(speech(), 100);
    backend.repeat_forever(silence());
    let relay = RecordingRelay::new(&backend);
    let mut controller = controller(&backend, relay.clone(), 30_000);

    let outcome = controller.handle_press().await;

    assert_eq!(outcome, TurnOutcome::Replied);
    assert_eq!(controller.state(), TurnState::Idle);
    assert!(backend.played_on().is_empty());

    // the next press still runs a full turn
    backend.push_frames(speech(), 100);
    assert_eq!(controller.handle_press().await, TurnOutcome::Replied);
    assert_eq!(controller.state(), TurnState::Idle);
    assert_eq!(relay.received().len(), 2);
    assert_eq!(controller.stats().completed(), 2);
}

#[tokio::test]
async fn scenario_e_unsolicited_pong_does_not_touch_turn() {
    let backend = ScriptedBackend::new();
    backend.push_frames(speech(), 100);
    backend.repeat_forever(silence());
    let hub = Arc::new(RelayHub::new());
    let (peer, mut peer_rx) = hub.attach_peer().await;
    assert!(matches!(peer_rx.recv().await, Some(RelayMessage::Info { .. })));

    let relay = Arc::new(RelayedRelay::new(hub.clone(), Duration::from_secs(5)));
    let mut controller = controller(&backend, relay, 30_000);
    let states = controller.subscribe();

    hub.handle_inbound(peer, r#"{"type":"pong"}"#).await;
    assert_eq!(*states.borrow(), TurnState::Idle);

    let turn = tokio::spawn(async move {
        let outcome = controller.handle_press().await;
        (controller, outcome)
    });

    let request_id = match peer_rx.recv().await {
        Some(RelayMessage::Audio { id, .. }) => id,
        other => panic!("expected audio, got {:?}", other),
    };
    assert_eq!(*states.borrow(), TurnState::Processing);

    hub.handle_inbound(peer, r#"{"type":"pong","data":"late"}"#).await;
    assert_eq!(*states.borrow(), TurnState::Processing);
    assert!(hub.has_pending());

    let reply_wav = AudioClip::tone(600.0, 200, 16000).to_wav_bytes().unwrap();
    let reply = RelayMessage::AudioResponse {
        data: encode_data_uri("audio/wav", &reply_wav),
        id: request_id,
    };
    hub.handle_inbound(peer, &reply.to_text().unwrap()).await;

    let (controller, outcome) = turn.await.unwrap();
    assert_eq!(outcome, TurnOutcome::Replied);
    assert_eq!(controller.state(), TurnState::Idle);
    assert!(matches!(peer_rx.recv().await, Some(RelayMessage::Ack { .. })));
}

#[tokio::test]
async fn presses_during_a_turn_are_dropped() {
    let backend = ScriptedBackend::new();
    backend.push_frames(speech(), 50);
    backend.repeat_forever(silence());
    let relay = RecordingRelay::new(&backend);
    let controller = controller(&backend, relay.clone(), 30_000);
    let stats = controller.stats();

    let (button, presses) = ButtonEventSource::new(Duration::ZERO);
    let pressed_at = Instant::now();
    assert!(button.press_at(pressed_at));
    assert!(button.press_at(pressed_at));
    drop(button);

    controller.run(presses).await;

    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.presses_ignored(), 1);
    assert_eq!(relay.received().len(), 1);
}
