use async_trait::async_trait;
use shared::relay::{decode_data_uri, encode_data_uri, RelayMessage};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RelayError, ResponseRelay, StatusUpdate};
use crate::audio::AudioClip;
use crate::session::Recording;

const OUTBOUND_CAPACITY: usize = 32;
const WELCOME: &str = "Connected to Polly WebSocket server";
const ACK: &str = "Audio response received";

pub type PeerId = u64;

struct Peer {
    id: PeerId,
    outbound: mpsc::Sender<RelayMessage>,
}

struct PendingRequest {
    id: String,
    reply: oneshot::Sender<Result<AudioClip, RelayError>>,
}

#[derive(Default)]
struct HubState {
    peer: Option<Peer>,
    pending: Option<PendingRequest>,
    next_peer_id: PeerId,
    ping_outstanding: bool,
}

impl HubState {
    fn fail_pending(&mut self, reason: &str) {
        if let Some(pending) = self.pending.take() {
            warn!("Failing pending request {}: {}", pending.id, reason);
            let _ = pending
                .reply
                .send(Err(RelayError::NetworkError(reason.to_string())));
        }
    }
}

/// Transport-independent side of the relayed variant. The WebSocket handler
/// attaches the connected peer, pumps its outbound queue and feeds every
/// inbound text frame to [`RelayHub::handle_inbound`].
///
/// One peer is served at a time and at most one request is outstanding.
pub struct RelayHub {
    state: Mutex<HubState>,
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHub {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(HubState::default()),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, update: StatusUpdate) {
        let _ = self.status_tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().peer.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn ping_outstanding(&self) -> bool {
        self.lock().ping_outstanding
    }

    /// Registers a newly connected peer, replacing any previous one. A
    /// request in flight to the old peer fails with a network error.
    pub async fn attach_peer(&self) -> (PeerId, mpsc::Receiver<RelayMessage>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let (id, sender) = {
            let mut state = self.lock();
            if let Some(old) = state.peer.take() {
                info!("Relay peer {} replaced by a new connection", old.id);
                state.fail_pending("relay peer replaced by a new connection");
            }
            state.next_peer_id += 1;
            let id = state.next_peer_id;
            state.peer = Some(Peer {
                id,
                outbound: outbound.clone(),
            });
            state.ping_outstanding = false;
            (id, outbound)
        };

        info!("Relay peer {} connected", id);
        self.publish(StatusUpdate::PeerConnected);
        let _ = sender
            .send(RelayMessage::Info {
                data: WELCOME.to_string(),
            })
            .await;

        (id, rx)
    }

    pub fn detach_peer(&self, peer_id: PeerId) {
        let mut state = self.lock();
        if state.peer.as_ref().map(|p| p.id) != Some(peer_id) {
            return;
        }
        state.peer = None;
        state.ping_outstanding = false;
        state.fail_pending("relay peer disconnected");
        drop(state);

        info!("Relay peer {} disconnected", peer_id);
        self.publish(StatusUpdate::PeerDisconnected);
    }

    fn sender_for(&self, peer_id: PeerId) -> Option<mpsc::Sender<RelayMessage>> {
        self.lock()
            .peer
            .as_ref()
            .filter(|p| p.id == peer_id)
            .map(|p| p.outbound.clone())
    }

    async fn reply(&self, peer_id: PeerId, message: RelayMessage) {
        if let Some(sender) = self.sender_for(peer_id) {
            if sender.send(message).await.is_err() {
                debug!("Relay peer {} went away before reply", peer_id);
            }
        }
    }

    async fn reply_error(&self, peer_id: PeerId, reason: String) {
        self.reply(peer_id, RelayMessage::Error { data: reason }).await;
    }

    /// Handles one text frame from a peer. Protocol problems are answered
    /// with an `error` message and never affect the pending request.
    pub async fn handle_inbound(&self, peer_id: PeerId, text: &str) {
        if self.sender_for(peer_id).is_none() {
            debug!("Ignoring message from stale relay peer {}", peer_id);
            return;
        }

        let message = match RelayMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Bad message from relay peer: {}", e);
                self.reply_error(peer_id, e.to_string()).await;
                return;
            }
        };
        debug!("Received relay message of type: {}", message.kind());

        match message {
            RelayMessage::Ping { data } => {
                let data = data.unwrap_or_else(|| "pong".to_string());
                self.reply(peer_id, RelayMessage::Pong { data: Some(data) })
                    .await;
            }
            RelayMessage::Pong { .. } => {
                let mut state = self.lock();
                if state.ping_outstanding {
                    state.ping_outstanding = false;
                    debug!("Relay peer answered ping");
                } else {
                    info!("Unsolicited pong from relay peer");
                }
            }
            RelayMessage::Info { data } => self.publish(StatusUpdate::Info(data)),
            RelayMessage::Error { data } => self.publish(StatusUpdate::PeerError(data)),
            RelayMessage::AudioResponse { data, id } => {
                self.resolve(peer_id, &data, id).await;
            }
            other => {
                warn!("Relay peer sent device-only message: {}", other.kind());
                self.reply_error(peer_id, format!("Unexpected message type: {}", other.kind()))
                    .await;
            }
        }
    }

    async fn resolve(&self, peer_id: PeerId, data: &str, id: Option<String>) {
        let clip = match decode_data_uri(data)
            .map_err(|e| e.to_string())
            .and_then(|(mime, bytes)| AudioClip::decode(&mime, &bytes).map_err(|e| e.to_string()))
        {
            Ok(clip) => clip,
            Err(reason) => {
                warn!("Undecodable audio_response: {}", reason);
                self.reply_error(peer_id, format!("Invalid audio data format: {}", reason))
                    .await;
                return;
            }
        };

        let pending = {
            let mut state = self.lock();
            let matches = match (&state.pending, &id) {
                (Some(pending), Some(id)) => pending.id == *id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if matches {
                state.pending.take()
            } else {
                None
            }
        };

        let Some(pending) = pending else {
            warn!(
                "Dropping audio_response with no matching request (id: {})",
                id.as_deref().unwrap_or("none")
            );
            return;
        };

        info!(
            "Reply {} received: {} ms of audio",
            pending.id,
            clip.duration_ms()
        );
        self.reply(
            peer_id,
            RelayMessage::Ack {
                data: ACK.to_string(),
            },
        )
        .await;
        if pending.reply.send(Ok(clip)).is_err() {
            debug!("Request {} was abandoned before its reply", pending.id);
        }
    }

    /// Sends a liveness ping to the connected peer, if any.
    pub async fn send_ping(&self) {
        let sender = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.peer.as_ref() {
                Some(peer) => {
                    state.ping_outstanding = true;
                    peer.outbound.clone()
                }
                None => return,
            }
        };
        let _ = sender
            .send(RelayMessage::Ping {
                data: Some("ping".to_string()),
            })
            .await;
    }

    fn clear_pending(&self, id: &str) {
        let mut state = self.lock();
        if state.pending.as_ref().map(|p| p.id.as_str()) == Some(id) {
            state.pending = None;
        }
    }

    /// Sends a recording to the peer and waits for the matching reply.
    pub async fn request(
        &self,
        recording: Recording,
        timeout: Duration,
    ) -> Result<AudioClip, RelayError> {
        let wav = recording
            .to_wav_bytes()
            .map_err(|e| RelayError::NetworkError(format!("could not encode recording: {}", e)))?;
        drop(recording);

        let id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();

        let sender = {
            let mut state = self.lock();
            let sender = match state.peer.as_ref() {
                Some(peer) => peer.outbound.clone(),
                None => {
                    return Err(RelayError::NetworkError(
                        "no relay peer connected".to_string(),
                    ))
                }
            };
            state.fail_pending("superseded by a newer request");
            state.pending = Some(PendingRequest {
                id: id.clone(),
                reply: reply_tx,
            });
            sender
        };

        let _guard = PendingGuard { hub: self, id: &id };

        let message = RelayMessage::Audio {
            data: encode_data_uri("audio/wav", &wav),
            id: Some(id.clone()),
        };
        if sender.send(message).await.is_err() {
            return Err(RelayError::NetworkError(
                "relay peer connection closed".to_string(),
            ));
        }
        info!("Sent {} bytes of audio as request {}", wav.len(), id);

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::NetworkError(
                "request dropped by relay".to_string(),
            )),
            Err(_) => {
                warn!("Request {} timed out after {:?}", id, timeout);
                Err(RelayError::Timeout(timeout))
            }
        }
    }
}

/// Clears the pending slot when a request finishes or its future is dropped.
struct PendingGuard<'a> {
    hub: &'a RelayHub,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.hub.clear_pending(self.id);
    }
}

/// Relayed variant of [`ResponseRelay`] backed by a shared [`RelayHub`].
pub struct RelayedRelay {
    hub: Arc<RelayHub>,
    timeout: Duration,
}

impl RelayedRelay {
    pub fn new(hub: Arc<RelayHub>, timeout: Duration) -> Self {
        Self { hub, timeout }
    }
}

#[async_trait]
impl ResponseRelay for RelayedRelay {
    async fn process(&self, recording: Recording) -> Result<AudioClip, RelayError> {
        self.hub.request(recording, self.timeout).await
    }

    fn status_updates(&self) -> Option<broadcast::Receiver<StatusUpdate>> {
        Some(self.hub.subscribe())
    }

    fn peer_connected(&self) -> bool {
        self.hub.is_connected()
    }

    fn mode(&self) -> &'static str {
        "relayed"
    }
}
