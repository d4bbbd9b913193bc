use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ButtonConfig;

const QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub pressed_at: Instant,
}

/// Produces debounced press events. The receiving half is the lazy press
/// sequence the turn controller consumes.
#[derive(Clone)]
pub struct ButtonEventSource {
    tx: mpsc::Sender<ButtonEvent>,
    debounce: Duration,
    last_press: Arc<Mutex<Option<Instant>>>,
}

impl ButtonEventSource {
    pub fn new(debounce: Duration) -> (Self, mpsc::Receiver<ButtonEvent>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let source = Self {
            tx,
            debounce,
            last_press: Arc::new(Mutex::new(None)),
        };
        (source, rx)
    }

    pub fn from_config(config: &ButtonConfig) -> (Self, mpsc::Receiver<ButtonEvent>) {
        Self::new(Duration::from_millis(config.debounce_ms))
    }

    /// Returns false when the press bounced or the queue is full.
    pub fn press(&self) -> bool {
        self.press_at(Instant::now())
    }

    pub fn press_at(&self, now: Instant) -> bool {
        {
            let mut last = self.last_press.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *last {
                if now.saturating_duration_since(previous) < self.debounce {
                    debug!("Button press debounced");
                    return false;
                }
            }
            *last = Some(now);
        }

        match self.tx.try_send(ButtonEvent { pressed_at: now }) {
            Ok(()) => true,
            Err(e) => {
                debug!("Button press dropped: {}", e);
                false
            }
        }
    }
}
