use shared::ipc::{Command, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::button::ButtonEventSource;
use crate::controller::StatusHandle;
use crate::rate_limit::ControlRateLimiter;

/// Local control socket: one JSON command per connection, one JSON
/// response back.
pub struct DaemonServer {
    socket_path: PathBuf,
    handler: Arc<CommandHandler>,
}

pub struct CommandHandler {
    button: ButtonEventSource,
    status: StatusHandle,
    rate_limiter: ControlRateLimiter,
}

impl CommandHandler {
    pub fn new(
        button: ButtonEventSource,
        status: StatusHandle,
        rate_limiter: ControlRateLimiter,
    ) -> Self {
        Self {
            button,
            status,
            rate_limiter,
        }
    }

    pub fn handle(&self, command: Command) -> Response {
        if !self.rate_limiter.check() {
            warn!("Rate limited command: {:?}", command);
            return Response::Error("rate limited, try again shortly".to_string());
        }

        match command {
            Command::Press => {
                if self.button.press() {
                    info!("Button press from control socket");
                    Response::Ok
                } else {
                    Response::Error("press debounced".to_string())
                }
            }
            Command::Status => Response::Status(self.status.snapshot()),
            Command::Ping => Response::Pong,
        }
    }
}

impl DaemonServer {
    pub fn new(socket_path: PathBuf, handler: CommandHandler) -> Self {
        Self {
            socket_path,
            handler: Arc::new(handler),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let socket_path = self.socket_path.clone();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        info!("Starting control socket at {}", socket_path.display());

        let listener = UnixListener::bind(&socket_path)?;
        debug!("Listener bound successfully");

        loop {
            let handler = Arc::clone(&self.handler);
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(handler, stream).await {
                            error!("Error handling connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        handler: Arc<CommandHandler>,
        mut stream: tokio::net::UnixStream,
    ) -> anyhow::Result<()> {
        let mut buffer = vec![0u8; 1024];
        let n = stream.read(&mut buffer).await?;

        if n == 0 {
            return Ok(());
        }

        buffer.truncate(n);

        let response = match serde_json::from_slice::<Command>(&buffer) {
            Ok(command) => {
                debug!("Received command: {:?}", command);
                handler.handle(command)
            }
            Err(e) => {
                warn!("Malformed command: {}", e);
                Response::Error(format!("malformed command: {}", e))
            }
        };

        let response_json = serde_json::to_vec(&response)?;
        stream.write_all(&response_json).await?;

        debug!("Sent response: {:?}", response);

        Ok(())
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scripted::ScriptedBackend;
    use crate::audio::{AudioDevice, AudioFormat, DeviceProfile, DeviceRole};
    use crate::config::{AudioConfig, CaptureConfig};
    use crate::controller::TurnController;
    use crate::relay::{RelayHub, RelayedRelay};
    use crate::sounds::SoundBank;
    use std::time::Duration;
    use tokio::net::UnixStream;

    fn handler(rate_limiter: ControlRateLimiter) -> (CommandHandler, tokio::sync::mpsc::Receiver<crate::button::ButtonEvent>) {
        let audio = AudioConfig::default();
        let device = AudioDevice::new(
            Arc::new(ScriptedBackend::new()),
            DeviceProfile::from_config(&audio),
            AudioFormat::from_config(&audio),
            1.0,
        );
        let relay = Arc::new(RelayedRelay::new(
            Arc::new(RelayHub::new()),
            Duration::from_secs(1),
        ));
        let controller = TurnController::new(
            device,
            relay,
            Arc::new(SoundBank::default()),
            CaptureConfig::default(),
        );
        let (button, presses) = ButtonEventSource::new(Duration::from_millis(200));
        (
            CommandHandler::new(button, controller.status_handle(), rate_limiter),
            presses,
        )
    }

    #[test]
    fn test_press_queues_event_and_debounces() {
        let (handler, mut presses) = handler(ControlRateLimiter::new(10, 20, false));

        assert_eq!(handler.handle(Command::Press), Response::Ok);
        assert_eq!(
            handler.handle(Command::Press),
            Response::Error("press debounced".to_string())
        );
        assert!(presses.try_recv().is_ok());
        assert!(presses.try_recv().is_err());
    }

    #[test]
    fn test_status_reports_relay() {
        let (handler, _presses) = handler(ControlRateLimiter::new(10, 20, false));
        match handler.handle(Command::Status) {
            Response::Status(info) => {
                assert_eq!(info.turn_state, "idle");
                assert_eq!(info.relay_mode, "relayed");
                assert!(!info.peer_connected);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(handler.handle(Command::Ping), Response::Pong);
    }

    #[test]
    fn test_rate_limited() {
        let (handler, _presses) = handler(ControlRateLimiter::new(1, 2, true));
        assert_eq!(handler.handle(Command::Ping), Response::Pong);
        assert_eq!(handler.handle(Command::Ping), Response::Pong);
        assert!(matches!(handler.handle(Command::Ping), Response::Error(_)));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("pollyd.sock");
        let (handler, _presses) = handler(ControlRateLimiter::new(10, 20, true));
        let server = DaemonServer::new(socket_path.clone(), handler);
        let task = tokio::spawn(async move { server.run().await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&socket_path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = stream.expect("server did not start");

        stream
            .write_all(&serde_json::to_vec(&Command::Ping).unwrap())
            .await
            .unwrap();
        let mut buffer = vec![0u8; 1024];
        let n = stream.read(&mut buffer).await.unwrap();
        let response: Response = serde_json::from_slice(&buffer[..n]).unwrap();
        assert_eq!(response, Response::Pong);

        task.abort();
    }
}
