use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    /// Behaves like a physical button press.
    Press,
    Status,
    Ping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Pong,
    Error(String),
    Status(StatusInfo),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusInfo {
    pub turn_state: String,
    pub relay_mode: String,
    pub peer_connected: bool,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub presses_ignored: u64,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is pollyd running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> StatusInfo {
        StatusInfo {
            turn_state: "idle".to_string(),
            relay_mode: "relayed".to_string(),
            peer_connected: true,
            turns_completed: 3,
            turns_failed: 1,
            presses_ignored: 0,
        }
    }

    #[test]
    fn test_command_serialization_press() {
        let json = serde_json::to_string(&Command::Press).unwrap();
        assert_eq!(json, r#""Press""#);
    }

    #[test]
    fn test_response_serialization_error() {
        let resp = Response::Error("press debounced".to_string());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"Error":"press debounced"}"#);
    }

    #[test]
    fn test_response_serialization_status() {
        let json = serde_json::to_string(&Response::Status(sample_status())).unwrap();
        assert!(json.starts_with(r#"{"Status":{"turn_state":"idle""#));
        assert!(json.contains(r#""peer_connected":true"#));
    }

    #[test]
    fn test_status_info_tokens() {
        use serde_test::{assert_tokens, Token};

        assert_tokens(
            &sample_status(),
            &[
                Token::Struct {
                    name: "StatusInfo",
                    len: 6,
                },
                Token::Str("turn_state"),
                Token::Str("idle"),
                Token::Str("relay_mode"),
                Token::Str("relayed"),
                Token::Str("peer_connected"),
                Token::Bool(true),
                Token::Str("turns_completed"),
                Token::U64(3),
                Token::Str("turns_failed"),
                Token::U64(1),
                Token::Str("presses_ignored"),
                Token::U64(0),
                Token::StructEnd,
            ],
        );
    }

    #[test]
    fn test_ipc_error_display_connection_refused() {
        let err = IpcError::ConnectionRefused;
        assert!(err.to_string().contains("pollyd"));
    }

    #[test]
    fn test_ipc_error_display_timeout() {
        assert_eq!(IpcError::Timeout.to_string(), "Connection timeout");
    }
}
