pub mod ipc;
pub mod relay;

pub use ipc::{Command, IpcError, Response, StatusInfo};
pub use relay::{decode_data_uri, encode_data_uri, ProtocolError, RelayMessage};
