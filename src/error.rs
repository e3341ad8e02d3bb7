use crate::resp::{RespError, RespValue};

/// Crate-wide error type. The `Display` text of the protocol-facing variants
/// is the exact error line sent to clients.
#[derive(Debug, thiserror::Error)]
pub enum BlinkError {
    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("NOAUTH Authentication required.")]
    NoAuth,

    #[error("ERR invalid username-password pair")]
    InvalidCredentials,

    /// An error reply received from the server (client side).
    #[error("{0}")]
    Server(String),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Resp(#[from] RespError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BlinkError {
    /// The error reply to send for this error.
    pub fn to_resp_error(&self) -> RespValue {
        match self {
            BlinkError::Resp(e) => RespValue::error(format!("ERR Protocol error: {e}")),
            other => RespValue::error(other.to_string()),
        }
    }

    /// Whether the error came from the transport rather than the peer's input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BlinkError::Io(_) | BlinkError::Resp(RespError::Io(_)) | BlinkError::ConnectionClosed
        )
    }
}

pub type BlinkResult<T> = Result<T, BlinkError>;
