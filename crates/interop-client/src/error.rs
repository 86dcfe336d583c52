use interop_core::{ErrorKind, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hub: {0}")]
    Hub(WireError),
    #[error("connection closed")]
    Closed,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// The hub's error code, if the hub refused the request.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Hub(e) => Some(e.code),
            _ => None,
        }
    }
}
