use thiserror::Error;

use crate::model::ConnectionStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("connection timeout: {0}")]
    ConnectTimeout(String),
    #[error("read timeout: {0}")]
    ReadTimeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server returned status {0}")]
    Server(u16),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("unknown remote source {0}")]
    UnknownSource(String),
    #[error("remote source {0} has no playlist loaded")]
    NotConnected(String),
    #[error("track {0} is not in the playlist")]
    TrackNotFound(String),
    #[error("invalid schedule anchor: {0}")]
    InvalidAnchor(String),
    #[error("playlist {0} is not open")]
    PlaylistNotOpen(String),
    #[error("remote edit failed: {0}")]
    EditFailed(String),
    #[error("request to {0} abandoned after disconnect")]
    Aborted(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Connection status a failed request leaves its client in.
    ///
    /// Only wire-level errors drive the state machine; engine errors return `None`.
    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        match self {
            SyncError::ConnectTimeout(_) | SyncError::ReadTimeout(_) => {
                Some(ConnectionStatus::Timeout)
            }
            SyncError::Transport(_) | SyncError::Server(_) | SyncError::Parse(_) => {
                Some(ConnectionStatus::Error)
            }
            _ => None,
        }
    }

    /// Short operator-facing message for a status bar.
    pub fn status_message(&self) -> String {
        match self {
            SyncError::ConnectTimeout(_) => "connection timeout".to_string(),
            SyncError::ReadTimeout(_) => "read timeout".to_string(),
            SyncError::Transport(detail) => format!("connection failed: {}", detail),
            SyncError::Server(code) => format!("server returned status {}", code),
            SyncError::Parse(detail) => format!("malformed response: {}", detail),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<quick_xml::Error> for SyncError {
    fn from(err: quick_xml::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_errors_map_to_status() {
        assert_eq!(
            SyncError::ConnectTimeout("x".into()).connection_status(),
            Some(ConnectionStatus::Timeout)
        );
        assert_eq!(
            SyncError::ReadTimeout("x".into()).connection_status(),
            Some(ConnectionStatus::Timeout)
        );
        assert_eq!(
            SyncError::Server(503).connection_status(),
            Some(ConnectionStatus::Error)
        );
        assert_eq!(SyncError::UnknownSource("a".into()).connection_status(), None);
        assert_eq!(SyncError::Aborted("104.7".into()).connection_status(), None);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(
            SyncError::ConnectTimeout("10.0.0.5".into()).status_message(),
            "connection timeout"
        );
        assert_eq!(SyncError::ReadTimeout("".into()).status_message(), "read timeout");
        assert_eq!(
            SyncError::Server(404).status_message(),
            "server returned status 404"
        );
    }
}
