use std::path::PathBuf;

use warden_xmpp::ConnectionError;

/// Conditions that end the whole session and force a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("server ping stalled: no pong for {elapsed_secs}s")]
    Stall { elapsed_secs: u64 },

    #[error("inbound event stream ended")]
    StreamEnded,
}

/// Failures scoped to a single room's join task.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room {room}: timed out while {stage}")]
    Timeout { room: String, stage: &'static str },

    #[error("room {room} is password protected and no password is configured")]
    PasswordProtected { room: String },

    #[error("room {room}: failed to send {stage} request: {source}")]
    Send {
        room: String,
        stage: &'static str,
        #[source]
        source: ConnectionError,
    },
}

/// A ban that could not be carried out. Never fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("unable to announce ban of {target} in {room}: {source}")]
    Announce {
        room: String,
        target: String,
        #[source]
        source: ConnectionError,
    },

    #[error("unable to ban {target} in {room}: id={id}, err={source}")]
    Ban {
        room: String,
        target: String,
        id: &'static str,
        #[source]
        source: ConnectionError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rule file {path} is too large ({size} bytes, limit {limit})")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("failed to parse rule file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_errors_carry_the_correlation_id() {
        let error = EnforcementError::Ban {
            room: "lobby@conference.example.com".into(),
            target: "spammer@evil.example".into(),
            id: "ban1",
            source: ConnectionError::Closed,
        };
        let message = error.to_string();
        assert!(message.contains("id=ban1"));
        assert!(message.contains("spammer@evil.example"));
    }

    #[test]
    fn connection_errors_convert_into_session_errors() {
        let error: SessionError = ConnectionError::Closed.into();
        assert!(matches!(error, SessionError::Connection(ConnectionError::Closed)));
    }
}
