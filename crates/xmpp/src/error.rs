use thiserror::Error;

/// Why a link to the server could not be opened or kept open.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not resolve the server: {0}")]
    DnsResolutionFailed(String),

    #[error("TLS negotiation failed: {0}")]
    TlsHandshakeFailed(String),

    /// Credentials were refused. Retrying with the same account is pointless.
    #[error("server refused the credentials: {0}")]
    AuthenticationFailed(String),

    #[error("XMPP stream failure: {0}")]
    StreamError(String),

    #[error("timed out talking to the server")]
    Timeout,

    #[error("socket failure: {0}")]
    TransportError(String),

    #[error("server closed the connection")]
    Closed,
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthenticationFailed(_))
    }
}

#[derive(Debug, Error)]
pub enum StanzaError {
    #[error("unparseable stanza: {0}")]
    ParseFailed(String),

    #[error("<{stanza}/> without a '{attribute}' attribute")]
    MissingAttribute {
        stanza: &'static str,
        attribute: &'static str,
    },
}

impl From<StanzaError> for ConnectionError {
    fn from(error: StanzaError) -> Self {
        Self::StreamError(error.to_string())
    }
}
