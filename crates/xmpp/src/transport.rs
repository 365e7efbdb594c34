use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tokio_xmpp::{
    Packet, XmppCodec,
    connect::{AsyncReadAndWrite, ServerConnector},
    parsers::{jid::Jid, ns},
    starttls::ServerConfig,
};
use tracing::debug;

use crate::error::ConnectionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Full account address including the resource to bind.
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub timeout_seconds: u64,
}

impl ConnectionConfig {
    /// Deadline for connecting, authenticating and each write.
    pub fn io_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    fn server_config(&self) -> ServerConfig {
        self.server
            .as_ref()
            .map_or(ServerConfig::UseSrv, |host| ServerConfig::Manual {
                host: host.clone(),
                port: self.port.unwrap_or(CLIENT_PORT),
            })
    }
}

/// Byte-level link to an XMPP server.
///
/// `recv` yields one serialized top-level stanza per call. Whitespace
/// keep-alives from the peer are swallowed.
pub trait XmppTransport: Send + 'static {
    fn connect(
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self, ConnectionError>> + Send
    where
        Self: Sized;

    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn recv(&mut self) -> impl Future<Output = Result<Vec<u8>, ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Address the server bound for this session.
    fn bound_jid(&self) -> &str;
}

const CLIENT_PORT: u16 = 5222;
const READ_CHUNK: usize = 16 * 1024;
const STREAM_HEADER: &str =
    "<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams'>";

/// STARTTLS client transport on top of tokio-xmpp's connector.
pub struct NativeTcpTransport {
    stream: Box<dyn AsyncReadAndWrite>,
    deadline: Duration,
    bound_jid: String,
    codec: XmppCodec,
    pending: BytesMut,
}

/// Map a connector failure onto the most specific error by its wording.
fn classify(message: String) -> ConnectionError {
    const DNS: &[&str] = &["dns", "resolve", "srv", "idna"];
    const TLS: &[&str] = &["tls", "certificate", "handshake"];

    let lower = message.to_ascii_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|word| lower.contains(word));
    if mentions(DNS) {
        ConnectionError::DnsResolutionFailed(message)
    } else if mentions(TLS) {
        ConnectionError::TlsHandshakeFailed(message)
    } else {
        ConnectionError::TransportError(message)
    }
}

fn from_io(error: std::io::Error) -> ConnectionError {
    use std::io::ErrorKind::{BrokenPipe, ConnectionReset, UnexpectedEof};
    match error.kind() {
        UnexpectedEof | ConnectionReset | BrokenPipe => ConnectionError::Closed,
        _ => ConnectionError::TransportError(error.to_string()),
    }
}

async fn within<T>(
    deadline: Duration,
    operation: impl Future<Output = std::io::Result<T>>,
) -> Result<T, ConnectionError> {
    match timeout(deadline, operation).await {
        Ok(result) => result.map_err(from_io),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Decoder already past the stream header, so it yields stanzas directly.
fn stanza_codec() -> XmppCodec {
    let mut codec = XmppCodec::new();
    let mut header = BytesMut::from(STREAM_HEADER.as_bytes());
    let _ = codec.decode(&mut header);
    codec
}

/// Serialized bytes for a stanza, `None` for packets the caller never sees.
fn stanza_bytes(packet: Packet) -> Result<Option<Vec<u8>>, ConnectionError> {
    let element = match packet {
        Packet::Stanza(element) => element,
        Packet::Text(_) | Packet::StreamStart(_) => return Ok(None),
        Packet::StreamEnd => return Err(ConnectionError::Closed),
    };
    let mut bytes = Vec::new();
    element
        .write_to(&mut bytes)
        .map_err(|error| ConnectionError::TransportError(error.to_string()))?;
    Ok(Some(bytes))
}

impl NativeTcpTransport {
    fn next_buffered(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        while let Some(packet) = self
            .codec
            .decode(&mut self.pending)
            .map_err(|error| ConnectionError::StreamError(error.to_string()))?
        {
            if let Some(bytes) = stanza_bytes(packet)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}

impl XmppTransport for NativeTcpTransport {
    async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let jid: Jid = config.jid.parse().map_err(|error| {
            ConnectionError::TransportError(format!("bad account address {}: {error}", config.jid))
        })?;
        let Some(username) = jid.node() else {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "{} has no local part to authenticate with",
                config.jid
            )));
        };
        let deadline = config.io_deadline();

        let opened = timeout(
            deadline,
            config.server_config().connect(&jid, ns::JABBER_CLIENT),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)?
        .map_err(|error| classify(error.to_string()))?;
        let authenticated = timeout(
            deadline,
            crate::sasl::authenticate(opened, username.as_str(), &config.password),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)??;
        debug!(jid = %authenticated.bound_jid, "transport ready");

        Ok(Self {
            stream: Box::new(authenticated.stream),
            deadline,
            bound_jid: authenticated.bound_jid,
            codec: stanza_codec(),
            pending: BytesMut::with_capacity(READ_CHUNK),
        })
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        if data.is_empty() {
            return Ok(());
        }
        within(self.deadline, async {
            self.stream.write_all(data).await?;
            self.stream.flush().await
        })
        .await
    }

    // No read deadline: the liveness probes decide when a quiet link is dead.
    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let mut chunk = vec![0_u8; READ_CHUNK];
        loop {
            if let Some(stanza) = self.next_buffered()? {
                return Ok(stanza);
            }
            let read = self.stream.read(&mut chunk).await.map_err(from_io)?;
            if read == 0 {
                return Err(ConnectionError::Closed);
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let _ = timeout(self.deadline, self.stream.write_all(b"</stream:stream>")).await;
        within(self.deadline, self.stream.shutdown()).await
    }

    fn bound_jid(&self) -> &str {
        &self.bound_jid
    }
}
