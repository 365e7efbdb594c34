//! SASL negotiation and resource binding on a freshly opened stream.

use std::collections::HashSet;
use std::str::FromStr;

use futures::StreamExt;
use sasl::client::Mechanism;
use sasl::client::mechanisms::{Plain, Scram};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_xmpp::Packet;
use minidom::Element;
use tokio_xmpp::parsers::{
    bind::{BindQuery, BindResponse},
    iq::{Iq, IqType},
    sasl::{Auth, Challenge, Failure, Mechanism as SaslMechanism, Response, Success},
};
use tokio_xmpp::xmpp_stream::XMPPStream;
use tracing::{debug, warn};

use crate::error::ConnectionError;

const BIND_REQUEST_ID: &str = "bind-1";

type BoxedMechanism = Box<dyn Mechanism + Send>;

/// Client mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl AuthMechanism {
    pub const PREFERENCE: [Self; 3] = [Self::ScramSha256, Self::ScramSha1, Self::Plain];

    /// Name as advertised in `<mechanisms/>`.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::Plain => "PLAIN",
        }
    }

    fn instantiate(self, credentials: Credentials) -> Result<BoxedMechanism, ConnectionError> {
        fn boxed<M: Mechanism + Send + 'static>(mechanism: M) -> BoxedMechanism {
            Box::new(mechanism)
        }
        let mechanism = match self {
            Self::ScramSha256 => Scram::<Sha256>::from_credentials(credentials).map(boxed),
            Self::ScramSha1 => Scram::<Sha1>::from_credentials(credentials).map(boxed),
            Self::Plain => Plain::from_credentials(credentials).map(boxed),
        };
        mechanism.map_err(|error| auth_error(self.wire_name(), error))
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// First entry of [`AuthMechanism::PREFERENCE`] the server offers.
pub fn select_mechanism(offered: &HashSet<String>) -> Option<AuthMechanism> {
    AuthMechanism::PREFERENCE
        .into_iter()
        .find(|mechanism| offered.contains(mechanism.wire_name()))
}

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials::default()
        .with_username(username)
        .with_password(password)
        .with_channel_binding(ChannelBinding::Unsupported)
}

/// An authenticated, resource-bound stream and the address the server bound.
pub struct AuthenticatedStream<S> {
    pub stream: S,
    pub bound_jid: String,
}

fn stream_error<E: std::fmt::Display>(phase: &str) -> impl FnOnce(E) -> ConnectionError + '_ {
    move |error| ConnectionError::StreamError(format!("{phase}: {error}"))
}

fn auth_error(context: &str, detail: impl std::fmt::Debug) -> ConnectionError {
    ConnectionError::AuthenticationFailed(format!("{context}: {detail:?}"))
}

pub(crate) fn map_failure(failure: &Failure) -> ConnectionError {
    let condition = format!("{:?}", failure.defined_condition);
    let text = failure.texts.values().find(|text| !text.is_empty());
    ConnectionError::AuthenticationFailed(match text {
        Some(text) => format!("{condition}: {text}"),
        None => condition,
    })
}

/// Next top-level stanza, skipping stream-level packets.
async fn next_stanza<S>(
    stream: &mut XMPPStream<S>,
    phase: &str,
) -> Result<Element, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(packet) = stream.next().await {
        match packet {
            Ok(Packet::Stanza(stanza)) => return Ok(stanza),
            Ok(_) => {}
            Err(error) => {
                return Err(ConnectionError::StreamError(format!(
                    "stream error during {phase}: {error}"
                )));
            }
        }
    }
    Err(ConnectionError::Closed)
}

async fn bind_resource<S>(stream: XMPPStream<S>) -> Result<XMPPStream<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = stream
        .restart()
        .await
        .map_err(stream_error("restart after SASL"))?;
    if !stream.stream_features.can_bind() {
        return Ok(stream);
    }

    let requested = stream.jid.resource().map(|resource| resource.to_string());
    stream
        .send_stanza(Iq::from_set(BIND_REQUEST_ID, BindQuery::new(requested)))
        .await
        .map_err(stream_error("bind request"))?;

    let reply = loop {
        let stanza = next_stanza(&mut stream, "resource binding").await?;
        match Iq::try_from(stanza) {
            Ok(iq) if iq.id == BIND_REQUEST_ID => break iq,
            _ => continue,
        }
    };
    match reply.payload {
        IqType::Result(Some(payload)) => {
            let bound = BindResponse::try_from(payload).map_err(|error| {
                ConnectionError::StreamError(format!("malformed bind result: {error}"))
            })?;
            stream.jid = bound.into();
            Ok(stream)
        }
        IqType::Result(None) => Ok(stream),
        _ => Err(ConnectionError::StreamError(
            "resource binding refused".to_string(),
        )),
    }
}

/// Run SASL on `stream`, then restart it and bind the resource.
pub async fn authenticate<S>(
    mut stream: XMPPStream<S>,
    username: &str,
    password: &str,
) -> Result<AuthenticatedStream<S>, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offered: HashSet<String> = match stream.stream_features.sasl_mechanisms() {
        Ok(mechanisms) => mechanisms.collect(),
        Err(_) => {
            return Err(ConnectionError::AuthenticationFailed(
                "server offered no SASL mechanisms".to_string(),
            ));
        }
    };
    let Some(selected) = select_mechanism(&offered) else {
        let mut names: Vec<_> = offered.into_iter().collect();
        names.sort();
        return Err(ConnectionError::AuthenticationFailed(format!(
            "nothing usable among offered mechanisms [{}]",
            names.join(", ")
        )));
    };
    debug!(mechanism = %selected, "authenticating");

    let mut mechanism = selected.instantiate(credentials(username, password))?;
    let wire_name = SaslMechanism::from_str(selected.wire_name())
        .map_err(|error| auth_error("unknown mechanism", error))?;
    stream
        .send_stanza(Auth {
            mechanism: wire_name,
            data: mechanism.initial(),
        })
        .await
        .map_err(stream_error("sending auth"))?;

    loop {
        let stanza = next_stanza(&mut stream, "SASL").await?;
        if let Ok(challenge) = Challenge::try_from(stanza.clone()) {
            let data = mechanism
                .response(&challenge.data)
                .map_err(|error| auth_error("challenge rejected", error))?;
            stream
                .send_stanza(Response { data })
                .await
                .map_err(stream_error("sending SASL response"))?;
            continue;
        }
        if let Ok(success) = Success::try_from(stanza.clone()) {
            if let Err(error) = mechanism.success(&success.data) {
                warn!(error = ?error, "server proof did not verify");
                return Err(auth_error("server proof did not verify", error));
            }
            let stream = bind_resource(stream).await?;
            let bound_jid = stream.jid.to_string();
            debug!(jid = %bound_jid, "session bound");
            return Ok(AuthenticatedStream {
                stream: stream.into_inner(),
                bound_jid,
            });
        }
        if let Ok(failure) = Failure::try_from(stanza) {
            return Err(map_failure(&failure));
        }
    }
}
