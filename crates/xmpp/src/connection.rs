//! The single I/O task that owns a transport.
//!
//! Every other task writes through a cloneable [`XmppHandle`]; the I/O task
//! drains the handle's channel and interleaves those writes with reads, so
//! writes to the socket never overlap.

use minidom::Element;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::event::InboundEvent;
use crate::stanza::{parse_stanza, serialize_stanza, stream_error_condition};
use crate::transport::XmppTransport;

/// Typed send primitives used by the bot.
pub trait StanzaSink: Send + Sync {
    fn send(&self, stanza: Element) -> Result<(), ConnectionError>;

    /// Whitespace keep-alive.
    fn send_keepalive(&self) -> Result<(), ConnectionError>;
}

#[derive(Debug)]
pub enum Outbound {
    Stanza(Element),
    Keepalive,
    /// Flush what is queued, then close the stream.
    Close,
}

#[derive(Debug, Clone)]
pub struct XmppHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl XmppHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, outbound: Outbound) -> Result<(), ConnectionError> {
        self.tx.send(outbound).map_err(|_| ConnectionError::Closed)
    }
}

impl StanzaSink for XmppHandle {
    fn send(&self, stanza: Element) -> Result<(), ConnectionError> {
        self.push(Outbound::Stanza(stanza))
    }

    fn send_keepalive(&self) -> Result<(), ConnectionError> {
        self.push(Outbound::Keepalive)
    }
}

const KEEPALIVE: &[u8] = b" ";

async fn write<T: XmppTransport>(transport: &mut T, outbound: Outbound) -> Result<bool, ConnectionError> {
    match outbound {
        Outbound::Stanza(element) => {
            let payload = serialize_stanza(&element)?;
            transport.send(&payload).await?;
            Ok(true)
        }
        Outbound::Keepalive => {
            transport.send(KEEPALIVE).await?;
            Ok(true)
        }
        Outbound::Close => Ok(false),
    }
}

/// Decode one frame. Undecodable XML and stream errors end the session;
/// stanzas with inconsistent fields are dropped.
fn decode_frame(frame: &[u8]) -> Result<Option<InboundEvent>, ConnectionError> {
    let element = parse_stanza(frame)?;
    if let Some(condition) = stream_error_condition(&element) {
        return Err(ConnectionError::StreamError(condition));
    }
    match InboundEvent::from_element(element) {
        Ok(event) => Ok(Some(event)),
        Err(error) => {
            warn!(error = %error, "dropping malformed stanza");
            Ok(None)
        }
    }
}

/// Pump the transport until it fails, the peer closes, or `Close` is queued.
///
/// Returns `Ok(())` only for a requested close.
pub async fn run_io<T: XmppTransport>(
    mut transport: T,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
) -> Result<(), ConnectionError> {
    let result = loop {
        tokio::select! {
            frame = transport.recv() => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(error) => break Err(error),
                };
                match decode_frame(&frame) {
                    Ok(Some(event)) => {
                        if inbound.send(event).is_err() {
                            debug!("inbound receiver dropped, stopping I/O");
                            break Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(error) => break Err(error),
                }
            }
            next = outbound.recv() => {
                let Some(next) = next else {
                    break Ok(());
                };
                match write(&mut transport, next).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(error) => break Err(error),
                }
            }
        }
    };

    outbound.close();
    if let Err(error) = transport.close().await {
        debug!(error = %error, "error while closing transport");
    }
    match &result {
        Ok(()) => info!("connection closed"),
        Err(error) => warn!(error = %error, "connection failed"),
    }
    result
}
