pub mod connection;
pub mod error;
pub mod event;
pub mod ns;
pub mod outbound;
pub mod sasl;
pub mod stanza;
pub mod transport;

pub use connection::{Outbound, StanzaSink, XmppHandle, run_io};
pub use error::{ConnectionError, StanzaError};
pub use event::{
    Affiliation, DiscoIdentity, DiscoInfo, InboundEvent, IqEvent, IqKind, MessageEvent,
    MessageKind, MucItem, PresenceEvent, PresenceKind, Role, StanzaErrorInfo,
};
pub use minidom::Element;
pub use sasl::AuthMechanism;
pub use transport::{ConnectionConfig, NativeTcpTransport, XmppTransport};
