//! Namespaces the bot reads or writes.

pub const CLIENT: &str = "jabber:client";
pub const STREAM: &str = "http://etherx.jabber.org/streams";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
pub const PING: &str = "urn:xmpp:ping";
pub const VERSION: &str = "jabber:iq:version";
pub const LAST: &str = "jabber:iq:last";
pub const TIME: &str = "urn:xmpp:time";
pub const CAPS: &str = "http://jabber.org/protocol/caps";
pub const PUBSUB: &str = "http://jabber.org/protocol/pubsub";
pub const PUBSUB_ERRORS: &str = "http://jabber.org/protocol/pubsub#errors";

pub const MUC: &str = "http://jabber.org/protocol/muc";
pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
pub const MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";
pub const MUC_SELF_PING: &str = "http://jabber.org/protocol/muc#self-ping-optimization";

/// Room feature advertising an open room.
pub const MUC_UNSECURED: &str = "muc_unsecured";
/// Room feature advertising a password-protected room.
pub const MUC_PASSWORD_PROTECTED: &str = "muc_passwordprotected";
