//! Shared fixtures for end-to-end session tests.
//!
//! Sessions are built exactly as the supervisor builds them, except that
//! stanzas land in a [`RecordingSink`] instead of a socket.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use warden::{RuleStore, Rules, Session, TaskGroup};
use warden_core::config::load_config_from_str;
use warden_xmpp::{ConnectionError, Element, InboundEvent, StanzaSink, ns};

pub const OWN_JID: &str = "warden@example.com/warden";
pub const LOBBY: &str = "lobby@conference.example.com";

pub const CONFIG: &str = r#"
[account]
jid = "warden@example.com"
password = "secret"

[bot]
nick = "warden"
admins = ["admin@example.com"]

[timing]
connection_timeout = 1
server_ping_delay = 60
ping_jitter = 3
ban_delay_ms = 250

[[rooms]]
name = "lobby@conference.example.com"

[rooms.all_caps]
enabled = true
min_length = 10
"#;

pub fn init_test() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
pub struct RecordingSink {
    stanzas: Mutex<Vec<Element>>,
    keepalives: Mutex<usize>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Element> {
        self.stanzas.lock().unwrap().clone()
    }

    pub fn keepalives(&self) -> usize {
        *self.keepalives.lock().unwrap()
    }

    pub fn bans(&self) -> Vec<Element> {
        self.sent().into_iter().filter(is_ban).collect()
    }
}

impl StanzaSink for RecordingSink {
    fn send(&self, stanza: Element) -> Result<(), ConnectionError> {
        self.stanzas.lock().unwrap().push(stanza);
        Ok(())
    }

    fn send_keepalive(&self) -> Result<(), ConnectionError> {
        *self.keepalives.lock().unwrap() += 1;
        Ok(())
    }
}

pub fn session_with_store(config: &str, store: RuleStore) -> (Arc<Session>, Arc<RecordingSink>) {
    init_test();
    let config = load_config_from_str(config).expect("test config");
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(
        Arc::new(config),
        Arc::new(store),
        sink.clone(),
        TaskGroup::new(),
        OWN_JID,
    );
    (Arc::new(session), sink)
}

pub fn session_with(config: &str, rules: Rules) -> (Arc<Session>, Arc<RecordingSink>) {
    session_with_store(config, RuleStore::from_rules(rules))
}

pub fn session(rules: Rules) -> (Arc<Session>, Arc<RecordingSink>) {
    session_with(CONFIG, rules)
}

pub fn rules(whitelist: &str, blacklist: &str) -> Rules {
    Rules::from_json(whitelist, blacklist).expect("rules")
}

pub fn event(xml: &str) -> InboundEvent {
    InboundEvent::from_bytes(xml.as_bytes()).expect("stanza")
}

/// Occupant presence in the lobby as a non-anonymous room sends it.
pub fn occupant_presence(nick: &str, real_jid: &str) -> InboundEvent {
    event(&format!(
        "<presence xmlns='jabber:client' from='{LOBBY}/{nick}' to='{OWN_JID}'>\
         <x xmlns='http://jabber.org/protocol/muc#user'>\
         <item affiliation='none' role='participant' jid='{real_jid}'/></x></presence>"
    ))
}

pub fn own_presence() -> InboundEvent {
    event(&format!(
        "<presence xmlns='jabber:client' from='{LOBBY}/warden' to='{OWN_JID}'>\
         <x xmlns='http://jabber.org/protocol/muc#user'>\
         <item affiliation='member' role='participant' jid='{OWN_JID}'/>\
         <status code='110'/></x></presence>"
    ))
}

pub fn groupchat(nick: &str, body: &str) -> InboundEvent {
    event(&format!(
        "<message xmlns='jabber:client' type='groupchat' from='{LOBBY}/{nick}' to='{OWN_JID}'>\
         <body>{body}</body></message>"
    ))
}

pub fn is_ban(stanza: &Element) -> bool {
    stanza
        .get_child("query", ns::MUC_ADMIN)
        .and_then(|query| query.get_child("item", ns::MUC_ADMIN))
        .is_some_and(|item| item.attr("affiliation") == Some("outcast"))
}

pub fn ban_target(stanza: &Element) -> Option<String> {
    stanza
        .get_child("query", ns::MUC_ADMIN)?
        .get_child("item", ns::MUC_ADMIN)?
        .attr("jid")
        .map(str::to_string)
}

pub fn ban_reason(stanza: &Element) -> Option<String> {
    stanza
        .get_child("query", ns::MUC_ADMIN)?
        .get_child("item", ns::MUC_ADMIN)?
        .get_child("reason", ns::MUC_ADMIN)
        .map(Element::text)
}
