//! Inbound event routing.
//!
//! [`dispatch`] is the only entry point. It refreshes activity stamps, updates
//! the session caches and hands moderation-relevant events to the engine.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use warden_core::address;
use warden_xmpp::outbound::{
    build_disco_info_payload, build_iq_error, build_iq_result, build_last_activity_payload,
    build_time_payload, build_version_payload,
};
use warden_xmpp::{
    Affiliation, DiscoInfo, Element, InboundEvent, IqEvent, IqKind, MessageEvent, MessageKind,
    PresenceEvent, PresenceKind, Role, ns,
};

use crate::commands;
use crate::error::SessionError;
use crate::join::rejoin;
use crate::membership::Occupant;
use crate::moderation::{BAN_ID, check_message, check_presence};
use crate::probes::server_address;
use crate::session::{PingTarget, Session};

/// Features announced in our own disco#info reply.
const ADVERTISED_FEATURES: &[&str] = &[
    ns::VERSION,
    ns::TIME,
    ns::PING,
    ns::LAST,
    ns::CAPS,
    ns::DISCO_INFO,
    ns::MUC,
];

/// `muc#user` status code of the bot's own presence.
const SELF_PRESENCE_CODE: u16 = 110;

pub async fn dispatch(session: &Arc<Session>, event: InboundEvent) -> Result<(), SessionError> {
    session.touch(event.from());
    match event {
        InboundEvent::Message(message) => handle_message(session, message).await,
        InboundEvent::Presence(presence) => handle_presence(session, presence).await,
        InboundEvent::Iq(iq) => handle_iq(session, iq),
        InboundEvent::Unknown { name, namespace } => {
            debug!(name = %name, namespace = %namespace, "ignoring unknown stanza");
            Ok(())
        }
    }
}

// IQ

/// One `get` sub-kind: whether it applies, and the reply it produces.
struct GetHandler {
    name: &'static str,
    matches: fn(&Session, &IqEvent) -> bool,
    reply: fn(&Session, &IqEvent) -> Element,
}

/// Tried in order; the first matching entry answers.
const GET_HANDLERS: &[GetHandler] = &[
    GetHandler {
        name: "version",
        matches: is_version,
        reply: version_reply,
    },
    GetHandler {
        name: "ping",
        matches: is_server_ping,
        reply: pong,
    },
    GetHandler {
        name: "last activity",
        matches: is_last_activity,
        reply: last_activity_reply,
    },
    GetHandler {
        name: "disco#info",
        matches: is_disco_info,
        reply: disco_info_reply,
    },
    GetHandler {
        name: "disco#items",
        matches: is_disco_items,
        reply: disco_items_reply,
    },
    GetHandler {
        name: "time",
        matches: is_time,
        reply: time_reply,
    },
    GetHandler {
        name: "pubsub",
        matches: is_pubsub,
        reply: pubsub_reply,
    },
    GetHandler {
        name: "self-ping",
        matches: is_self_ping,
        reply: self_ping_reply,
    },
];

fn is_version(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("query", ns::VERSION)
}

fn version_reply(_: &Session, iq: &IqEvent) -> Element {
    let payload = build_version_payload(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
    );
    build_iq_result(iq, Some(payload))
}

fn is_server_ping(session: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("ping", ns::PING) && !from_joined_occupant(session, iq)
}

fn pong(_: &Session, iq: &IqEvent) -> Element {
    build_iq_result(iq, None)
}

fn is_last_activity(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("query", ns::LAST)
}

fn last_activity_reply(session: &Session, iq: &IqEvent) -> Element {
    build_iq_result(iq, Some(build_last_activity_payload(session.idle_seconds())))
}

fn is_disco_info(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("query", ns::DISCO_INFO)
}

fn disco_info_reply(_: &Session, iq: &IqEvent) -> Element {
    let payload =
        build_disco_info_payload("client", "bot", env!("CARGO_PKG_NAME"), ADVERTISED_FEATURES);
    build_iq_result(iq, Some(payload))
}

fn is_disco_items(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("query", ns::DISCO_ITEMS)
}

fn disco_items_reply(_: &Session, iq: &IqEvent) -> Element {
    build_iq_error(iq, "cancel", "service-unavailable", None)
}

fn is_time(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("time", ns::TIME)
}

fn time_reply(_: &Session, iq: &IqEvent) -> Element {
    build_iq_result(iq, Some(build_time_payload(Utc::now())))
}

fn is_pubsub(_: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("pubsub", ns::PUBSUB)
}

fn pubsub_reply(_: &Session, iq: &IqEvent) -> Element {
    let unsupported = Element::builder("unsupported", ns::PUBSUB_ERRORS)
        .attr("feature", "subscribe")
        .build();
    build_iq_error(iq, "cancel", "feature-not-implemented", Some(unsupported))
}

/// XEP-0410: an occupant of a joined room pinging us through the room.
fn is_self_ping(session: &Session, iq: &IqEvent) -> bool {
    iq.payload_is("ping", ns::PING) && from_joined_occupant(session, iq)
}

fn self_ping_reply(session: &Session, iq: &IqEvent) -> Element {
    if let Some(from) = iq.from.as_deref() {
        session.touch_room(address::bare(from));
    }
    build_iq_result(iq, None)
}

fn from_joined_occupant(session: &Session, iq: &IqEvent) -> bool {
    iq.from
        .as_deref()
        .and_then(address::occupant)
        .is_some_and(|(room, _)| session.is_joined(room))
}

fn handle_iq(session: &Arc<Session>, iq: IqEvent) -> Result<(), SessionError> {
    if iq.id.is_empty() {
        debug!(from = ?iq.from, kind = iq.kind.as_str(), "dropping iq without id");
        return Ok(());
    }
    match iq.kind {
        IqKind::Get => handle_get(session, &iq),
        IqKind::Set => {
            debug!(from = ?iq.from, payload = ?iq.payload_ns(), "refusing iq set");
            session.send(build_iq_error(&iq, "cancel", "feature-not-implemented", None))?;
            Ok(())
        }
        IqKind::Result => {
            handle_result(session, &iq);
            Ok(())
        }
        IqKind::Error => {
            handle_error(session, &iq);
            Ok(())
        }
    }
}

fn handle_get(session: &Session, iq: &IqEvent) -> Result<(), SessionError> {
    let Some(handler) = GET_HANDLERS
        .iter()
        .find(|handler| (handler.matches)(session, iq))
    else {
        info!(from = ?iq.from, payload = ?iq.payload_ns(), "unhandled iq get");
        return Ok(());
    };
    debug!(from = ?iq.from, id = %iq.id, handler = handler.name, "answering iq get");
    session.send((handler.reply)(session, iq))?;
    Ok(())
}

fn handle_result(session: &Session, iq: &IqEvent) {
    match session.take_ping(&iq.id) {
        Some(PingTarget::Server) => {
            debug!(id = %iq.id, "server pong");
            session.record_server_pong();
            return;
        }
        Some(PingTarget::Room(room)) => {
            debug!(room = %room, id = %iq.id, "room pong");
            session.touch_room(&room);
            return;
        }
        None => {}
    }

    let from = iq.from.as_deref().unwrap_or_default();
    if iq.id == BAN_ID {
        let room = address::bare(from);
        if session.is_joined(room) {
            info!(room = %room, "ban confirmed");
        } else {
            warn!(room = %room, "ban confirmation from a room we are not in");
        }
        return;
    }
    if let Some(info) = iq.disco_info() {
        record_disco_info(session, from, &info);
        return;
    }
    if iq.payload.is_none() && session.is_joined(address::bare(from)) {
        debug!(from = %from, "room pong");
        session.touch_room(address::bare(from));
        return;
    }
    debug!(from = %from, id = %iq.id, payload = ?iq.payload_ns(), "unmatched iq result");
}

fn record_disco_info(session: &Session, from: &str, info: &DiscoInfo) {
    if info.has_category("server") {
        for feature in &info.features {
            session.set_server_feature(feature, true);
        }
        session.mark_server_queried();
        info!(
            server = %from,
            features = info.features.len(),
            ping = info.has_feature(ns::PING),
            "server features discovered"
        );
    } else if info.has_category("conference") {
        let features: HashSet<String> = info.features.iter().cloned().collect();
        debug!(room = %from, features = features.len(), "room features discovered");
        session.set_room_features(address::bare(from), features);
    } else {
        let categories: Vec<&str> = info
            .identities
            .iter()
            .map(|identity| identity.category.as_str())
            .collect();
        debug!(from = %from, ?categories, "ignoring disco#info result");
    }
}

fn handle_error(session: &Arc<Session>, iq: &IqEvent) {
    let from = iq.from.as_deref().unwrap_or_default();
    let condition = iq
        .error
        .as_ref()
        .map_or("undefined-condition", |error| error.condition.as_str());

    match session.take_ping(&iq.id) {
        Some(PingTarget::Server) => {
            info!(server = %from, condition = %condition, "server rejected ping, falling back to keep-alive");
            session.set_server_feature(ns::PING, false);
            return;
        }
        Some(PingTarget::Room(room)) => {
            if condition == "not-acceptable" {
                schedule_rejoin(session, &room);
            } else {
                // Any other error still comes from the room we sit in.
                debug!(room = %room, condition = %condition, "room pong with error");
                session.touch_room(&room);
            }
            return;
        }
        None => {}
    }

    if iq.payload_is("ping", ns::PING) && address::canonical(from) == server_address(session) {
        info!(server = %from, condition = %condition, "server does not support ping");
        session.set_server_feature(ns::PING, false);
        return;
    }
    if condition == "not-acceptable" {
        if let Some((room, nick)) = address::occupant(from) {
            if nick == session.nick_for(room) && session.is_joined(room) {
                schedule_rejoin(session, room);
                return;
            }
        }
    }
    info!(
        from = %from,
        id = %iq.id,
        condition = %condition,
        text = ?iq.error.as_ref().and_then(|error| error.text.as_deref()),
        "iq error"
    );
}

fn schedule_rejoin(session: &Arc<Session>, room: &str) {
    if !session.is_joined(room) {
        return;
    }
    warn!(room = %room, "no longer an occupant, rejoining");
    session.mark_left(room);
    session
        .tasks()
        .spawn_scoped("rejoin", rejoin(Arc::clone(session), address::canonical(room)));
}

// Presence

async fn handle_presence(session: &Session, presence: PresenceEvent) -> Result<(), SessionError> {
    let Some(from) = presence.from.clone() else {
        debug!("presence without sender");
        return Ok(());
    };
    let Some((room, nick)) = address::occupant(&from) else {
        debug!(from = %from, "presence not from an occupant address");
        return Ok(());
    };
    if session.config().room(room).is_none() && !session.is_joined(room) {
        debug!(from = %from, "presence from outside our rooms");
        return Ok(());
    }

    if presence.kind == PresenceKind::Error {
        let error = presence.error.as_ref();
        warn!(
            room = %room,
            nick = %nick,
            condition = ?error.map(|error| error.condition.as_str()),
            text = ?error.and_then(|error| error.text.as_deref()),
            "presence error"
        );
        return Ok(());
    }

    let own = nick == session.nick_for(room) || presence.has_status_code(SELF_PRESENCE_CODE);
    if own {
        if presence.kind == PresenceKind::Unavailable {
            if session.is_joined(room) {
                warn!(room = %room, "left room");
            }
            session.mark_left(room);
        } else if (presence.show.is_none() && presence.status.is_none())
            || presence.has_status_code(SELF_PRESENCE_CODE)
        {
            if session.mark_joined(room) {
                debug!(room = %room, "own presence echoed");
            }
        }
        return Ok(());
    }

    let departed = presence.kind == PresenceKind::Unavailable
        || presence.muc.as_ref().is_some_and(|item| item.role == Role::None);
    if departed {
        session.remove_occupant(room, &from);
        return Ok(());
    }

    let occupant = Occupant::from_presence(&from, nick, &presence);
    let affiliation = occupant.affiliation;
    session.upsert_occupant(room, occupant);

    if session.is_joined(room) && affiliation != Affiliation::Outcast {
        if let Err(error) = check_presence(session, &presence).await {
            warn!(room = %room, nick = %nick, error = %error, "enforcement failed");
        }
    }
    Ok(())
}

// Messages

async fn handle_message(session: &Session, message: MessageEvent) -> Result<(), SessionError> {
    if message.kind == MessageKind::Error {
        let error = message.error.as_ref();
        warn!(
            from = ?message.from,
            condition = ?error.map(|error| error.condition.as_str()),
            text = ?error.and_then(|error| error.text.as_deref()),
            "message error"
        );
        return Ok(());
    }
    if message.body.as_deref().is_none_or(|body| body.trim().is_empty()) {
        return Ok(());
    }
    let from = message.from.as_deref().unwrap_or_default();

    if message.kind == MessageKind::Groupchat {
        match address::occupant(from) {
            Some((room, nick)) if nick == session.nick_for(room) => return Ok(()),
            Some(_) => {}
            // Subject changes and room notices come from the bare room.
            None => return Ok(()),
        }
    }

    session.touch_chat();
    if commands::handle(session, &message)? {
        return Ok(());
    }

    if message.kind == MessageKind::Groupchat {
        if let Err(error) = check_message(session, &message).await {
            warn!(from = %from, error = %error, "enforcement failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;
    use warden_xmpp::outbound::build_iq_stanza;
    use warden_xmpp::{MucItem, StanzaErrorInfo};

    use super::*;
    use crate::moderation::Rules;
    use crate::session::testing::{LOBBY, OWN_JID, session};

    fn get(from: &str, payload: Element) -> InboundEvent {
        iq(IqKind::Get, "q1", from, Some(payload))
    }

    fn iq(kind: IqKind, id: &str, from: &str, payload: Option<Element>) -> InboundEvent {
        let mut stanza = build_iq_stanza(kind, id, None, payload);
        stanza.set_attr("from", from);
        stanza.set_attr("to", OWN_JID);
        InboundEvent::from_element(stanza).expect("iq")
    }

    fn query(namespace: &str) -> Element {
        Element::builder("query", namespace).build()
    }

    fn ping() -> Element {
        Element::builder("ping", ns::PING).build()
    }

    fn error_iq(id: &str, from: &str, condition: &str, payload: Option<Element>) -> InboundEvent {
        InboundEvent::Iq(IqEvent {
            from: Some(from.to_string()),
            to: Some(OWN_JID.to_string()),
            id: id.to_string(),
            kind: IqKind::Error,
            payload,
            error: Some(StanzaErrorInfo {
                error_type: "cancel".into(),
                condition: condition.into(),
                text: None,
            }),
        })
    }

    fn occupant_presence(nick: &str, identity: Option<&str>, role: Role) -> InboundEvent {
        InboundEvent::Presence(PresenceEvent {
            from: Some(address::occupant_address(LOBBY, nick)),
            to: Some(OWN_JID.to_string()),
            kind: PresenceKind::Available,
            show: None,
            status: None,
            muc: Some(MucItem {
                affiliation: Affiliation::None,
                role,
                jid: identity.map(str::to_string),
                nick: None,
            }),
            status_codes: Vec::new(),
            error: None,
        })
    }

    fn own_presence() -> InboundEvent {
        let InboundEvent::Presence(mut presence) =
            occupant_presence("warden", Some(OWN_JID), Role::Participant)
        else {
            unreachable!()
        };
        presence.status_codes.push(110);
        InboundEvent::Presence(presence)
    }

    fn groupchat(nick: &str, body: &str) -> InboundEvent {
        InboundEvent::Message(MessageEvent {
            from: Some(address::occupant_address(LOBBY, nick)),
            to: Some(OWN_JID.to_string()),
            id: None,
            kind: MessageKind::Groupchat,
            body: Some(body.to_string()),
            error: None,
        })
    }

    fn spammer_rules() -> Rules {
        Rules::from_json("{}", r#"{"blacklist": [{"identity_re": ["^spammer@"]}]}"#).expect("rules")
    }

    fn is_ban(stanza: &Element) -> bool {
        stanza.attr("id") == Some(BAN_ID) && stanza.get_child("query", ns::MUC_ADMIN).is_some()
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn get_handlers_answer_in_order() {
        let (session, sink) = session(Rules::default());
        for payload in [query(ns::VERSION), ping(), query(ns::LAST), query(ns::DISCO_INFO)] {
            dispatch(&session, get("someone@example.com/x", payload)).await.expect("dispatch");
        }
        let sent = sink.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent.iter().all(|stanza| stanza.attr("type") == Some("result")));
        assert!(sent[0].get_child("query", ns::VERSION).is_some());
        assert!(sent[1].children().next().is_none());
        assert!(sent[2].get_child("query", ns::LAST).is_some());
        let disco = DiscoInfo::from_query(sent[3].get_child("query", ns::DISCO_INFO).expect("query"));
        assert!(disco.has_feature(ns::MUC));
        assert!(disco.has_feature(ns::TIME));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unsupported_gets_get_errors() {
        let (session, sink) = session(Rules::default());
        dispatch(&session, get("a@example.com/x", query(ns::DISCO_ITEMS))).await.expect("items");
        dispatch(&session, get("a@example.com/x", Element::builder("pubsub", ns::PUBSUB).build()))
            .await
            .expect("pubsub");

        let sent = sink.sent();
        let items_error = sent[0].get_child("error", ns::CLIENT).expect("error");
        assert!(items_error.get_child("service-unavailable", ns::STANZAS).is_some());
        let pubsub_error = sent[1].get_child("error", ns::CLIENT).expect("error");
        assert!(pubsub_error.get_child("feature-not-implemented", ns::STANZAS).is_some());
        assert_eq!(
            pubsub_error
                .get_child("unsupported", ns::PUBSUB_ERRORS)
                .and_then(|unsupported| unsupported.attr("feature")),
            Some("subscribe")
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn self_ping_from_a_joined_room_is_answered() {
        let (session, sink) = session(Rules::default());
        session.mark_joined(LOBBY);
        dispatch(&session, get("lobby@conference.example.com/warden", ping()))
            .await
            .expect("dispatch");
        assert_eq!(sink.sent()[0].attr("type"), Some("result"));
        assert!(session.room_activity(LOBBY).is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn sets_are_refused_and_idless_iqs_dropped() {
        let (session, sink) = session(Rules::default());
        dispatch(&session, iq(IqKind::Set, "s1", "a@example.com/x", Some(query(ns::VERSION))))
            .await
            .expect("set");
        dispatch(&session, iq(IqKind::Get, "", "a@example.com/x", Some(query(ns::VERSION))))
            .await
            .expect("no id");

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attr("type"), Some("error"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn server_disco_and_pong_update_the_session() {
        let (session, _sink) = session(Rules::default());
        let payload = build_disco_info_payload("server", "im", "example", &[ns::PING]);
        dispatch(&session, iq(IqKind::Result, "d1", "example.com", Some(payload)))
            .await
            .expect("disco");
        assert!(session.server_queried());
        assert!(session.server_supports(ns::PING));

        session.record_server_ping("p1");
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        dispatch(&session, iq(IqKind::Result, "p1", "example.com", None))
            .await
            .expect("pong");
        let stamps = session.server_ping();
        assert!(stamps.received > stamps.sent);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn room_disco_replaces_room_features() {
        let (session, _sink) = session(Rules::default());
        let payload =
            build_disco_info_payload("conference", "text", "Lobby", &[ns::MUC, ns::MUC_UNSECURED]);
        dispatch(&session, iq(IqKind::Result, "d2", LOBBY, Some(payload)))
            .await
            .expect("disco");
        assert!(session.room_supports(LOBBY, ns::MUC_UNSECURED));
        assert!(!session.server_queried());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn ping_errors_downgrade_the_server() {
        let (session, _sink) = session(Rules::default());
        session.set_server_feature(ns::PING, true);
        session.record_server_ping("p1");
        dispatch(&session, error_iq("p1", "example.com", "service-unavailable", None))
            .await
            .expect("error");
        assert!(!session.server_supports(ns::PING));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn not_acceptable_from_own_occupant_rejoins() {
        let (session, sink) = session(Rules::default());
        session.mark_joined(LOBBY);
        dispatch(
            &session,
            error_iq("x1", "lobby@conference.example.com/warden", "not-acceptable", None),
        )
        .await
        .expect("error");
        assert!(!session.is_joined(LOBBY));

        let delay = session.config().timing.room_rejoin_delay();
        tokio::time::sleep(delay + std::time::Duration::from_millis(10)).await;
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].get_child("x", ns::MUC).is_some());
        session.tasks().shutdown().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn own_presence_marks_the_room_joined() {
        let (session, _sink) = session(Rules::default());
        dispatch(&session, own_presence()).await.expect("presence");
        assert!(session.is_joined(LOBBY));
        assert!(session.roster(LOBBY).is_none());

        let InboundEvent::Presence(mut leave) = own_presence() else {
            unreachable!()
        };
        leave.kind = PresenceKind::Unavailable;
        dispatch(&session, InboundEvent::Presence(leave)).await.expect("leave");
        assert!(!session.is_joined(LOBBY));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn presences_before_join_are_cached_not_enforced() {
        let (session, sink) = session(spammer_rules());
        dispatch(&session, occupant_presence("Bob", Some("spammer@evil.example/x"), Role::Participant))
            .await
            .expect("presence");
        assert!(sink.sent().is_empty());
        assert_eq!(session.roster(LOBBY).expect("roster").len(), 1);

        dispatch(&session, occupant_presence("Bob", None, Role::None))
            .await
            .expect("departure");
        assert!(session.roster(LOBBY).expect("roster").is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn blacklisted_occupants_are_banned_once_joined() {
        let (session, sink) = session(spammer_rules());
        session.mark_joined(LOBBY);
        dispatch(&session, occupant_presence("Bob", Some("spammer@evil.example/x"), Role::Participant))
            .await
            .expect("presence");
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(is_ban(&sent[0]));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn own_groupchat_echo_is_discarded() {
        let (session, sink) = session(Rules::default());
        session.mark_joined(LOBBY);
        dispatch(&session, groupchat("warden", "THIS IS ALL CAPS")).await.expect("echo");
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shouting_occupants_are_banned() {
        let (session, sink) = session(Rules::default());
        session.mark_joined(LOBBY);
        dispatch(&session, occupant_presence("Loud", Some("loud@example.com/x"), Role::Participant))
            .await
            .expect("presence");
        dispatch(&session, groupchat("Loud", "THIS IS ALL CAPS")).await.expect("message");

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(is_ban(&sent[0]));
    }

    #[traced_test]
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unknown_gets_are_logged_and_dropped() {
        let (session, sink) = session(Rules::default());
        dispatch(&session, get("a@example.com/x", query("urn:example:unknown")))
            .await
            .expect("dispatch");
        assert!(sink.sent().is_empty());
        assert!(logs_contain("unhandled iq get"));
    }
}
