//! Moderation decisions and enforcement.
//!
//! Deciding is pure ([`presence_verdict`], [`phrase_verdict`]); enforcing
//! ([`squash`]) talks to the session.

use chrono::Local;
use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};
use warden_core::{address, text};
use warden_xmpp::outbound::{build_affiliation_stanza, build_message_stanza};
use warden_xmpp::{MessageEvent, MessageKind, PresenceEvent};

use crate::error::EnforcementError;
use crate::moderation::rules::Rules;
use crate::session::Session;

/// Correlation id of every ban request.
pub const BAN_ID: &str = "ban1";

/// What made a rule fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Identity(String),
    Nick(String),
    Phrase(String),
    AllCaps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Canonical identity to ban.
    pub target: String,
    pub reason_enable: bool,
    pub trigger: Trigger,
}

/// First blacklist rule matching an occupant, unless it is whitelisted.
pub fn presence_verdict(rules: &Rules, room: &str, identity: &str, nick: &str) -> Option<Verdict> {
    if rules.is_whitelisted(room, identity) {
        debug!(room = %room, identity = %identity, "whitelisted");
        return None;
    }
    rules.blacklist_for(room).find_map(|rule| {
        let trigger = if let Some(re) = rule.identity.iter().find(|re| re.is_match(identity)) {
            Trigger::Identity(re.as_str().to_string())
        } else if let Some(re) = rule.nick.iter().find(|re| re.is_match(nick)) {
            Trigger::Nick(re.as_str().to_string())
        } else {
            return None;
        };
        Some(Verdict {
            target: identity.to_string(),
            reason_enable: rule.reason_enable,
            trigger,
        })
    })
}

/// First phrase rule matching `body`, as `(reason_enable, pattern)`.
pub fn phrase_verdict(rules: &Rules, room: &str, body: &str) -> Option<(bool, String)> {
    rules.blacklist_for(room).find_map(|rule| {
        rule.match_phrase(body)
            .map(|re| (rule.reason_enable, re.as_str().to_string()))
    })
}

pub async fn check_presence(
    session: &Session,
    presence: &PresenceEvent,
) -> Result<Option<Verdict>, EnforcementError> {
    let Some(identity) = presence
        .muc
        .as_ref()
        .and_then(|item| item.jid.as_deref())
        .map(address::canonical)
    else {
        return Ok(None);
    };
    if session.is_self(&identity) {
        return Ok(None);
    }
    let Some((room, nick)) = presence.from.as_deref().and_then(address::occupant) else {
        info!(from = ?presence.from, "presence without a room, skipping check");
        return Ok(None);
    };

    let rules = session.rules().current();
    let Some(verdict) = presence_verdict(&rules, room, &identity, nick) else {
        return Ok(None);
    };
    warn!(
        room = %room,
        nick = %nick,
        identity = %identity,
        trigger = ?verdict.trigger,
        "hammer falls: occupant matches blacklist"
    );
    squash(session, room, &verdict.target, verdict.reason_enable).await?;
    Ok(Some(verdict))
}

pub async fn check_message(
    session: &Session,
    message: &MessageEvent,
) -> Result<Option<Verdict>, EnforcementError> {
    let (Some(from), Some(body)) = (message.from.as_deref(), message.body.as_deref()) else {
        return Ok(None);
    };
    let Some((room, nick)) = address::occupant(from) else {
        return Ok(None);
    };
    if !session.is_joined(room) {
        return Ok(None);
    }

    let identity = session.resolve_identity(from);
    if let Some(identity) = identity.as_deref() {
        if session.is_self(identity) {
            return Ok(None);
        }
    }

    let rules = session.rules().current();
    if let Some(identity) = identity.as_deref() {
        if rules.is_whitelisted(room, identity) {
            debug!(room = %room, identity = %identity, "whitelisted");
            return Ok(None);
        }
    }

    let verdict = if let Some((reason_enable, pattern)) = phrase_verdict(&rules, room, body) {
        Some((reason_enable, Trigger::Phrase(pattern)))
    } else {
        session
            .config()
            .room(room)
            .filter(|config| config.all_caps.enabled)
            .filter(|config| text::is_all_caps(body, config.all_caps.min_length))
            .map(|_| (false, Trigger::AllCaps))
    };
    let Some((reason_enable, trigger)) = verdict else {
        return Ok(None);
    };

    let Some(target) = identity else {
        warn!(
            room = %room,
            nick = %nick,
            trigger = ?trigger,
            "message matches but the sender's identity is unknown, not banning"
        );
        return Ok(None);
    };
    warn!(room = %room, nick = %nick, identity = %target, trigger = ?trigger, "hammer falls: message matches");
    squash(session, room, &target, reason_enable).await?;
    Ok(Some(Verdict {
        target,
        reason_enable,
        trigger,
    }))
}

fn autoban_reason() -> String {
    format!("autoban at {}", Local::now().format("%Y.%m.%d %H:%M:%S"))
}

/// Ban `target` from `room`: announce, wait for the settling delay, then send
/// the outcast request.
pub async fn squash(
    session: &Session,
    room: &str,
    target: &str,
    reason_enable: bool,
) -> Result<(), EnforcementError> {
    if session.is_self(target) {
        warn!(room = %room, "refusing to ban own identity");
        return Ok(());
    }

    let bot = &session.config().bot;
    if bot.ban_phrases_enabled {
        let phrase = bot.ban_phrases.choose(&mut rand::rng()).cloned();
        if let Some(phrase) = phrase {
            session
                .send(build_message_stanza(room, MessageKind::Groupchat, &phrase))
                .map_err(|source| EnforcementError::Announce {
                    room: room.to_string(),
                    target: target.to_string(),
                    source,
                })?;
        }
    }

    let reason = reason_enable.then(autoban_reason);
    let request = build_affiliation_stanza(BAN_ID, room, target, "outcast", reason.as_deref());

    let delay = session.config().timing.ban_delay();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    session
        .send(request)
        .map_err(|source| EnforcementError::Ban {
            room: room.to_string(),
            target: target.to_string(),
            id: BAN_ID,
            source,
        })?;
    info!(room = %room, target = %target, "ban request sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use warden_xmpp::{Affiliation, Element, MucItem, PresenceKind, Role, ns};

    use super::*;
    use crate::membership::Occupant;
    use crate::session::testing::{LOBBY, session, session_with};

    const BLACKLIST: &str = r#"{"blacklist": [
        {"room": "lobby@conference.example.com", "reason_enable": true, "identity_re": ["^spammer@.*"]},
        {"room": "", "nick_re": ["^Bot"], "phrase_re": ["buy now"]}
    ]}"#;

    fn rules(whitelist: &str) -> Rules {
        Rules::from_json(whitelist, BLACKLIST).expect("rules")
    }

    fn presence(from: &str, jid: &str) -> PresenceEvent {
        PresenceEvent {
            from: Some(from.to_string()),
            to: None,
            kind: PresenceKind::Available,
            show: None,
            status: None,
            muc: Some(MucItem {
                affiliation: Affiliation::None,
                role: Role::Participant,
                jid: Some(jid.to_string()),
                nick: None,
            }),
            status_codes: Vec::new(),
            error: None,
        }
    }

    fn groupchat(from: &str, body: &str) -> MessageEvent {
        MessageEvent {
            from: Some(from.to_string()),
            to: None,
            id: None,
            kind: MessageKind::Groupchat,
            body: Some(body.to_string()),
            error: None,
        }
    }

    fn ban_item(stanza: &Element) -> Option<&Element> {
        stanza
            .get_child("query", ns::MUC_ADMIN)
            .and_then(|query| query.get_child("item", ns::MUC_ADMIN))
    }

    fn seat(session: &Session, nick: &str, identity: &str) -> String {
        let address = address::occupant_address(LOBBY, nick);
        session.upsert_occupant(
            LOBBY,
            Occupant {
                address: address.clone(),
                nick: nick.to_string(),
                role: Role::Participant,
                affiliation: Affiliation::None,
                identity: Some(identity.to_string()),
            },
        );
        address
    }

    #[test]
    fn global_rules_win_over_room_rules() {
        let rules = Rules::from_json(
            "{}",
            r#"{"blacklist": [
                {"room": "lobby@conference.example.com", "reason_enable": false, "identity_re": ["^spammer@"]},
                {"room": "", "reason_enable": true, "identity_re": ["@evil\\.example$"]}
            ]}"#,
        )
        .expect("rules");
        let verdict = presence_verdict(&rules, LOBBY, "spammer@evil.example", "Bob").expect("match");
        assert!(verdict.reason_enable);
        assert_eq!(verdict.trigger, Trigger::Identity("@evil\\.example$".into()));
    }

    #[test]
    fn whitelist_beats_every_rule() {
        let rules = rules(r#"{"whitelist": [{"room": "lobby@conference.example.com", "identities": ["spammer@evil.example"]}]}"#);
        assert_eq!(presence_verdict(&rules, LOBBY, "spammer@evil.example", "Bot"), None);
        assert!(presence_verdict(&rules, "dev@conference.example.com", "spammer@evil.example", "Bot").is_some());
    }

    #[test]
    fn nick_patterns_apply_to_the_nick_only() {
        let rules = rules("{}");
        let verdict = presence_verdict(&rules, LOBBY, "someone@example.com", "Botnet").expect("match");
        assert_eq!(verdict.trigger, Trigger::Nick("^Bot".into()));
        assert_eq!(verdict.target, "someone@example.com");
        assert!(presence_verdict(&rules, LOBBY, "bot@example.com", "harmless").is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn presence_match_bans_the_bare_identity_with_reason() {
        let (session, sink) = session(rules("{}"));
        let verdict = check_presence(
            &session,
            &presence("lobby@conference.example.com/Bob", "Spammer@Evil.example/bot"),
        )
        .await
        .expect("enforced");
        assert!(verdict.is_some());

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attr("id"), Some(BAN_ID));
        let item = ban_item(&sent[0]).expect("ban item");
        assert_eq!(item.attr("jid"), Some("spammer@evil.example"));
        let reason = item.get_child("reason", ns::MUC_ADMIN).expect("reason").text();
        assert!(reason.starts_with("autoban at "));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn own_presence_is_never_checked() {
        let (session, sink) = session(Rules::from_json("{}", r#"{"blacklist": [{"identity_re": ["warden"]}]}"#).expect("rules"));
        let verdict = check_presence(&session, &presence("lobby@conference.example.com/warden", "warden@example.com/warden"))
            .await
            .expect("no error");
        assert_eq!(verdict, None);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn phrase_match_resolves_the_sender() {
        let (session, sink) = session(rules("{}"));
        session.mark_joined(LOBBY);
        let from = seat(&session, "Eve", "eve@example.com");

        let verdict = check_message(&session, &groupchat(&from, "please buy now"))
            .await
            .expect("enforced")
            .expect("verdict");
        assert_eq!(verdict.target, "eve@example.com");
        assert_eq!(verdict.trigger, Trigger::Phrase("buy now".into()));
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn messages_in_rooms_not_joined_are_ignored() {
        let (session, sink) = session(rules("{}"));
        let from = seat(&session, "Eve", "eve@example.com");
        let verdict = check_message(&session, &groupchat(&from, "buy now")).await.expect("no error");
        assert_eq!(verdict, None);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unknown_sender_is_not_banned() {
        let (session, sink) = session(rules("{}"));
        session.mark_joined(LOBBY);
        let verdict = check_message(&session, &groupchat("lobby@conference.example.com/Ghost", "buy now"))
            .await
            .expect("no error");
        assert_eq!(verdict, None);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn whitelisted_sender_may_say_anything() {
        let (session, sink) = session(rules(r#"{"whitelist": [{"identities": ["eve@example.com"]}]}"#));
        session.mark_joined(LOBBY);
        let from = seat(&session, "Eve", "eve@example.com");
        let verdict = check_message(&session, &groupchat(&from, "BUY NOW BUY NOW")).await.expect("no error");
        assert_eq!(verdict, None);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn all_caps_bans_without_reason() {
        let (session, sink) = session(Rules::from_json(
            "{}",
            r#"{"blacklist": [{"reason_enable": true, "phrase_re": ["never matches this"]}]}"#,
        )
        .expect("rules"));
        session.mark_joined(LOBBY);
        let from = seat(&session, "Loud", "loud@example.com");

        let verdict = check_message(&session, &groupchat(&from, "THIS IS ALL CAPS"))
            .await
            .expect("enforced")
            .expect("verdict");
        assert_eq!(verdict.trigger, Trigger::AllCaps);
        assert!(!verdict.reason_enable);
        let sent = sink.sent();
        let item = ban_item(&sent[0]).expect("ban item");
        assert!(item.get_child("reason", ns::MUC_ADMIN).is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn all_caps_one_below_minimum_is_allowed() {
        let (session, sink) = session(Rules::default());
        session.mark_joined(LOBBY);
        let from = seat(&session, "Loud", "loud@example.com");

        // Nine characters once punctuation and spaces are removed.
        let verdict = check_message(&session, &groupchat(&from, "ABC, DEF! GHI"))
            .await
            .expect("no error");
        assert_eq!(verdict, None);
        assert!(sink.sent().is_empty());
    }

    const ANNOUNCING: &str = r#"
[account]
jid = "warden@example.com"
password = "secret"

[bot]
ban_phrases_enabled = true
ban_phrases = ["Bye."]

[timing]
ban_delay_ms = 500

[[rooms]]
name = "lobby@conference.example.com"
"#;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn squash_announces_then_waits_before_banning() {
        let (session, sink) = session_with(ANNOUNCING, Rules::default());
        let started = tokio::time::Instant::now();

        squash(&session, LOBBY, "spammer@evil.example", false)
            .await
            .expect("squashed");

        assert!(started.elapsed() >= Duration::from_millis(500));
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].is("message", ns::CLIENT));
        assert_eq!(sent[0].attr("type"), Some("groupchat"));
        assert!(ban_item(&sent[1]).is_some());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_announcement_aborts_the_ban() {
        let (session, sink) = session_with(ANNOUNCING, Rules::default());
        sink.fail.store(true, Ordering::SeqCst);
        assert_matches!(
            squash(&session, LOBBY, "spammer@evil.example", false).await,
            Err(EnforcementError::Announce { .. })
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_ban_reports_the_correlation_id() {
        let (session, sink) = session(Rules::default());
        sink.fail.store(true, Ordering::SeqCst);
        assert_matches!(
            squash(&session, LOBBY, "spammer@evil.example", true).await,
            Err(EnforcementError::Ban { id: BAN_ID, .. })
        );
    }
}
