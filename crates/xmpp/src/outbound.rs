//! Builders for every stanza the bot sends.

use chrono::{DateTime, SecondsFormat, Utc};
use minidom::Element;
use uuid::Uuid;

use crate::event::{IqEvent, IqKind, MessageKind};
use crate::ns;

/// Fresh correlation id for an outgoing request.
pub fn next_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn build_message_stanza(to: &str, kind: MessageKind, body: &str) -> Element {
    let kind = match kind {
        MessageKind::Chat => "chat",
        MessageKind::Groupchat => "groupchat",
        MessageKind::Headline => "headline",
        MessageKind::Normal => "normal",
        MessageKind::Error => "error",
    };
    Element::builder("message", ns::CLIENT)
        .attr("to", to)
        .attr("type", kind)
        .attr("id", next_id())
        .append(
            Element::builder("body", ns::CLIENT)
                .append(body.to_string())
                .build(),
        )
        .build()
}

/// Presence broadcast, or directed when `to` is set.
pub fn build_presence_stanza(to: Option<&str>, show: Option<&str>, status: Option<&str>) -> Element {
    let mut builder = Element::builder("presence", ns::CLIENT);
    if let Some(to) = to {
        builder = builder.attr("to", to);
    }
    if let Some(show) = show {
        builder = builder.append(Element::builder("show", ns::CLIENT).append(show.to_string()).build());
    }
    if let Some(status) = status.filter(|status| !status.is_empty()) {
        builder = builder.append(
            Element::builder("status", ns::CLIENT)
                .append(status.to_string())
                .build(),
        );
    }
    builder.build()
}

/// Room join without history replay.
pub fn build_muc_join_stanza(room: &str, nick: &str, password: Option<&str>) -> Element {
    let mut muc = Element::builder("x", ns::MUC).append(
        Element::builder("history", ns::MUC)
            .attr("maxchars", "0")
            .build(),
    );
    if let Some(password) = password {
        muc = muc.append(
            Element::builder("password", ns::MUC)
                .append(password.to_string())
                .build(),
        );
    }
    Element::builder("presence", ns::CLIENT)
        .attr("to", format!("{room}/{nick}"))
        .append(muc.build())
        .build()
}

pub fn build_muc_leave_stanza(room: &str, nick: &str) -> Element {
    Element::builder("presence", ns::CLIENT)
        .attr("to", format!("{room}/{nick}"))
        .attr("type", "unavailable")
        .build()
}

/// Raw addressed query with an optional payload.
pub fn build_iq_stanza(kind: IqKind, id: &str, to: Option<&str>, payload: Option<Element>) -> Element {
    let mut builder = Element::builder("iq", ns::CLIENT)
        .attr("type", kind.as_str())
        .attr("id", id);
    if let Some(to) = to {
        builder = builder.attr("to", to);
    }
    if let Some(payload) = payload {
        builder = builder.append(payload);
    }
    builder.build()
}

pub fn build_ping_stanza(id: &str, to: &str) -> Element {
    build_iq_stanza(
        IqKind::Get,
        id,
        Some(to),
        Some(Element::builder("ping", ns::PING).build()),
    )
}

pub fn build_disco_info_request(id: &str, to: &str) -> Element {
    build_iq_stanza(
        IqKind::Get,
        id,
        Some(to),
        Some(Element::builder("query", ns::DISCO_INFO).build()),
    )
}

/// Affiliation change for `jid` in `room`, e.g., `outcast` to ban.
pub fn build_affiliation_stanza(
    id: &str,
    room: &str,
    jid: &str,
    affiliation: &str,
    reason: Option<&str>,
) -> Element {
    let mut item = Element::builder("item", ns::MUC_ADMIN)
        .attr("affiliation", affiliation)
        .attr("jid", jid);
    if let Some(reason) = reason {
        item = item.append(
            Element::builder("reason", ns::MUC_ADMIN)
                .append(reason.to_string())
                .build(),
        );
    }
    let query = Element::builder("query", ns::MUC_ADMIN)
        .append(item.build())
        .build();
    build_iq_stanza(IqKind::Set, id, Some(room), Some(query))
}

/// Successful reply to `request`, addressed back to its sender.
pub fn build_iq_result(request: &IqEvent, payload: Option<Element>) -> Element {
    build_iq_stanza(IqKind::Result, &request.id, request.from.as_deref(), payload)
}

/// Error reply to `request` carrying a stanza error condition.
pub fn build_iq_error(
    request: &IqEvent,
    error_type: &str,
    condition: &str,
    extra: Option<Element>,
) -> Element {
    let mut error = Element::builder("error", ns::CLIENT)
        .attr("type", error_type)
        .append(Element::builder(condition, ns::STANZAS).build());
    if let Some(extra) = extra {
        error = error.append(extra);
    }

    let mut builder = Element::builder("iq", ns::CLIENT)
        .attr("type", "error")
        .attr("id", request.id.as_str());
    if let Some(from) = request.from.as_deref() {
        builder = builder.attr("to", from);
    }
    if let Some(payload) = request.payload.clone() {
        builder = builder.append(payload);
    }
    builder.append(error.build()).build()
}

fn text_child(name: &str, namespace: &str, text: &str) -> Element {
    Element::builder(name, namespace)
        .append(text.to_string())
        .build()
}

pub fn build_version_payload(name: &str, version: &str, os: &str) -> Element {
    Element::builder("query", ns::VERSION)
        .append(text_child("name", ns::VERSION, name))
        .append(text_child("version", ns::VERSION, version))
        .append(text_child("os", ns::VERSION, os))
        .build()
}

pub fn build_last_activity_payload(seconds: u64) -> Element {
    Element::builder("query", ns::LAST)
        .attr("seconds", seconds.to_string())
        .build()
}

pub fn build_time_payload(now: DateTime<Utc>) -> Element {
    Element::builder("time", ns::TIME)
        .append(text_child("tzo", ns::TIME, "+00:00"))
        .append(text_child(
            "utc",
            ns::TIME,
            &now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
        .build()
}

pub fn build_disco_info_payload(category: &str, kind: &str, name: &str, features: &[&str]) -> Element {
    let mut builder = Element::builder("query", ns::DISCO_INFO).append(
        Element::builder("identity", ns::DISCO_INFO)
            .attr("category", category)
            .attr("type", kind)
            .attr("name", name)
            .build(),
    );
    for feature in features {
        builder = builder.append(
            Element::builder("feature", ns::DISCO_INFO)
                .attr("var", *feature)
                .build(),
        );
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn request(payload: Option<Element>) -> IqEvent {
        IqEvent {
            from: Some("admin@example.com/laptop".to_string()),
            to: Some("warden@example.com/warden".to_string()),
            id: "q1".to_string(),
            kind: IqKind::Get,
            payload,
            error: None,
        }
    }

    #[test]
    fn join_requests_no_history() {
        let join = build_muc_join_stanza("lobby@conference.example.com", "warden", None);
        assert_eq!(join.attr("to"), Some("lobby@conference.example.com/warden"));
        let x = join.get_child("x", ns::MUC).expect("muc payload");
        let history = x.get_child("history", ns::MUC).expect("history element");
        assert_eq!(history.attr("maxchars"), Some("0"));
        assert!(x.get_child("password", ns::MUC).is_none());
    }

    #[test]
    fn join_carries_password_when_given() {
        let join = build_muc_join_stanza("dev@conference.example.com", "warden", Some("hunter2"));
        let x = join.get_child("x", ns::MUC).expect("muc payload");
        assert_eq!(
            x.get_child("password", ns::MUC).map(Element::text).as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn outcast_request_shape() {
        let ban = build_affiliation_stanza(
            "ban1",
            "lobby@conference.example.com",
            "spammer@evil.example",
            "outcast",
            Some("autoban at 2024.01.02 03:04:05"),
        );
        assert_eq!(ban.attr("type"), Some("set"));
        assert_eq!(ban.attr("id"), Some("ban1"));
        assert_eq!(ban.attr("to"), Some("lobby@conference.example.com"));
        let item = ban
            .get_child("query", ns::MUC_ADMIN)
            .and_then(|query| query.get_child("item", ns::MUC_ADMIN))
            .expect("admin item");
        assert_eq!(item.attr("affiliation"), Some("outcast"));
        assert_eq!(item.attr("jid"), Some("spammer@evil.example"));
        assert_eq!(
            item.get_child("reason", ns::MUC_ADMIN).map(Element::text).as_deref(),
            Some("autoban at 2024.01.02 03:04:05")
        );
    }

    #[test]
    fn results_are_addressed_to_the_requester() {
        let reply = build_iq_result(&request(None), None);
        assert_eq!(reply.attr("type"), Some("result"));
        assert_eq!(reply.attr("id"), Some("q1"));
        assert_eq!(reply.attr("to"), Some("admin@example.com/laptop"));
        assert_eq!(reply.children().count(), 0);
    }

    #[test]
    fn errors_echo_the_payload_and_condition() {
        let payload = Element::builder("query", ns::DISCO_ITEMS).build();
        let reply = build_iq_error(&request(Some(payload)), "cancel", "service-unavailable", None);
        assert_eq!(reply.attr("type"), Some("error"));
        assert!(reply.get_child("query", ns::DISCO_ITEMS).is_some());
        let error = reply.get_child("error", ns::CLIENT).expect("error child");
        assert_eq!(error.attr("type"), Some("cancel"));
        assert!(error.get_child("service-unavailable", ns::STANZAS).is_some());
    }

    #[test]
    fn time_payload_is_utc() {
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let payload = build_time_payload(now);
        assert_eq!(
            payload.get_child("tzo", ns::TIME).map(Element::text).as_deref(),
            Some("+00:00")
        );
        assert_eq!(
            payload.get_child("utc", ns::TIME).map(Element::text).as_deref(),
            Some("2024-05-06T07:08:09Z")
        );
    }

    #[test]
    fn presence_skips_empty_status() {
        let presence = build_presence_stanza(None, Some("xa"), Some(""));
        assert!(presence.attr("to").is_none());
        assert!(presence.get_child("show", ns::CLIENT).is_some());
        assert!(presence.get_child("status", ns::CLIENT).is_none());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(next_id(), next_id());
    }
}
