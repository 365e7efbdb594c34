//! Typed inbound events decoded from raw stanzas.
//!
//! Decoding is keyed on the stanza name and its `type` attribute; payload
//! interpretation (which query a `get` carries, and so on) is left to the
//! consumer.

use minidom::Element;

use crate::error::StanzaError;
use crate::ns;
use crate::stanza::parse_stanza;

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(MessageEvent),
    Presence(PresenceEvent),
    Iq(IqEvent),
    /// A top-level element that is not a stanza, e.g., a stream feature.
    Unknown { name: String, namespace: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Groupchat,
    Headline,
    Normal,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub from: Option<String>,
    pub to: Option<String>,
    pub id: Option<String>,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub error: Option<StanzaErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceKind {
    Available,
    Unavailable,
    Error,
    /// Subscription management and probes.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    None,
}

impl Affiliation {
    pub fn parse(value: &str) -> Self {
        match value {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "member" => Self::Member,
            "outcast" => Self::Outcast,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Outcast => "outcast",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Moderator,
    Participant,
    Visitor,
    None,
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value {
            "moderator" => Self::Moderator,
            "participant" => Self::Participant,
            "visitor" => Self::Visitor,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moderator => "moderator",
            Self::Participant => "participant",
            Self::Visitor => "visitor",
            Self::None => "none",
        }
    }
}

/// The `<item/>` of a room presence's `muc#user` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MucItem {
    pub affiliation: Affiliation,
    pub role: Role,
    /// Real address of the occupant, when the room discloses it.
    pub jid: Option<String>,
    pub nick: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub from: Option<String>,
    pub to: Option<String>,
    pub kind: PresenceKind,
    pub show: Option<String>,
    pub status: Option<String>,
    pub muc: Option<MucItem>,
    /// `muc#user` status codes, e.g., 110 for self-presence.
    pub status_codes: Vec<u16>,
    pub error: Option<StanzaErrorInfo>,
}

impl PresenceEvent {
    pub fn has_status_code(&self, code: u16) -> bool {
        self.status_codes.contains(&code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqKind {
    Get,
    Set,
    Result,
    Error,
}

impl IqKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IqEvent {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Empty when the peer sent no id.
    pub id: String,
    pub kind: IqKind,
    /// First child that is not an `<error/>`.
    pub payload: Option<Element>,
    pub error: Option<StanzaErrorInfo>,
}

impl IqEvent {
    pub fn payload_is(&self, name: &str, namespace: &str) -> bool {
        self.payload
            .as_ref()
            .is_some_and(|payload| payload.is(name, namespace))
    }

    /// Namespace of the payload, if any.
    pub fn payload_ns(&self) -> Option<String> {
        self.payload.as_ref().map(|payload| payload.ns())
    }

    pub fn disco_info(&self) -> Option<DiscoInfo> {
        self.payload
            .as_ref()
            .filter(|payload| payload.is("query", ns::DISCO_INFO))
            .map(DiscoInfo::from_query)
    }
}

/// `<error/>` child of a stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaErrorInfo {
    pub error_type: String,
    pub condition: String,
    pub text: Option<String>,
}

impl StanzaErrorInfo {
    fn from_element(error: &Element) -> Self {
        let condition = error
            .children()
            .find(|child| child.ns() == ns::STANZAS && child.name() != "text")
            .map(|child| child.name().to_string())
            .unwrap_or_else(|| "undefined-condition".to_string());
        let text = error
            .get_child("text", ns::STANZAS)
            .map(|text| text.text())
            .filter(|text| !text.is_empty());
        Self {
            error_type: error.attr("type").unwrap_or("cancel").to_string(),
            condition,
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoIdentity {
    pub category: String,
    pub kind: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfo {
    pub identities: Vec<DiscoIdentity>,
    pub features: Vec<String>,
}

impl DiscoInfo {
    pub fn from_query(query: &Element) -> Self {
        let mut info = DiscoInfo::default();
        for child in query.children() {
            if child.is("identity", ns::DISCO_INFO) {
                info.identities.push(DiscoIdentity {
                    category: child.attr("category").unwrap_or_default().to_string(),
                    kind: child.attr("type").unwrap_or_default().to_string(),
                    name: child.attr("name").map(str::to_string),
                });
            } else if child.is("feature", ns::DISCO_INFO) {
                if let Some(var) = child.attr("var") {
                    info.features.push(var.to_string());
                }
            }
        }
        info
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.identities
            .iter()
            .any(|identity| identity.category == category)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|candidate| candidate == feature)
    }
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name, ns::CLIENT)
        .map(|child| child.text())
}

fn owned_attr(element: &Element, name: &str) -> Option<String> {
    element.attr(name).map(str::to_string)
}

fn error_child(element: &Element) -> Option<StanzaErrorInfo> {
    element
        .get_child("error", ns::CLIENT)
        .map(StanzaErrorInfo::from_element)
}

impl InboundEvent {
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StanzaError> {
        Self::from_element(parse_stanza(raw)?)
    }

    pub fn from_element(element: Element) -> Result<Self, StanzaError> {
        if element.ns() != ns::CLIENT {
            return Ok(InboundEvent::Unknown {
                name: element.name().to_string(),
                namespace: element.ns(),
            });
        }

        match element.name() {
            "message" => Ok(InboundEvent::Message(decode_message(&element))),
            "presence" => Ok(InboundEvent::Presence(decode_presence(&element))),
            "iq" => decode_iq(element).map(InboundEvent::Iq),
            other => Ok(InboundEvent::Unknown {
                name: other.to_string(),
                namespace: element.ns(),
            }),
        }
    }

    pub fn from(&self) -> Option<&str> {
        match self {
            InboundEvent::Message(message) => message.from.as_deref(),
            InboundEvent::Presence(presence) => presence.from.as_deref(),
            InboundEvent::Iq(iq) => iq.from.as_deref(),
            InboundEvent::Unknown { .. } => None,
        }
    }
}

fn decode_message(element: &Element) -> MessageEvent {
    let kind = match element.attr("type") {
        Some("chat") => MessageKind::Chat,
        Some("groupchat") => MessageKind::Groupchat,
        Some("headline") => MessageKind::Headline,
        Some("error") => MessageKind::Error,
        _ => MessageKind::Normal,
    };

    MessageEvent {
        from: owned_attr(element, "from"),
        to: owned_attr(element, "to"),
        id: owned_attr(element, "id"),
        kind,
        body: child_text(element, "body"),
        error: error_child(element),
    }
}

fn decode_presence(element: &Element) -> PresenceEvent {
    let kind = match element.attr("type") {
        None => PresenceKind::Available,
        Some("unavailable") => PresenceKind::Unavailable,
        Some("error") => PresenceKind::Error,
        Some(other) => PresenceKind::Other(other.to_string()),
    };

    let mut muc = None;
    let mut status_codes = Vec::new();
    if let Some(x) = element.get_child("x", ns::MUC_USER) {
        if let Some(item) = x.get_child("item", ns::MUC_USER) {
            muc = Some(MucItem {
                affiliation: Affiliation::parse(item.attr("affiliation").unwrap_or("none")),
                role: Role::parse(item.attr("role").unwrap_or("none")),
                jid: owned_attr(item, "jid"),
                nick: owned_attr(item, "nick"),
            });
        }
        status_codes = x
            .children()
            .filter(|child| child.is("status", ns::MUC_USER))
            .filter_map(|status| status.attr("code"))
            .filter_map(|code| code.parse().ok())
            .collect();
    }

    PresenceEvent {
        from: owned_attr(element, "from"),
        to: owned_attr(element, "to"),
        kind,
        show: child_text(element, "show").filter(|show| !show.is_empty()),
        status: child_text(element, "status").filter(|status| !status.is_empty()),
        muc,
        status_codes,
        error: error_child(element),
    }
}

fn decode_iq(element: Element) -> Result<IqEvent, StanzaError> {
    let kind = match element.attr("type") {
        Some("get") => IqKind::Get,
        Some("set") => IqKind::Set,
        Some("result") => IqKind::Result,
        Some("error") => IqKind::Error,
        _ => {
            return Err(StanzaError::MissingAttribute {
                stanza: "iq",
                attribute: "type",
            });
        }
    };

    let payload = element
        .children()
        .find(|child| !child.is("error", ns::CLIENT))
        .cloned();

    Ok(IqEvent {
        from: owned_attr(&element, "from"),
        to: owned_attr(&element, "to"),
        id: element.attr("id").unwrap_or_default().to_string(),
        kind,
        payload,
        error: error_child(&element),
    })
}
