use warden_core::address;
use warden_xmpp::{Affiliation, PresenceEvent, Role};

/// One occupant of a room as last seen in its presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    /// Full occupant address, `room/nick`.
    pub address: String,
    pub nick: String,
    pub role: Role,
    pub affiliation: Affiliation,
    /// Canonical (bare, lowercased) real identity when the room discloses it.
    pub identity: Option<String>,
}

impl Occupant {
    pub fn from_presence(address: &str, nick: &str, presence: &PresenceEvent) -> Self {
        let item = presence.muc.as_ref();
        Self {
            address: address.to_string(),
            nick: nick.to_string(),
            role: item.map_or(Role::None, |item| item.role),
            affiliation: item.map_or(Affiliation::None, |item| item.affiliation),
            identity: item
                .and_then(|item| item.jid.as_deref())
                .map(address::canonical),
        }
    }

    /// Rebuild the presence this record was made from, for re-checking.
    pub fn to_presence(&self) -> PresenceEvent {
        PresenceEvent {
            from: Some(self.address.clone()),
            to: None,
            kind: warden_xmpp::PresenceKind::Available,
            show: None,
            status: None,
            muc: Some(warden_xmpp::MucItem {
                affiliation: self.affiliation,
                role: self.role,
                jid: self.identity.clone(),
                nick: None,
            }),
            status_codes: Vec::new(),
            error: None,
        }
    }
}

/// Insertion-ordered set of occupants keyed by full address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    occupants: Vec<Occupant>,
}

impl Roster {
    /// Insert or replace by address. A replaced occupant moves to the end.
    pub fn upsert(&mut self, occupant: Occupant) {
        self.occupants
            .retain(|existing| existing.address != occupant.address);
        self.occupants.push(occupant);
    }

    pub fn remove(&mut self, address: &str) -> Option<Occupant> {
        let index = self
            .occupants
            .iter()
            .position(|occupant| occupant.address == address)?;
        Some(self.occupants.remove(index))
    }

    pub fn get(&self, address: &str) -> Option<&Occupant> {
        self.occupants
            .iter()
            .find(|occupant| occupant.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Occupant> {
        self.occupants.iter()
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }
}
