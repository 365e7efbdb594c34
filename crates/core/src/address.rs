//! Helpers for `local@domain/resource` style addresses.
//!
//! Room occupants are addressed as `room@service/nick`; the nick is all
//! text after the first `/` and may itself contain slashes.

/// Split an address into its bare part and resource.
pub fn split(address: &str) -> (&str, Option<&str>) {
    match address.split_once('/') {
        Some((bare, resource)) => (bare, Some(resource)),
        None => (address, None),
    }
}

/// The address with any resource removed.
pub fn bare(address: &str) -> &str {
    split(address).0
}

pub fn resource(address: &str) -> Option<&str> {
    split(address).1
}

/// Canonical identity: bare address, lower-cased.
pub fn canonical(address: &str) -> String {
    bare(address).to_lowercase()
}

/// Split an occupant address into `(room, nick)`. Returns `None` when the
/// address has no resource or either half is empty.
pub fn occupant(address: &str) -> Option<(&str, &str)> {
    match split(address) {
        (room, Some(nick)) if !room.is_empty() && !nick.is_empty() => Some((room, nick)),
        _ => None,
    }
}

pub fn occupant_address(room: &str, nick: &str) -> String {
    format!("{room}/{nick}")
}

/// The domain part of an address, e.g., `example.com` for `bot@example.com/res`.
pub fn domain(address: &str) -> &str {
    let bare = bare(address);
    match bare.split_once('@') {
        Some((_, domain)) => domain,
        None => bare,
    }
}
