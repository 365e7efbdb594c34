//! Per-connection session state.
//!
//! A `Session` is built fresh for every connection attempt and dropped when
//! the connection ends, so nothing but the configuration and the rule store
//! outlives a reconnect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use warden_core::{Collection, Config, address};
use warden_xmpp::{ConnectionError, Element, StanzaSink};

use crate::membership::{Occupant, Roster};
use crate::moderation::RuleStore;
use crate::tasks::TaskGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connecting,
    Connected,
    ShuttingDown,
}

/// What an outstanding ping was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingTarget {
    Server,
    Room(String),
}

/// Transmit and receive times of the server liveness ping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingStamps {
    pub sent: Option<Instant>,
    pub received: Option<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    config: Arc<Config>,
    rules: Arc<RuleStore>,
    sink: Arc<dyn StanzaSink>,
    tasks: TaskGroup,
    own_jid: String,
    lifecycle: Mutex<Lifecycle>,

    /// Rooms whose self-presence has been echoed back, with the time it was.
    joined: Collection<String, Instant>,
    rosters: Collection<String, Roster>,
    room_features: Collection<String, Arc<HashSet<String>>>,
    room_activity: Collection<String, Instant>,
    /// Stop token of the status rotation running for each room.
    rotations: Collection<String, CancellationToken>,

    server_features: Collection<String, bool>,
    server_queried: AtomicBool,
    server_activity: Mutex<Instant>,
    chat_activity: Mutex<Instant>,
    server_ping: Mutex<PingStamps>,
    pings: Collection<String, PingTarget>,
    /// Outstanding self-ping id per room.
    room_pings: Collection<String, String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("own_jid", &self.own_jid)
            .field("lifecycle", &self.lifecycle())
            .field("joined", &self.joined.keys())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        rules: Arc<RuleStore>,
        sink: Arc<dyn StanzaSink>,
        tasks: TaskGroup,
        own_jid: impl Into<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            rules,
            sink,
            tasks,
            own_jid: own_jid.into(),
            lifecycle: Mutex::new(Lifecycle::Connecting),
            joined: Collection::new(),
            rosters: Collection::new(),
            room_features: Collection::new(),
            room_activity: Collection::new(),
            rotations: Collection::new(),
            server_features: Collection::new(),
            server_queried: AtomicBool::new(false),
            server_activity: Mutex::new(now),
            chat_activity: Mutex::new(now),
            // A fresh connection counts as answered.
            server_ping: Mutex::new(PingStamps {
                sent: None,
                received: Some(now),
            }),
            pings: Collection::new(),
            room_pings: Collection::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// Full bound address of the bot.
    pub fn own_jid(&self) -> &str {
        &self.own_jid
    }

    pub fn own_bare(&self) -> &str {
        address::bare(&self.own_jid)
    }

    /// Whether `identity` (any form) is the bot's own account.
    pub fn is_self(&self, identity: &str) -> bool {
        address::canonical(identity) == address::canonical(&self.own_jid)
    }

    pub fn nick_for(&self, room: &str) -> &str {
        self.config.nick_for(room)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    pub fn set_lifecycle(&self, state: Lifecycle) {
        *lock(&self.lifecycle) = state;
    }

    pub fn send(&self, stanza: Element) -> Result<(), ConnectionError> {
        self.sink.send(stanza)
    }

    pub fn send_keepalive(&self) -> Result<(), ConnectionError> {
        self.sink.send_keepalive()
    }

    // Joined rooms.

    pub fn is_joined(&self, room: &str) -> bool {
        self.joined.contains(&address::canonical(room))
    }

    /// Returns `true` when the room was not joined before.
    pub fn mark_joined(&self, room: &str) -> bool {
        self.joined
            .set_if_absent(address::canonical(room), Instant::now())
    }

    pub fn mark_left(&self, room: &str) {
        let room = address::canonical(room);
        self.joined.remove(&room);
        self.rosters.remove(&room);
        self.room_activity.remove(&room);
        if let Some(stop) = self.rotations.remove(&room) {
            stop.cancel();
        }
    }

    /// Token for a new status rotation in `room`. Any rotation already
    /// running there is stopped.
    pub fn claim_rotation(&self, room: &str) -> CancellationToken {
        let stop = self.tasks.token().child_token();
        if let Some(previous) = self.rotations.set(address::canonical(room), stop.clone()) {
            previous.cancel();
        }
        stop
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.joined.keys()
    }

    // Room membership.

    pub fn roster(&self, room: &str) -> Option<Roster> {
        self.rosters.get(&address::canonical(room))
    }

    pub fn upsert_occupant(&self, room: &str, occupant: Occupant) {
        self.rosters.update(
            address::canonical(room),
            Roster::default,
            |roster| roster.upsert(occupant),
        );
    }

    pub fn remove_occupant(&self, room: &str, occupant_address: &str) -> Option<Occupant> {
        let mut removed = None;
        self.rosters
            .update_existing(&address::canonical(room), |roster| {
                removed = roster.remove(occupant_address);
            });
        removed
    }

    /// Canonical identity behind an occupant address, when the room disclosed it.
    pub fn resolve_identity(&self, occupant_address: &str) -> Option<String> {
        let (room, _) = address::occupant(occupant_address)?;
        self.roster(room)?
            .get(occupant_address)
            .and_then(|occupant| occupant.identity.clone())
    }

    // Capabilities.

    pub fn set_room_features(&self, room: &str, features: HashSet<String>) {
        self.room_features
            .set(address::canonical(room), Arc::new(features));
    }

    pub fn room_features(&self, room: &str) -> Option<Arc<HashSet<String>>> {
        self.room_features.get(&address::canonical(room))
    }

    pub fn room_supports(&self, room: &str, feature: &str) -> bool {
        self.room_features(room)
            .is_some_and(|features| features.contains(feature))
    }

    pub fn set_server_feature(&self, feature: &str, supported: bool) {
        self.server_features.set(feature.to_string(), supported);
    }

    pub fn server_supports(&self, feature: &str) -> bool {
        self.server_features.get(feature).unwrap_or(false)
    }

    pub fn mark_server_queried(&self) {
        self.server_queried.store(true, Ordering::Release);
    }

    pub fn server_queried(&self) -> bool {
        self.server_queried.load(Ordering::Acquire)
    }

    // Activity.

    /// Record inbound traffic from `from`.
    pub fn touch(&self, from: Option<&str>) {
        let now = Instant::now();
        *lock(&self.server_activity) = now;
        if let Some(from) = from {
            let room = address::canonical(from);
            if self.joined.contains(&room) {
                self.room_activity.set(room, now);
            }
        }
    }

    pub fn touch_room(&self, room: &str) {
        self.room_activity
            .set(address::canonical(room), Instant::now());
    }

    pub fn room_activity(&self, room: &str) -> Option<Instant> {
        self.room_activity.get(&address::canonical(room))
    }

    pub fn server_activity(&self) -> Instant {
        *lock(&self.server_activity)
    }

    pub fn touch_chat(&self) {
        *lock(&self.chat_activity) = Instant::now();
    }

    /// Seconds since the last chat message, for `jabber:iq:last`.
    pub fn idle_seconds(&self) -> u64 {
        lock(&self.chat_activity).elapsed().as_secs()
    }

    // Pings.

    pub fn record_server_ping(&self, id: &str) {
        self.pings.set(id.to_string(), PingTarget::Server);
        lock(&self.server_ping).sent = Some(Instant::now());
    }

    pub fn record_server_pong(&self) {
        lock(&self.server_ping).received = Some(Instant::now());
    }

    pub fn server_ping(&self) -> PingStamps {
        *lock(&self.server_ping)
    }

    /// Record a self-ping to `room`, forgetting the previous unanswered one.
    pub fn record_room_ping(&self, id: &str, room: &str) {
        let room = address::canonical(room);
        let previous = self.room_pings.set(room.clone(), id.to_string());
        if let Some(previous) = previous.filter(|previous| previous != id) {
            self.pings.remove(&previous);
        }
        self.pings.set(id.to_string(), PingTarget::Room(room));
    }

    pub fn take_ping(&self, id: &str) -> Option<PingTarget> {
        let target = self.pings.remove(id)?;
        if let PingTarget::Room(room) = &target {
            self.room_pings.remove_if(room, |current| current == id);
        }
        Some(target)
    }
}
