//! Room-join handshake.
//!
//! The handshake is a bounded sequence of states. [`JoinState::next`] is a
//! pure transition function; [`run_join`] performs the side effect for the
//! state it is in, observes the outcome, and asks for the next state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use warden_xmpp::outbound::{build_disco_info_request, build_muc_join_stanza, next_id};
use warden_xmpp::{Affiliation, ns};

use crate::error::JoinError;
use crate::moderation::check_presence;
use crate::session::Session;
use crate::status::rotate_status;

/// Spacing between two polls of a session cache.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStage {
    Discovery,
    Membership,
}

impl JoinStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovering room features",
            Self::Membership => "waiting for own presence",
        }
    }
}

impl fmt::Display for JoinStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Discovering { polls: u32 },
    RequestingJoin,
    AwaitingMembership { polls: u32 },
    Joined,
    Sweeping,
    Steady,
    Aborted,
    Failed(JoinStage),
}

/// Access the room announced in its features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAccess {
    Unknown,
    Open,
    PasswordProtected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Access(RoomAccess),
    Membership(bool),
    /// The current state's side effect has completed.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinPolicy {
    pub poll_budget: u32,
    pub has_password: bool,
}

impl JoinState {
    pub const START: Self = Self::Discovering { polls: 0 };

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Steady | Self::Aborted | Self::Failed(_))
    }

    pub fn next(self, observation: &Observation, policy: &JoinPolicy) -> Self {
        match (self, observation) {
            (Self::Discovering { .. }, Observation::Access(RoomAccess::Open)) => Self::RequestingJoin,
            (Self::Discovering { .. }, Observation::Access(RoomAccess::PasswordProtected)) => {
                if policy.has_password {
                    Self::RequestingJoin
                } else {
                    Self::Aborted
                }
            }
            (Self::Discovering { polls }, Observation::Access(RoomAccess::Unknown)) => {
                if polls + 1 >= policy.poll_budget {
                    Self::Failed(JoinStage::Discovery)
                } else {
                    Self::Discovering { polls: polls + 1 }
                }
            }
            (Self::RequestingJoin, Observation::Done) => Self::AwaitingMembership { polls: 0 },
            (Self::AwaitingMembership { .. }, Observation::Membership(true)) => Self::Joined,
            (Self::AwaitingMembership { polls }, Observation::Membership(false)) => {
                if polls + 1 >= policy.poll_budget {
                    Self::Failed(JoinStage::Membership)
                } else {
                    Self::AwaitingMembership { polls: polls + 1 }
                }
            }
            (Self::Joined, Observation::Done) => Self::Sweeping,
            (Self::Sweeping, Observation::Done) => Self::Steady,
            (state, _) => state,
        }
    }
}

fn room_access(session: &Session, room: &str) -> RoomAccess {
    match session.room_features(room) {
        Some(features) if features.contains(ns::MUC_UNSECURED) => RoomAccess::Open,
        Some(features) if features.contains(ns::MUC_PASSWORD_PROTECTED) => {
            RoomAccess::PasswordProtected
        }
        _ => RoomAccess::Unknown,
    }
}

/// Run every cached occupant of a freshly joined room through the presence check.
async fn sweep(session: &Session, room: &str) {
    let Some(roster) = session.roster(room) else {
        return;
    };
    debug!(room = %room, occupants = roster.len(), "checking occupants present before join");
    for occupant in roster.iter() {
        if occupant.affiliation == Affiliation::Outcast {
            continue;
        }
        if let Err(error) = check_presence(session, &occupant.to_presence()).await {
            warn!(room = %room, error = %error, "enforcement failed during sweep");
        }
    }
}

async fn drive(session: Arc<Session>, room: String, mut state: JoinState) -> Result<(), JoinError> {
    let room_config = session.config().room(&room);
    let password = room_config.and_then(|config| config.password.clone());
    let policy = JoinPolicy {
        poll_budget: session.config().timing.join_poll_budget(),
        has_password: password.is_some(),
    };
    let nick = session.nick_for(&room).to_string();

    if state == JoinState::START {
        debug!(room = %room, "sending room disco#info");
        session
            .send(build_disco_info_request(&next_id(), &room))
            .map_err(|source| JoinError::Send {
                room: room.clone(),
                stage: "disco#info",
                source,
            })?;
    }

    loop {
        let observation = match state {
            JoinState::Discovering { .. } => {
                tokio::time::sleep(POLL_INTERVAL).await;
                Observation::Access(room_access(&session, &room))
            }
            JoinState::RequestingJoin => {
                info!(room = %room, nick = %nick, "joining room");
                session
                    .send(build_muc_join_stanza(&room, &nick, password.as_deref()))
                    .map_err(|source| JoinError::Send {
                        room: room.clone(),
                        stage: "join",
                        source,
                    })?;
                Observation::Done
            }
            JoinState::AwaitingMembership { .. } => {
                tokio::time::sleep(POLL_INTERVAL).await;
                Observation::Membership(session.is_joined(&room))
            }
            JoinState::Joined => {
                info!(room = %room, "joined room");
                Observation::Done
            }
            JoinState::Sweeping => {
                sweep(&session, &room).await;
                Observation::Done
            }
            JoinState::Steady => {
                let stop = session.claim_rotation(&room);
                session.tasks().spawn(
                    "status rotation",
                    rotate_status(Arc::clone(&session), Some(room), stop),
                );
                return Ok(());
            }
            JoinState::Aborted => return Err(JoinError::PasswordProtected { room }),
            JoinState::Failed(stage) => {
                return Err(JoinError::Timeout {
                    room,
                    stage: stage.as_str(),
                });
            }
        };
        state = state.next(&observation, &policy);
    }
}

/// Negotiate entry into `room` from the start.
pub async fn run_join(session: Arc<Session>, room: String) -> Result<(), JoinError> {
    drive(session, room, JoinState::START).await
}

/// Re-enter `room` after the configured rejoin delay, skipping discovery.
pub async fn rejoin(session: Arc<Session>, room: String) -> Result<(), JoinError> {
    tokio::time::sleep(session.config().timing.room_rejoin_delay()).await;
    drive(session, room, JoinState::RequestingJoin).await
}
