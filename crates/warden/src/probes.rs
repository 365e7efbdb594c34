//! Server and room liveness probes.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};
use warden_core::address;
use warden_xmpp::ns;
use warden_xmpp::outbound::{build_ping_stanza, next_id};

use crate::error::SessionError;
use crate::session::Session;

/// `base` plus a random whole number of seconds below `jitter_secs`.
pub fn jittered(base: Duration, jitter_secs: u64) -> Duration {
    if jitter_secs == 0 {
        return base;
    }
    base + Duration::from_secs(rand::rng().random_range(0..jitter_secs))
}

/// Address the server probe pings: the account's domain.
pub fn server_address(session: &Session) -> String {
    address::domain(session.own_jid()).to_string()
}

/// One round of the server probe.
pub fn probe_server(session: &Session) -> Result<(), SessionError> {
    if !(session.server_queried() && session.server_supports(ns::PING)) {
        debug!("server ping not confirmed, sending keep-alive");
        session.send_keepalive()?;
        return Ok(());
    }

    let stamps = session.server_ping();
    let threshold = session.config().timing.stall_threshold();
    if stamps.sent.is_some() {
        if let Some(received) = stamps.received {
            let silent = received.elapsed();
            if silent > threshold {
                return Err(SessionError::Stall {
                    elapsed_secs: silent.as_secs(),
                });
            }
        }
    }

    let id = next_id();
    let server = server_address(session);
    debug!(server = %server, id = %id, "sending server ping");
    session.send(build_ping_stanza(&id, &server))?;
    session.record_server_ping(&id);
    Ok(())
}

pub async fn run_server_probe(session: Arc<Session>) -> Result<(), SessionError> {
    loop {
        let timing = &session.config().timing;
        tokio::time::sleep(jittered(timing.server_ping_delay(), timing.ping_jitter)).await;
        probe_server(&session)?;
    }
}

/// Joined rooms that are idle and advertise self-ping optimization.
pub fn rooms_to_ping(session: &Session) -> Vec<String> {
    let timing = &session.config().timing;
    let idle_threshold = timing.server_ping_delay() + Duration::from_secs(timing.ping_jitter);
    session
        .joined_rooms()
        .into_iter()
        .filter(|room| {
            session
                .room_activity(room)
                .is_some_and(|last| last.elapsed() >= idle_threshold)
        })
        .filter(|room| session.room_supports(room, ns::MUC_SELF_PING))
        .collect()
}

async fn ping_room(session: Arc<Session>, room: String) -> Result<(), SessionError> {
    let jitter = session.config().timing.ping_jitter;
    tokio::time::sleep(jittered(Duration::ZERO, jitter)).await;
    let id = next_id();
    debug!(room = %room, id = %id, "sending room ping");
    session.record_room_ping(&id, &room);
    session.send(build_ping_stanza(&id, &room))?;
    Ok(())
}

pub async fn run_room_probe(session: Arc<Session>) -> Result<(), SessionError> {
    loop {
        tokio::time::sleep(session.config().timing.room_ping_delay()).await;
        for room in rooms_to_ping(&session) {
            session
                .tasks()
                .spawn("room ping", ping_room(Arc::clone(&session), room));
        }
    }
}

/// Log once per session for rooms that ask for Bayesian scoring.
pub fn note_unsupported_checks(session: &Session) {
    for room in session.config().rooms.iter().filter(|room| room.bayes.enabled) {
        info!(room = %room.name, "bayes scoring is not available, the check is ignored");
    }
}
