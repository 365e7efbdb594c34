use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use warden_xmpp::outbound::build_presence_stanza;

use crate::error::SessionError;
use crate::probes::jittered;
use crate::session::Session;

/// Send a random configured status now, then again every `rotation_interval`
/// plus jitter. An interval of zero sends once.
///
/// With a room the presence is addressed to it and the rotation ends once the
/// room is left. Without one the presence is broadcast. Either way it ends
/// when `stop` is cancelled.
pub async fn rotate_status(
    session: Arc<Session>,
    room: Option<String>,
    stop: CancellationToken,
) -> Result<(), SessionError> {
    let status = &session.config().status;
    if status.texts.is_empty() {
        return Ok(());
    }
    let target = room.as_deref().unwrap_or("all rooms");

    loop {
        if stop.is_cancelled() {
            return Ok(());
        }
        if let Some(room) = &room {
            if !session.is_joined(room) {
                debug!(room = %room, "left room, stopping status rotation");
                return Ok(());
            }
        }

        let text = status.texts.choose(&mut rand::rng()).cloned().unwrap_or_default();
        debug!(room = %target, status = %text, "setting status");
        session.send(build_presence_stanza(room.as_deref(), None, Some(&text)))?;

        if status.rotation_interval == 0 {
            return Ok(());
        }
        let delay = jittered(
            Duration::from_secs(status.rotation_interval),
            status.rotation_jitter,
        );
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
