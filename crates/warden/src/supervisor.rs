//! Connection lifecycle.
//!
//! Each pass of [`Supervisor::run`] builds a fresh [`Session`] around a new
//! transport, runs it until something fatal happens, tears every task down
//! and starts over after `reconnect_delay`. Only the configuration and the
//! rule store are carried from one session to the next.

use std::marker::PhantomData;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::Config;
use warden_xmpp::outbound::{
    build_disco_info_request, build_muc_leave_stanza, build_presence_stanza, next_id,
};
use warden_xmpp::{ConnectionConfig, InboundEvent, XmppHandle, XmppTransport, run_io};

use crate::dispatcher::dispatch;
use crate::error::SessionError;
use crate::join::run_join;
use crate::moderation::RuleStore;
use crate::probes::{note_unsupported_checks, run_room_probe, run_server_probe, server_address};
use crate::session::{Lifecycle, Session};
use crate::status::rotate_status;
use crate::tasks::TaskGroup;

pub struct Supervisor<T> {
    config: Arc<Config>,
    rules: Arc<RuleStore>,
    transport: PhantomData<fn() -> T>,
}

impl<T: XmppTransport> Supervisor<T> {
    pub fn new(config: Arc<Config>, rules: Arc<RuleStore>) -> Self {
        Self {
            config,
            rules,
            transport: PhantomData,
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        let account = &self.config.account;
        ConnectionConfig {
            jid: account.full_jid(),
            password: account.password.clone(),
            server: account.server.clone(),
            port: account.port,
            timeout_seconds: self.config.timing.connection_timeout,
        }
    }

    /// Run sessions back to back until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt = 0_u64;
        loop {
            attempt += 1;
            match self.run_session(&shutdown).await {
                Ok(()) => info!(attempt, "session closed"),
                Err(SessionError::Connection(connection)) if !connection.is_retryable() => {
                    error!(attempt, error = %connection, "session failed, check the account settings");
                }
                Err(error) => warn!(attempt, error = %error, "session failed"),
            }
            if shutdown.is_cancelled() {
                break;
            }

            let delay = self.config.timing.reconnect_delay();
            info!(delay_secs = delay.as_secs(), "reconnecting");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("supervisor stopped");
    }

    /// One connection, from connect to teardown.
    pub async fn run_session(&self, shutdown: &CancellationToken) -> Result<(), SessionError> {
        let connection = self.connection_config();
        info!(jid = %connection.jid, "connecting");
        let transport = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            transport = T::connect(&connection) => transport?,
        };
        let own_jid = transport.bound_jid().to_string();

        let (handle, outbound_rx) = XmppHandle::channel();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let mut io = tokio::spawn(run_io(transport, outbound_rx, inbound_tx));

        let tasks = TaskGroup::child_of(shutdown);
        let session = Arc::new(Session::new(
            Arc::clone(&self.config),
            Arc::clone(&self.rules),
            Arc::new(handle.clone()),
            tasks.clone(),
            own_jid,
        ));

        let result = match connect(&session) {
            Ok(()) => {
                tasks.spawn("server probe", run_server_probe(Arc::clone(&session)));
                tasks.spawn("room probe", run_room_probe(Arc::clone(&session)));
                receive(&session, &mut inbound_rx).await
            }
            Err(error) => Err(error),
        };

        session.set_lifecycle(Lifecycle::ShuttingDown);
        if shutdown.is_cancelled() {
            leave_rooms(&session);
        }
        handle.close();
        tasks.shutdown().await;
        drop(inbound_rx);

        let timeout = self.config.timing.connection_timeout();
        let io_result = match tokio::time::timeout(timeout, &mut io).await {
            Ok(Ok(io_result)) => io_result,
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "I/O task panicked");
                Ok(())
            }
            Err(_) => {
                warn!("I/O task did not stop in time, aborting it");
                io.abort();
                Ok(())
            }
        };

        // When the event stream dried up the I/O error is the real cause.
        match (result, io_result) {
            (Err(SessionError::StreamEnded), Err(io_error)) => Err(io_error.into()),
            (result, _) => result,
        }
    }
}

/// Announce the bot, validate the link and start one join per configured room.
pub fn connect(session: &Arc<Session>) -> Result<(), SessionError> {
    let config = session.config();

    let status = config.bot.startup_status.choose(&mut rand::rng());
    session.send(build_presence_stanza(None, None, status.map(String::as_str)))?;
    session.send_keepalive()?;

    for room in &config.rooms {
        session
            .tasks()
            .spawn_scoped("join", run_join(Arc::clone(session), room.name.clone()));
    }
    session.tasks().spawn(
        "status rotation",
        rotate_status(Arc::clone(session), None, session.tasks().token().child_token()),
    );

    let server = server_address(session);
    debug!(server = %server, "requesting server features");
    session.send(build_disco_info_request(&next_id(), &server))?;

    session.set_lifecycle(Lifecycle::Connected);
    note_unsupported_checks(session);
    info!(jid = %session.own_jid(), rooms = config.rooms.len(), "connected");
    Ok(())
}

/// Feed inbound events to the dispatcher until the stream ends or the task
/// group is killed.
async fn receive(
    session: &Arc<Session>,
    inbound: &mut mpsc::UnboundedReceiver<InboundEvent>,
) -> Result<(), SessionError> {
    let tasks = session.tasks();
    loop {
        tokio::select! {
            biased;
            _ = tasks.killed() => {
                return match tasks.take_cause() {
                    Some(cause) => Err(cause),
                    None => Ok(()),
                };
            }
            event = inbound.recv() => {
                let Some(event) = event else {
                    return Err(SessionError::StreamEnded);
                };
                dispatch(session, event).await?;
            }
        }
    }
}

fn leave_rooms(session: &Session) {
    for room in session.joined_rooms() {
        info!(room = %room, "leaving room");
        if let Err(error) = session.send(build_muc_leave_stanza(&room, session.nick_for(&room))) {
            debug!(room = %room, error = %error, "could not send leave presence");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use warden_core::config::load_config_from_str;
    use warden_xmpp::ConnectionError;

    use super::*;
    use crate::moderation::Rules;
    use crate::session::testing::{CONFIG, OWN_JID, session_with};

    /// What the next scripted connection does. One script is shared by
    /// every test in this module, so they hold `SERIAL` while running.
    #[derive(Default)]
    struct Script {
        connects: usize,
        frames: VecDeque<Vec<u8>>,
        /// How long `recv` blocks once the frames run out before failing.
        hold: Duration,
        written: Vec<Vec<u8>>,
    }

    static SCRIPT: Mutex<Option<Script>> = Mutex::new(None);
    static SERIAL: Mutex<()> = Mutex::new(());

    fn with_script<R>(f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = SCRIPT.lock().unwrap_or_else(|poison| poison.into_inner());
        f(guard.get_or_insert_with(Script::default))
    }

    struct ScriptedTransport;

    impl XmppTransport for ScriptedTransport {
        async fn connect(_config: &ConnectionConfig) -> Result<Self, ConnectionError> {
            with_script(|script| script.connects += 1);
            Ok(Self)
        }

        async fn send(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
            with_script(|script| script.written.push(data.to_vec()));
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
            let (frame, hold) = with_script(|script| (script.frames.pop_front(), script.hold));
            if let Some(frame) = frame {
                return Ok(frame);
            }
            tokio::time::sleep(hold).await;
            Err(ConnectionError::Closed)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn bound_jid(&self) -> &str {
            OWN_JID
        }
    }

    fn supervisor() -> Supervisor<ScriptedTransport> {
        let config = load_config_from_str(CONFIG).expect("config");
        Supervisor::new(
            Arc::new(config),
            Arc::new(RuleStore::from_rules(Rules::default())),
        )
    }

    fn written() -> Vec<String> {
        with_script(|script| {
            script
                .written
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .collect()
        })
    }

    const OWN_PRESENCE: &str = "<presence xmlns='jabber:client' \
        from='lobby@conference.example.com/warden' to='warden@example.com/warden'>\
        <x xmlns='http://jabber.org/protocol/muc#user'>\
        <item affiliation='none' role='participant'/><status code='110'/></x></presence>";

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn broken_links_are_rebuilt_after_the_delay() {
        let _serial = SERIAL.lock().unwrap_or_else(|poison| poison.into_inner());
        with_script(|script| {
            *script = Script {
                hold: Duration::from_secs(1),
                ..Script::default()
            }
        });

        let supervisor = supervisor();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { supervisor.run(shutdown).await }
        });

        // Each pass lives one second, then waits three before reconnecting.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(with_script(|script| script.connects), 2);

        let sent = written();
        assert!(sent.iter().any(|frame| frame == " "));
        assert!(sent.iter().any(|frame| frame.contains("<presence")));

        shutdown.cancel();
        run.await.expect("supervisor");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shutdown_leaves_joined_rooms() {
        let _serial = SERIAL.lock().unwrap_or_else(|poison| poison.into_inner());
        with_script(|script| {
            *script = Script {
                frames: VecDeque::from([OWN_PRESENCE.as_bytes().to_vec()]),
                hold: Duration::from_secs(3600),
                ..Script::default()
            }
        });

        let supervisor = supervisor();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { supervisor.run_session(&shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        run.await.expect("session").expect("clean shutdown");

        let sent = written();
        assert!(sent.iter().any(|frame| {
            frame.contains("unavailable") && frame.contains("lobby@conference.example.com/warden")
        }));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn connect_rotates_the_broadcast_status() {
        let config = format!("{CONFIG}\n[status]\ntexts = [\"watching\"]\nrotation_interval = 60\n");
        let (session, sink) = session_with(&config, Rules::default());

        connect(&session).expect("connect");
        tokio::time::sleep(Duration::from_secs(130)).await;

        let broadcasts = sink
            .sent()
            .iter()
            .filter(|stanza| stanza.name() == "presence" && stanza.attr("to").is_none())
            .filter(|stanza| {
                stanza
                    .get_child("status", warden_xmpp::ns::CLIENT)
                    .is_some_and(|status| status.text() == "watching")
            })
            .count();
        assert_eq!(broadcasts, 3);
        session.tasks().shutdown().await;
    }
}
