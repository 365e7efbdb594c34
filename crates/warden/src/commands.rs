//! Administrative chat commands.

use tracing::{info, warn};
use warden_core::address;
use warden_xmpp::outbound::build_message_stanza;
use warden_xmpp::{ConnectionError, MessageEvent, MessageKind};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Reload,
}

impl Command {
    /// Parse `body` as a command when it is exactly the prefix plus a name.
    pub fn parse(prefix: &str, body: &str) -> Option<Self> {
        match body.trim().strip_prefix(prefix)? {
            "help" | "помощь" => Some(Self::Help),
            "reload" | "rehash" => Some(Self::Reload),
            _ => None,
        }
    }
}

fn help_text(prefix: &str) -> String {
    format!(
        "{prefix}help   - this command list\n\
         {prefix}помощь - this command list\n\
         {prefix}reload - reload whitelist and blacklist (alias {prefix}rehash)"
    )
}

const REFUSAL: &str = "Nothing I can help you with.";

/// Where a command came from and where its reply goes.
struct Origin {
    identity: Option<String>,
    reply_to: String,
    kind: MessageKind,
}

fn origin(session: &Session, message: &MessageEvent, from: &str) -> Option<Origin> {
    match message.kind {
        MessageKind::Groupchat => Some(Origin {
            identity: session.resolve_identity(from),
            reply_to: address::bare(from).to_string(),
            kind: MessageKind::Groupchat,
        }),
        MessageKind::Chat | MessageKind::Normal => {
            let bare = address::bare(from);
            let identity = if session.is_joined(bare) {
                session.resolve_identity(from)
            } else if session.config().room(bare).is_some() {
                // Private message from a room we are not in.
                return None;
            } else {
                Some(address::canonical(from))
            };
            Some(Origin {
                identity,
                reply_to: from.to_string(),
                kind: MessageKind::Chat,
            })
        }
        MessageKind::Headline | MessageKind::Error => None,
    }
}

/// Run the command in `message`, if any. Returns whether one was handled.
///
/// Only a failure to send the reply is an error.
pub fn handle(session: &Session, message: &MessageEvent) -> Result<bool, ConnectionError> {
    let (Some(from), Some(body)) = (message.from.as_deref(), message.body.as_deref()) else {
        return Ok(false);
    };
    let prefix = &session.config().bot.command_prefix;
    let Some(command) = Command::parse(prefix, body) else {
        return Ok(false);
    };
    let Some(origin) = origin(session, message, from) else {
        info!(from = %from, ?command, "ignoring command from a room we are not in");
        return Ok(false);
    };
    let is_admin = origin
        .identity
        .as_deref()
        .is_some_and(|identity| session.config().bot.is_admin(identity));

    let reply = match command {
        Command::Help if is_admin => help_text(prefix),
        Command::Help => REFUSAL.to_string(),
        Command::Reload if !is_admin => {
            info!(from = %from, identity = ?origin.identity, "reload requested by a non-admin, ignoring");
            return Ok(true);
        }
        Command::Reload => match session.rules().reload() {
            Ok(rules) => {
                info!(
                    from = %from,
                    whitelist = rules.whitelist_len(),
                    blacklist = rules.blacklist_len(),
                    "rules reloaded"
                );
                "Done.".to_string()
            }
            Err(error) => {
                warn!(from = %from, error = %error, "rule reload failed, keeping previous rules");
                error.to_string()
            }
        },
    };

    session.send(build_message_stanza(&origin.reply_to, origin.kind, &reply))?;
    Ok(true)
}
