//! XMPP multi-user chat moderation bot.
//!
//! The binary wires configuration and rules into a [`Supervisor`], which owns
//! the connection and rebuilds the whole [`Session`] whenever it dies.

pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod join;
pub mod membership;
pub mod moderation;
pub mod probes;
pub mod session;
pub mod status;
pub mod supervisor;
pub mod tasks;
pub mod telemetry;

pub use dispatcher::dispatch;
pub use error::{EnforcementError, JoinError, RuleError, SessionError};
pub use moderation::{RuleStore, Rules};
pub use session::Session;
pub use supervisor::Supervisor;
pub use tasks::TaskGroup;
