pub mod engine;
pub mod rules;

pub use engine::{BAN_ID, Trigger, Verdict, check_message, check_presence, squash};
pub use rules::{BlacklistRule, RuleStore, Rules, Scope, WhitelistRule};
