//! Whitelist and blacklist rule files.
//!
//! Both files are JSON. A rule with an empty `room` applies to every room.
//!
//! ```json
//! { "whitelist": [ { "room": "", "identities": ["admin@example.com"] } ] }
//! { "blacklist": [ { "room": "lobby@conference.example.com", "reason_enable": true,
//!                    "identity_re": ["^spammer@"], "nick_re": [], "phrase_re": [] } ] }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};
use warden_core::address;

use crate::error::RuleError;

const WHITELIST_SIZE_LIMIT: u64 = 2 * 1024 * 1024;
const BLACKLIST_SIZE_LIMIT: u64 = 16 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    whitelist: Vec<WhitelistEntry>,
}

#[derive(Debug, Deserialize)]
struct WhitelistEntry {
    #[serde(default, alias = "room_name")]
    room: String,
    #[serde(default, alias = "jid")]
    identities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlacklistFile {
    #[serde(default)]
    blacklist: Vec<BlacklistEntry>,
}

#[derive(Debug, Deserialize)]
struct BlacklistEntry {
    #[serde(default, alias = "room_name")]
    room: String,
    #[serde(default)]
    reason_enable: bool,
    #[serde(default, alias = "jid_re")]
    identity_re: Vec<String>,
    #[serde(default)]
    nick_re: Vec<String>,
    #[serde(default)]
    phrase_re: Vec<String>,
}

/// Which rooms a rule applies to. Rooms are canonical bare addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Room(String),
}

impl Scope {
    fn parse(room: &str) -> Self {
        let room = room.trim();
        if room.is_empty() {
            Self::Global
        } else {
            Self::Room(address::canonical(room))
        }
    }

    pub fn covers(&self, room: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Room(scoped) => *scoped == address::canonical(room),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhitelistRule {
    pub scope: Scope,
    identities: HashSet<String>,
}

impl WhitelistRule {
    pub fn exempts(&self, identity: &str) -> bool {
        self.identities.contains(&address::canonical(identity))
    }
}

#[derive(Debug, Clone)]
pub struct BlacklistRule {
    pub scope: Scope,
    /// Whether a ban issued by this rule records a timestamped reason.
    pub reason_enable: bool,
    pub identity: Vec<Regex>,
    pub nick: Vec<Regex>,
    pub phrase: Vec<Regex>,
}

impl BlacklistRule {
    pub fn match_phrase(&self, text: &str) -> Option<&Regex> {
        self.phrase.iter().find(|re| re.is_match(text))
    }
}

/// Compile every non-empty pattern. One bad pattern rejects the whole rule.
fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, (String, regex::Error)> {
    patterns
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| Regex::new(pattern).map_err(|error| (pattern.clone(), error)))
        .collect()
}

impl BlacklistRule {
    fn compile(entry: BlacklistEntry) -> Result<Self, (String, regex::Error)> {
        Ok(Self {
            scope: Scope::parse(&entry.room),
            reason_enable: entry.reason_enable,
            identity: compile_all(&entry.identity_re)?,
            nick: compile_all(&entry.nick_re)?,
            phrase: compile_all(&entry.phrase_re)?,
        })
    }
}

/// One consistent whitelist/blacklist pair.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    whitelist: Vec<WhitelistRule>,
    blacklist: Vec<BlacklistRule>,
}

impl Rules {
    fn build(whitelist: WhitelistFile, blacklist: BlacklistFile) -> Self {
        let whitelist = whitelist
            .whitelist
            .into_iter()
            .map(|entry| WhitelistRule {
                scope: Scope::parse(&entry.room),
                identities: entry
                    .identities
                    .iter()
                    .map(|identity| address::canonical(identity))
                    .collect(),
            })
            .collect();

        let blacklist = blacklist
            .blacklist
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let room = entry.room.clone();
                match BlacklistRule::compile(entry) {
                    Ok(rule) => Some(rule),
                    Err((pattern, error)) => {
                        warn!(
                            rule = index,
                            room = %room,
                            pattern = %pattern,
                            error = %error,
                            "skipping blacklist rule with invalid regex"
                        );
                        None
                    }
                }
            })
            .collect();

        Self {
            whitelist,
            blacklist,
        }
    }

    /// Parse both rule sets from JSON text.
    pub fn from_json(whitelist: &str, blacklist: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::build(
            serde_json::from_str(whitelist)?,
            serde_json::from_str(blacklist)?,
        ))
    }

    pub fn is_whitelisted(&self, room: &str, identity: &str) -> bool {
        self.whitelist
            .iter()
            .any(|rule| rule.scope.covers(room) && rule.exempts(identity))
    }

    /// Blacklist rules that apply to `room`: global rules first, then the
    /// room's own, each in file order.
    pub fn blacklist_for<'a>(&'a self, room: &'a str) -> impl Iterator<Item = &'a BlacklistRule> {
        let global = self
            .blacklist
            .iter()
            .filter(|rule| rule.scope == Scope::Global);
        let scoped = self
            .blacklist
            .iter()
            .filter(move |rule| matches!(&rule.scope, Scope::Room(_)) && rule.scope.covers(room));
        global.chain(scoped)
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }
}

fn read_rule_file(path: &Path, limit: u64) -> Result<Option<String>, RuleError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RuleError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if metadata.len() > limit {
        return Err(RuleError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit,
        });
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_rule_file<T>(path: &Path, limit: u64) -> Result<T, RuleError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match read_rule_file(path, limit)? {
        Some(content) => serde_json::from_str(&content).map_err(|source| RuleError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            warn!(path = %path.display(), "rule file not found, using an empty rule set");
            Ok(T::default())
        }
    }
}

/// Rules shared by every session, swapped atomically on reload.
#[derive(Debug)]
pub struct RuleStore {
    whitelist_path: PathBuf,
    blacklist_path: PathBuf,
    current: RwLock<Arc<Rules>>,
}

impl RuleStore {
    pub fn load(whitelist_path: PathBuf, blacklist_path: PathBuf) -> Result<Self, RuleError> {
        let rules = Self::read(&whitelist_path, &blacklist_path)?;
        Ok(Self {
            whitelist_path,
            blacklist_path,
            current: RwLock::new(Arc::new(rules)),
        })
    }

    /// A store with fixed rules and no backing files.
    pub fn from_rules(rules: Rules) -> Self {
        Self {
            whitelist_path: PathBuf::new(),
            blacklist_path: PathBuf::new(),
            current: RwLock::new(Arc::new(rules)),
        }
    }

    fn read(whitelist_path: &Path, blacklist_path: &Path) -> Result<Rules, RuleError> {
        let whitelist: WhitelistFile = parse_rule_file(whitelist_path, WHITELIST_SIZE_LIMIT)?;
        let blacklist: BlacklistFile = parse_rule_file(blacklist_path, BLACKLIST_SIZE_LIMIT)?;
        let rules = Rules::build(whitelist, blacklist);
        info!(
            whitelist = rules.whitelist_len(),
            blacklist = rules.blacklist_len(),
            "rules loaded"
        );
        Ok(rules)
    }

    pub fn current(&self) -> Arc<Rules> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Re-read both files. The previous rules stay active unless both parse.
    pub fn reload(&self) -> Result<Arc<Rules>, RuleError> {
        let rules = Arc::new(Self::read(&self.whitelist_path, &self.blacklist_path)?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&rules);
        Ok(rules)
    }
}
