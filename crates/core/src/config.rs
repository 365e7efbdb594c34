use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_resource")]
    pub resource: String,
}

impl AccountConfig {
    /// Bare account address with the configured resource appended.
    pub fn full_jid(&self) -> String {
        crate::address::occupant_address(crate::address::bare(&self.jid), &self.resource)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Default nick used in rooms that do not override it.
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Canonical identities allowed to run administrative commands.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub startup_status: Vec<String>,
    #[serde(default)]
    pub ban_phrases_enabled: bool,
    #[serde(default)]
    pub ban_phrases: Vec<String>,
    pub whitelist_path: Option<PathBuf>,
    pub blacklist_path: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            command_prefix: default_command_prefix(),
            admins: Vec::new(),
            startup_status: Vec::new(),
            ban_phrases_enabled: false,
            ban_phrases: Vec::new(),
            whitelist_path: None,
            blacklist_path: None,
        }
    }
}

impl BotConfig {
    pub fn is_admin(&self, identity: &str) -> bool {
        let identity = crate::address::canonical(identity);
        self.admins
            .iter()
            .any(|admin| crate::address::canonical(admin) == identity)
    }

    pub fn whitelist_path(&self) -> PathBuf {
        self.whitelist_path
            .clone()
            .unwrap_or_else(|| default_rules_path("whitelist.json"))
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.blacklist_path
            .clone()
            .unwrap_or_else(|| default_rules_path("blacklist.json"))
    }
}

/// Timing constants, all in seconds except `ban_delay_ms`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
    #[serde(default = "default_server_ping_delay")]
    pub server_ping_delay: u64,
    #[serde(default = "default_room_ping_delay")]
    pub room_ping_delay: u64,
    #[serde(default = "default_room_rejoin_delay")]
    pub room_rejoin_delay: u64,
    #[serde(default = "default_ping_jitter")]
    pub ping_jitter: u64,
    #[serde(default)]
    pub ban_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connection_timeout: default_connection_timeout(),
            reconnect_delay: default_reconnect_delay(),
            server_ping_delay: default_server_ping_delay(),
            room_ping_delay: default_room_ping_delay(),
            room_rejoin_delay: default_room_rejoin_delay(),
            ping_jitter: default_ping_jitter(),
            ban_delay_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }

    pub fn server_ping_delay(&self) -> Duration {
        Duration::from_secs(self.server_ping_delay)
    }

    pub fn room_ping_delay(&self) -> Duration {
        Duration::from_secs(self.room_ping_delay)
    }

    pub fn room_rejoin_delay(&self) -> Duration {
        Duration::from_secs(self.room_rejoin_delay)
    }

    pub fn ban_delay(&self) -> Duration {
        Duration::from_millis(self.ban_delay_ms)
    }

    /// How long a sent server ping may stay unanswered before the link is
    /// declared stalled.
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(
            2 * (self.server_ping_delay + self.connection_timeout + self.ping_jitter),
        )
    }

    /// Number of 50 ms polls a join step may take.
    pub fn join_poll_budget(&self) -> u32 {
        u32::try_from(self.connection_timeout.saturating_mul(20)).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    /// Status texts rotated in every joined room.
    #[serde(default)]
    pub texts: Vec<String>,
    /// Seconds between rotations; zero sends one status and stops.
    #[serde(default)]
    pub rotation_interval: u64,
    #[serde(default)]
    pub rotation_jitter: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    /// Bare room address, e.g., `lobby@conference.example.com`.
    pub name: String,
    pub nick: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub all_caps: AllCapsConfig,
    #[serde(default)]
    pub bayes: BayesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllCapsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_all_caps_min_length")]
    pub min_length: usize,
}

impl Default for AllCapsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: default_all_caps_min_length(),
        }
    }
}

/// Accepted for compatibility with existing configuration files. The word
/// classifier is not part of this bot, so these values are only validated.
#[derive(Debug, Clone, Deserialize)]
pub struct BayesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bayes_min_length")]
    pub min_length: usize,
    #[serde(default = "default_bayes_min_words")]
    pub min_words: usize,
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: default_bayes_min_length(),
            min_words: default_bayes_min_words(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn room(&self, name: &str) -> Option<&RoomConfig> {
        self.rooms
            .iter()
            .find(|room| room.name.eq_ignore_ascii_case(name))
    }

    /// Nick the bot uses in `room`, falling back to the global default.
    pub fn nick_for(&self, room: &str) -> &str {
        self.room(room)
            .and_then(|room| room.nick.as_deref())
            .unwrap_or(&self.bot.nick)
    }
}

fn default_resource() -> String {
    "warden".to_string()
}

fn default_nick() -> String {
    "warden".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_server_ping_delay() -> u64 {
    60
}

fn default_room_ping_delay() -> u64 {
    900
}

fn default_room_rejoin_delay() -> u64 {
    3
}

fn default_ping_jitter() -> u64 {
    3
}

fn default_all_caps_min_length() -> usize {
    MIN_ALL_CAPS_LENGTH
}

fn default_bayes_min_length() -> usize {
    MIN_BAYES_LENGTH
}

fn default_bayes_min_words() -> usize {
    MIN_BAYES_WORDS
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const MIN_ALL_CAPS_LENGTH: usize = 10;
const MIN_BAYES_LENGTH: usize = 40;
const MIN_BAYES_WORDS: usize = 8;

const DEFAULT_CONFIG_TOML: &str = r#"[account]
jid = ""
password = ""
# server = "xmpp.example.com"
# port = 5222
resource = "warden"

[bot]
nick = "warden"
command_prefix = "!"
admins = []
startup_status = []
ban_phrases_enabled = false
ban_phrases = []
# whitelist_path = "/etc/warden/whitelist.json"
# blacklist_path = "/etc/warden/blacklist.json"

[timing]
connection_timeout = 10
reconnect_delay = 3
server_ping_delay = 60
room_ping_delay = 900
room_rejoin_delay = 3
ping_jitter = 3
ban_delay_ms = 0

[status]
texts = []
rotation_interval = 0
rotation_jitter = 0

# [[rooms]]
# name = "lobby@conference.example.com"
# nick = "warden"
# [rooms.all_caps]
# enabled = true
# min_length = 10

[logging]
level = "info"
"#;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "warden", "warden")
}

fn in_config_dir(file_name: &str) -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(file_name),
        |dirs| dirs.config_dir().join(file_name),
    )
}

/// Platform configuration file, e.g. `~/.config/warden/config.toml`.
pub fn config_path() -> PathBuf {
    in_config_dir("config.toml")
}

/// Default location of a rule file next to the configuration file.
pub fn default_rules_path(file_name: &str) -> PathBuf {
    in_config_dir(file_name)
}

/// Environment variables that replace values read from the file.
const ENV_OVERRIDES: &[(&str, fn(&mut Config, String))] = &[
    ("WARDEN_JID", |config, value| config.account.jid = value),
    ("WARDEN_PASSWORD", |config, value| config.account.password = value),
    ("WARDEN_SERVER", |config, value| config.account.server = Some(value)),
    ("WARDEN_LOG_LEVEL", |config, value| config.logging.level = value),
];

/// Load [`config_path`], applying `WARDEN_*` environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Load a specific file. A missing file is replaced by a commented template
/// and reported as [`ConfigError::FileNotFound`] so the operator can fill it in.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    let contents = read_or_seed(&path)?;
    parse_config(&contents, env_lookup)
}

pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    parse_config(toml_str, env_lookup)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn read_or_seed(path: &Path) -> Result<String, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, DEFAULT_CONFIG_TOML)?;
            Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(error) => Err(error.into()),
    }
}

fn parse_config(
    toml_str: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|error| {
        let (line, column) = error
            .span()
            .map_or((0, 0), |span| line_and_column(toml_str, span.start));
        ConfigError::InvalidToml {
            line,
            column,
            message: error.message().to_string(),
        }
    })?;

    for (name, apply) in ENV_OVERRIDES {
        if let Some(value) = lookup(name) {
            apply(&mut config, value);
        }
    }
    clamp_thresholds(&mut config);
    validate(&config)?;
    Ok(config)
}

/// One-based line and column of a byte offset.
fn line_and_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map_or(0, |newline| newline + 1) + 1;
    (line, column)
}

/// Raise moderation thresholds that are below their floor.
fn clamp_thresholds(config: &mut Config) {
    for room in &mut config.rooms {
        if room.all_caps.min_length < MIN_ALL_CAPS_LENGTH {
            warn!(
                room = %room.name,
                configured = room.all_caps.min_length,
                "all_caps.min_length below minimum, using {MIN_ALL_CAPS_LENGTH}"
            );
            room.all_caps.min_length = MIN_ALL_CAPS_LENGTH;
        }
        room.bayes.min_length = room.bayes.min_length.max(MIN_BAYES_LENGTH);
        room.bayes.min_words = room.bayes.min_words.max(MIN_BAYES_WORDS);
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let account = &config.account;
    let missing: Vec<String> = [
        ("account.jid", account.jid.is_empty()),
        ("account.password", account.password.is_empty()),
    ]
    .into_iter()
    .filter_map(|(field, absent)| absent.then(|| field.to_string()))
    .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    if !account.jid.contains('@') {
        return Err(invalid("account.jid", "must have the form user@domain"));
    }
    for (field, value) in [
        ("account.resource", &account.resource),
        ("bot.nick", &config.bot.nick),
        ("bot.command_prefix", &config.bot.command_prefix),
    ] {
        if value.is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
    }

    let timing = &config.timing;
    for (field, seconds) in [
        ("timing.connection_timeout", timing.connection_timeout),
        ("timing.server_ping_delay", timing.server_ping_delay),
        ("timing.room_ping_delay", timing.room_ping_delay),
    ] {
        if seconds == 0 {
            return Err(invalid(field, "must be at least 1 second"));
        }
    }

    for (index, room) in config.rooms.iter().enumerate() {
        if !room.name.contains('@') || room.name.contains('/') {
            return Err(invalid(
                format!("rooms[{index}].name"),
                "must be a bare room address like room@service",
            ));
        }
        if room.nick.as_deref() == Some("") {
            return Err(invalid(
                format!("rooms[{index}].nick"),
                "must not be empty when set",
            ));
        }
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!("expected one of {}", LOG_LEVELS.join("/")),
        ));
    }
    Ok(())
}
