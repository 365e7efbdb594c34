pub mod address;
pub mod collection;
pub mod config;
pub mod text;

pub use collection::Collection;
pub use config::{
    AccountConfig, AllCapsConfig, BayesConfig, BotConfig, Config, ConfigError, LoggingConfig,
    RoomConfig, StatusConfig, TimingConfig,
};
