pub use self::parser::{Config, ConfigSource, DiscordConfig, LimitsConfig, LoggingConfig, TaskEntry};
pub use self::validator::ConfigError;

mod parser;
mod validator;
