use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use super::ConfigError;

const CONFIG_TEMPLATE: &str = r#"# discord-mirror configuration
#
# Every entry under `tasks` mirrors one Discord channel into one webhook.
#
#   account_token   token used to read the source channel
#   channel_id      id of the source channel
#   webhook_url     webhook that receives the mirrored messages
#   incognito_mode  true replaces author names with user1, user2, ...
#   delay           seconds to wait between polls (integer or float)
#
# tasks:
#   - account_token: "your-account-token"
#     channel_id: "123456789012345678"
#     webhook_url: "https://discord.com/api/webhooks/<id>/<token>"
#     incognito_mode: false
#     delay: 30

discord:
  api_base: "https://discord.com/api/v9"
  fetch_limit: 5

storage:
  ledger_file: "ids.txt"
  aliases_file: "custom_names.json"

logging:
  level: "info"
  error_file: "console.log"

tasks: []
"#;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            fetch_limit: default_fetch_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
    #[serde(default = "default_aliases_file")]
    pub aliases_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_file: default_ledger_file(),
            aliases_file: default_aliases_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_error_file")]
    pub error_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            error_file: default_error_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_client_error_delay_secs")]
    pub client_error_delay_secs: u64,
    #[serde(default = "default_unknown_error_delay_secs")]
    pub unknown_error_delay_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            client_error_delay_secs: default_client_error_delay_secs(),
            unknown_error_delay_secs: default_unknown_error_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_alias_pattern")]
    pub alias_pattern: String,
    #[serde(default = "default_avatar_url_template")]
    pub avatar_url_template: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            alias_pattern: default_alias_pattern(),
            avatar_url_template: default_avatar_url_template(),
        }
    }
}

/// One row of the task list, as written by the operator.
///
/// `incognito_mode` and `delay` stay untyped until the task validator has
/// checked them.
#[derive(Debug, Deserialize)]
pub struct TaskEntry {
    #[serde(deserialize_with = "deserialize_secret")]
    pub account_token: SecretString,
    #[serde(deserialize_with = "deserialize_channel_id")]
    pub channel_id: String,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub incognito_mode: serde_yaml::Value,
    #[serde(default)]
    pub delay: serde_yaml::Value,
}

/// Result of [`Config::load_or_bootstrap`].
#[derive(Debug)]
pub enum ConfigSource {
    Loaded(Config),
    /// The file did not exist; a template was written and needs filling in.
    Created(PathBuf),
}

impl Config {
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> Result<ConfigSource, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            write_template(path)?;
            return Ok(ConfigSource::Created(path.to_path_buf()));
        }
        Self::load_from_file(path).map(ConfigSource::Loaded)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.api_base.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.api_base cannot be empty".to_string(),
            ));
        }

        if !(1..=100).contains(&self.discord.fetch_limit) {
            return Err(ConfigError::InvalidConfig(
                "discord.fetch_limit must be between 1 and 100".to_string(),
            ));
        }

        if self.storage.ledger_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.ledger_file cannot be empty".to_string(),
            ));
        }

        if self.storage.aliases_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "storage.aliases_file cannot be empty".to_string(),
            ));
        }

        if !self.identity.alias_pattern.contains(":n") {
            return Err(ConfigError::InvalidConfig(
                "identity.alias_pattern must contain the :n placeholder".to_string(),
            ));
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.discord.api_base = self.discord.api_base.trim().trim_end_matches('/').to_string();
        for task in &mut self.tasks {
            task.webhook_url = task.webhook_url.trim().to_string();
        }
    }
}

fn write_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw.trim().to_string()))
}

fn deserialize_channel_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChannelIdValue {
        Text(String),
        Number(u64),
    }

    match ChannelIdValue::deserialize(deserializer)? {
        ChannelIdValue::Text(id) => Ok(id.trim().to_string()),
        ChannelIdValue::Number(id) => Ok(id.to_string()),
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_fetch_limit() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "discord-mirror".to_string()
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from("ids.txt")
}

fn default_aliases_file() -> PathBuf {
    PathBuf::from("custom_names.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_error_file() -> Option<PathBuf> {
    Some(PathBuf::from("console.log"))
}

fn default_client_error_delay_secs() -> u64 {
    5
}

fn default_unknown_error_delay_secs() -> u64 {
    10
}

fn default_alias_pattern() -> String {
    "user:n".to_string()
}

fn default_avatar_url_template() -> String {
    "https://cdn.discordapp.com/avatars/:id/:avatar.png".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn template_parses_with_no_tasks() {
        let config = Config::from_yaml(CONFIG_TEMPLATE).expect("template parses");
        assert!(config.tasks.is_empty());
        assert_eq!(config.discord.fetch_limit, 5);
        assert_eq!(config.storage.ledger_file, PathBuf::from("ids.txt"));
    }

    #[test]
    fn task_entries_keep_raw_values() {
        let config = Config::from_yaml(
            r#"
tasks:
  - account_token: " abc "
    channel_id: 123456789012345678
    webhook_url: "https://discord.com/api/webhooks/1/x "
    incognito_mode: "yes"
    delay: soon
"#,
        )
        .expect("config parses");

        let task = &config.tasks[0];
        assert_eq!(task.account_token.expose_secret(), "abc");
        assert_eq!(task.channel_id, "123456789012345678");
        assert_eq!(task.webhook_url, "https://discord.com/api/webhooks/1/x");
        assert!(task.incognito_mode.is_string());
        assert!(task.delay.is_string());
    }

    #[test]
    fn missing_task_values_default_to_null() {
        let config = Config::from_yaml(
            r#"
tasks:
  - account_token: abc
    channel_id: "42"
"#,
        )
        .expect("config parses");

        assert!(config.tasks[0].incognito_mode.is_null());
        assert!(config.tasks[0].delay.is_null());
    }

    #[test]
    fn validate_rejects_out_of_range_fetch_limit() {
        let err = Config::from_yaml("discord:\n  fetch_limit: 0\n").unwrap_err();
        assert!(err.to_string().contains("fetch_limit"));
    }

    #[test]
    fn validate_rejects_alias_pattern_without_counter() {
        let err = Config::from_yaml("identity:\n  alias_pattern: anon\n").unwrap_err();
        assert!(err.to_string().contains(":n"));
    }

    #[test]
    fn api_base_is_normalized() {
        let config = Config::from_yaml("discord:\n  api_base: \"http://localhost:1/api/ \"\n")
            .expect("config parses");
        assert_eq!(config.discord.api_base, "http://localhost:1/api");
    }

    #[test]
    fn load_or_bootstrap_writes_template_when_missing() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("mirror.yaml");

        let first = Config::load_or_bootstrap(&path).expect("bootstrap");
        assert!(matches!(first, ConfigSource::Created(ref created) if created == &path));
        assert!(path.exists());

        let second = Config::load_or_bootstrap(&path).expect("load");
        match second {
            ConfigSource::Loaded(config) => assert!(config.tasks.is_empty()),
            ConfigSource::Created(_) => panic!("template should only be written once"),
        }
    }
}
