use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Name of the user attribute holding the subscriber id
    #[serde(default = "default_user_token")]
    pub user_token: String,
    /// Number of items to show, seeded into every new session
    #[serde(default = "default_items")]
    pub default_items: u32,
    /// Inactivity window in minutes for sessions that are not yet initialized
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u64,
    /// Send the session cookie over HTTPS only
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
    #[serde(default)]
    pub initializers: Vec<String>,
    #[serde(default)]
    pub news: Vec<NewsDefinitionConfig>,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_user_token() -> String {
    "user.login.id".to_string()
}

fn default_items() -> u32 {
    2
}

fn default_session_timeout() -> u64 {
    30
}

fn default_secure_cookies() -> bool {
    true
}

fn default_adapter() -> String {
    "rss".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsDefinitionConfig {
    pub name: String,
    pub url: String,
    /// Registry name of the adapter that fetches this feed
    #[serde(default = "default_adapter")]
    pub adapter: String,
    /// Roles whose members are subscribed to this feed automatically
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
