use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::persona::DEFAULT_PERSONA_JSON;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token for chat routes. Optional only on localhost.
    pub api_key: Option<String>,
    /// Bearer token for persona and cache administration.
    pub admin_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind: default_bind(),
            api_key: None,
            admin_key: None,
        }
    }
}

fn default_name() -> String {
    "Peter CGI Assistant".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    /// Base URL for the API. Optional — each provider has a sensible default.
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; PeterCGI-Assistant/1.0)".to_string()
}

fn default_max_chars() -> usize {
    5000
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

impl StorageConfig {
    pub fn persona_path(&self) -> PathBuf {
        self.base_dir.join("persona.json")
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".persona-chat")
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    parse(&content)
}

fn parse(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
    if let Some(expanded) = config.storage.base_dir.to_str().map(expand_tilde) {
        config.storage.base_dir = expanded;
    }
    Ok(config)
}

pub async fn init_config_dir() -> Result<PathBuf> {
    let base = default_base_dir();
    tokio::fs::create_dir_all(base.join("conversations")).await?;

    let persona = base.join("persona.json");
    if !persona.exists() {
        tokio::fs::write(&persona, DEFAULT_PERSONA_JSON).await?;
    }

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        tokio::fs::write(
            &config_path,
            r#"[server]
name = "Peter CGI Assistant"
bind = "127.0.0.1:3001"
# api_key = "CHAT_TOKEN"     # required for non-localhost binds
# admin_key = "ADMIN_TOKEN"  # required for non-localhost binds

[llm]
provider = "openai"
# base_url = "https://api.openai.com/v1"  # optional, uses provider default
model = "gpt-4o"
api_key = "YOUR_API_KEY"
max_tokens = 2000
temperature = 0.7

# Other provider examples:
# provider = "anthropic"
# model = "claude-sonnet-4-5-20250929"
#
# provider = "openrouter"
# model = "openai/gpt-4o"

[fetcher]
timeout_secs = 10
max_chars = 5000

# [storage]
# base_dir = "~/.persona-chat"
"#,
        )
        .await?;
    }

    Ok(base)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse(
            r#"
[llm]
provider = "openai"
api_key = "k"
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3001");
        assert!(cfg.server.admin_key.is_none());
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.llm.max_tokens, 2000);
        assert_eq!(cfg.fetcher.timeout_secs, 10);
        assert_eq!(cfg.fetcher.max_chars, 5000);
        assert!(cfg.fetcher.user_agent.contains("PeterCGI-Assistant"));
        assert!(cfg.storage.persona_path().ends_with(".persona-chat/persona.json"));
    }

    #[test]
    fn test_storage_dir_tilde_is_expanded() {
        let cfg = parse(
            r#"
[llm]
provider = "anthropic"
api_key = "k"

[storage]
base_dir = "~/chat-data"
"#,
        )
        .unwrap();
        assert!(!cfg.storage.base_dir.starts_with("~"));
        assert!(cfg.storage.base_dir.ends_with("chat-data"));
    }

    #[test]
    fn test_missing_llm_section_fails() {
        assert!(parse("[server]\nbind = \"0.0.0.0:80\"\n").is_err());
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/x.toml"), PathBuf::from("/etc/x.toml"));
    }
}
