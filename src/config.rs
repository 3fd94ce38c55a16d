//! Configuration parsed from environment variables.
//!
//! `main` loads a `.env` file first (when present), so everything here reads
//! the plain process environment.

use crate::reachability::ProbeConfig;
use crate::session::SessionConfig;
use anyhow::{Result, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://127.0.0.1:11434/api/chat";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:latest";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:443";
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Ollama(OllamaConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub session: SessionConfig,
    pub probe: ProbeConfig,
    pub data_dir: PathBuf,
    pub log_level: tracing::Level,
}

impl AppConfig {
    /// Build typed configuration from environment variables.
    ///
    /// Provider priority:
    /// 1. `OPENAI_API_KEY` → OpenAI-compatible endpoint (`OPENAI_MODEL`, `OPENAI_BASE_URL`)
    /// 2. `LLM_USE_OLLAMA=true` → local Ollama (`LLM_MODEL`, `OLLAMA_ENDPOINT`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let temperature = parse_or(&lookup, "LLM_TEMPERATURE", DEFAULT_TEMPERATURE);
        let connect_timeout = Duration::from_secs(parse_or(
            &lookup,
            "LLM_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));

        let provider = if let Some(api_key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            ProviderConfig::OpenAi(OpenAiConfig {
                api_key: api_key.trim().to_string(),
                model: lookup("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                base_url: lookup("OPENAI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                temperature,
                connect_timeout,
            })
        } else if flag(lookup("LLM_USE_OLLAMA").as_deref()) {
            ProviderConfig::Ollama(OllamaConfig {
                endpoint: lookup("OLLAMA_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_OLLAMA_ENDPOINT.to_string()),
                model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
                temperature,
                connect_timeout,
            })
        } else {
            bail!("No AI provider configured. Set OPENAI_API_KEY, or LLM_USE_OLLAMA=true for local Ollama");
        };

        let session = SessionConfig {
            stream_timeout: Duration::from_secs(parse_or(
                &lookup,
                "JUMPCHAT_STREAM_TIMEOUT_SECS",
                DEFAULT_STREAM_TIMEOUT_SECS,
            )),
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "JUMPCHAT_IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )),
        };

        let probe = ProbeConfig {
            addr: lookup("JUMPCHAT_PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string()),
            interval: Duration::from_secs(parse_or(
                &lookup,
                "JUMPCHAT_PROBE_INTERVAL_SECS",
                DEFAULT_PROBE_INTERVAL_SECS,
            )),
            timeout: connect_timeout,
        };

        let data_dir = lookup("JUMPCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let log_level = parse_or(&lookup, "JUMPCHAT_LOG", tracing::Level::INFO);

        Ok(Self {
            provider,
            session,
            probe,
            data_dir,
            log_level,
        })
    }
}

/// Platform data directory, falling back to a relative `cache/` folder.
pub fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join("jumpchat");
    }
    PathBuf::from("cache").join("jumpchat")
}

fn flag(raw: Option<&str>) -> bool {
    matches!(
        raw.unwrap_or("false").trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable config value");
            default
        }),
        None => default,
    }
}
