use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::DEFAULT_API_URL;
use crate::outreach::pipeline::{GatePolicy, PipelineSettings};
use crate::outreach::prompts::LengthLimit;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub anthropic_api_url: String,
    pub port: u16,
    pub rust_log: String,
    pub gate_policy: GatePolicy,
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub row_timeout_secs: u64,
    pub max_attempts: u32,
    pub max_sentences: u32,
    /// Word bound; takes precedence over `max_sentences` when set.
    pub max_words: Option<u32>,
    pub temperature: f32,
    pub output_column: String,
    pub max_upload_mb: usize,
    pub job_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            anthropic_api_url: env_or("ANTHROPIC_API_URL", DEFAULT_API_URL.to_string())?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            gate_policy: env_or("GATE_POLICY", GatePolicy::RequireBoth)?,
            chunk_size: env_or("CHUNK_SIZE", 100)?,
            max_concurrency: env_or("MAX_CONCURRENCY", 4)?,
            row_timeout_secs: env_or("ROW_TIMEOUT_SECS", 60)?,
            max_attempts: env_or("MAX_ATTEMPTS", 3)?,
            max_sentences: env_or("MAX_SENTENCES", 5)?,
            max_words: optional_env("MAX_WORDS")?,
            temperature: env_or("TEMPERATURE", 0.7)?,
            output_column: env_or("OUTPUT_COLUMN", "GeneratedEmail".to_string())?,
            max_upload_mb: env_or("MAX_UPLOAD_MB", 20)?,
            job_ttl_secs: env_or("JOB_TTL_SECS", 3600)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(anyhow!("CHUNK_SIZE must be at least 1"));
        }
        if self.max_concurrency == 0 {
            return Err(anyhow!("MAX_CONCURRENCY must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("MAX_ATTEMPTS must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(anyhow!("TEMPERATURE must be between 0.0 and 1.0"));
        }
        if self.output_column.trim().is_empty() {
            return Err(anyhow!("OUTPUT_COLUMN must not be empty"));
        }
        Ok(())
    }

    /// Settings handed to the row pipeline at construction.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            gate: self.gate_policy,
            chunk_size: self.chunk_size,
            max_concurrency: self.max_concurrency,
            row_timeout: Duration::from_secs(self.row_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            length: match self.max_words {
                Some(words) => LengthLimit::Words(words),
                None => LengthLimit::Sentences(self.max_sentences),
            },
            temperature: self.temperature,
            output_column: self.output_column.clone(),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            anthropic_api_key: "test-key".to_string(),
            anthropic_api_url: DEFAULT_API_URL.to_string(),
            port: 8080,
            rust_log: "info".to_string(),
            gate_policy: GatePolicy::RequireBoth,
            chunk_size: 100,
            max_concurrency: 4,
            row_timeout_secs: 60,
            max_attempts: 1,
            max_sentences: 5,
            max_words: None,
            temperature: 0.7,
            output_column: "GeneratedEmail".to_string(),
            max_upload_mb: 20,
            job_ttl_secs: 3600,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(None),
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(optional_env(key)?.unwrap_or(default))
}
