//! Command-line argument groups and the explicit settings built from them.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Args;

use crate::driver::{DriverConfig, DEFAULT_CHECKPOINT_EVERY};

/// Connection settings for the vision-model client.
#[derive(Clone)]
pub struct ClientSettings {
    /// Provider credential.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Attempts per call, including the first one.
    pub max_attempts: usize,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Model/client flags shared by the binaries that call the provider.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// OpenAI API key used for every model call
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Vision-capable chat model
    #[arg(long, env = "ALTTEXT_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub openai_model: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(
        long,
        env = "ALTTEXT_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Max seconds to wait for each model call
    #[arg(long, env = "ALTTEXT_OPENAI_TIMEOUT_SECS", default_value_t = 60)]
    pub openai_timeout_secs: u64,

    /// Attempts per call; values above 1 retry rate limits and transient errors with backoff
    #[arg(long, env = "ALTTEXT_OPENAI_MAX_ATTEMPTS", default_value_t = 1)]
    pub max_attempts: usize,
}

impl ModelArgs {
    /// Builds client settings, failing when no credential is available.
    pub fn client_settings(&self) -> Result<ClientSettings> {
        let api_key = self
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set before any record is processed"))?;
        Ok(ClientSettings {
            api_key: api_key.to_string(),
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
            timeout: Duration::from_secs(self.openai_timeout_secs.max(1)),
            max_attempts: self.max_attempts.max(1),
        })
    }
}

/// Run-loop flags shared by the generation and judging binaries.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Directory receiving the per-run log file
    #[arg(long, env = "ALTTEXT_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Persist the processed prefix every N records
    #[arg(long, env = "ALTTEXT_CHECKPOINT_EVERY", default_value_t = DEFAULT_CHECKPOINT_EVERY)]
    pub checkpoint_every: usize,

    /// Number of concurrent workers (1 keeps processing strictly sequential)
    #[arg(long, env = "ALTTEXT_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Ignore an existing output artifact instead of resuming from it
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}

impl RunArgs {
    /// Converts the parsed flags into a driver configuration writing to `output`.
    /// `restored` is the number of records taken over from a previous output.
    pub fn driver_config(&self, output: PathBuf, restored: usize) -> DriverConfig {
        DriverConfig {
            output,
            checkpoint_every: self.checkpoint_every.max(1),
            workers: self.workers.max(1),
            keep_unvisited: restored > 0,
        }
    }
}
