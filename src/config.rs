//! Configuration loading and management.
//!
//! Loads configuration from `./haggle.toml` (or `$HAGGLE_CONFIG_PATH`).
//! Environment variables override file values; file values override
//! defaults. Precedence: env vars > config file > defaults.
//!
//! The core pipeline never reads the environment itself -- everything is
//! passed down through constructors, so library consumers can configure
//! programmatically.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::experts::ExpertTokenCaps;
use crate::llm::{LlmService, RetryConfig};
use crate::pipeline::PipelineOptions;
use crate::providers::anthropic::ClaudeProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::LlmProvider;

/// Default model for Claude providers.
const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for OpenAI providers.
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
///
/// Path: `./haggle.toml` or `$HAGGLE_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HaggleConfig {
    /// LLM provider and retry settings (`[llm]`).
    pub llm: LlmConfig,
    /// Orchestrator loop settings (`[orchestrator]`).
    pub orchestrator: OrchestratorConfig,
    /// Per-call token caps (`[experts]`).
    pub experts: ExpertsConfig,
}

/// Which vendor a provider block speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic messages API.
    Claude,
    /// OpenAI chat completions API.
    OpenAi,
}

/// One configured provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Vendor to speak to.
    pub provider: ProviderKind,
    /// API key.
    pub api_key: String,
    /// Model identifier; a vendor default applies when empty.
    #[serde(default)]
    pub model: String,
}

impl ProviderConfig {
    /// The configured model, or the vendor default.
    pub fn model_or_default(&self) -> &str {
        if !self.model.is_empty() {
            return &self.model;
        }
        match self.provider {
            ProviderKind::Claude => DEFAULT_CLAUDE_MODEL,
            ProviderKind::OpenAi => DEFAULT_OPENAI_MODEL,
        }
    }

    fn instantiate(&self) -> Arc<dyn LlmProvider> {
        let model = self.model_or_default().to_owned();
        match self.provider {
            ProviderKind::Claude => Arc::new(ClaudeProvider::new(model, self.api_key.clone())),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(model, self.api_key.clone())),
        }
    }
}

/// LLM transport settings (`[llm]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Required primary provider (`[llm.primary]`).
    pub primary: Option<ProviderConfig>,
    /// Optional fallback provider (`[llm.fallback]`).
    pub fallback: Option<ProviderConfig>,
    /// Attempts per provider before moving on (≥ 1).
    pub max_retries_per_provider: u32,
    /// Fixed delay between attempts within a provider, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback: None,
            max_retries_per_provider: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Orchestrator loop settings (`[orchestrator]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum synthesis iterations per invocation.
    pub max_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_iterations: 2 }
    }
}

/// Optional per-call token caps (`[experts]`).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ExpertsConfig {
    /// Cap for extraction calls.
    pub extraction_max_tokens: Option<u32>,
    /// Cap for escalation calls.
    pub escalation_max_tokens: Option<u32>,
    /// Cap for needs calls.
    pub needs_max_tokens: Option<u32>,
    /// Cap for orchestrator synthesis calls.
    pub orchestrator_max_tokens: Option<u32>,
    /// Cap for drafting calls (counter/clarify/outreach).
    pub response_max_tokens: Option<u32>,
}

impl HaggleConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$HAGGLE_CONFIG_PATH` or `./haggle.toml`.
    /// A missing file is not an error -- defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit file path (or the resolved
    /// default when `None`), then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = Self::load_from_path(&resolved)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                toml::from_str(&contents).context("failed to parse config TOML")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("HAGGLE_CONFIG_PATH") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from("haggle.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(primary) = provider_from_env(&env, "HAGGLE_PRIMARY") {
            self.llm.primary = Some(primary);
        }
        if let Some(fallback) = provider_from_env(&env, "HAGGLE_FALLBACK") {
            self.llm.fallback = Some(fallback);
        }

        if let Some(v) = env("HAGGLE_MAX_RETRIES") {
            match v.parse() {
                Ok(n) => self.llm.max_retries_per_provider = n,
                Err(_) => tracing::warn!(
                    var = "HAGGLE_MAX_RETRIES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("HAGGLE_RETRY_DELAY_MS") {
            match v.parse() {
                Ok(n) => self.llm.retry_delay_ms = n,
                Err(_) => tracing::warn!(
                    var = "HAGGLE_RETRY_DELAY_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("HAGGLE_MAX_ITERATIONS") {
            match v.parse() {
                Ok(n) => self.orchestrator.max_iterations = n,
                Err(_) => tracing::warn!(
                    var = "HAGGLE_MAX_ITERATIONS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Build the retry/fallback service from the configured providers.
    ///
    /// # Errors
    ///
    /// Returns an error when no primary provider is configured.
    pub fn build_service(&self) -> Result<LlmService> {
        let primary = self
            .llm
            .primary
            .as_ref()
            .context("no primary provider configured (set [llm.primary] or HAGGLE_PRIMARY_*)")?;

        let retry = RetryConfig {
            max_retries_per_provider: self.llm.max_retries_per_provider.max(1),
            retry_delay: Duration::from_millis(self.llm.retry_delay_ms),
        };

        Ok(LlmService::new(
            primary.instantiate(),
            self.llm.fallback.as_ref().map(ProviderConfig::instantiate),
            retry,
        ))
    }

    /// Pipeline tuning derived from this config.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            max_iterations: self.orchestrator.max_iterations.max(1),
            expert_caps: ExpertTokenCaps {
                extraction: self.experts.extraction_max_tokens,
                escalation: self.experts.escalation_max_tokens,
                needs: self.experts.needs_max_tokens,
            },
            orchestrator_max_tokens: self.experts.orchestrator_max_tokens,
            response_max_tokens: self.experts.response_max_tokens,
        }
    }
}

/// Read one provider block from `{prefix}_PROVIDER/_API_KEY/_MODEL` env vars.
///
/// The API key's presence creates the block; the provider kind defaults to
/// `claude` and the model to the vendor default.
fn provider_from_env(
    env: &impl Fn(&str) -> Option<String>,
    prefix: &str,
) -> Option<ProviderConfig> {
    let api_key = env(&format!("{prefix}_API_KEY"))?;
    let provider = match env(&format!("{prefix}_PROVIDER")).as_deref() {
        Some("openai") => ProviderKind::OpenAi,
        Some("claude") | None => ProviderKind::Claude,
        Some(other) => {
            tracing::warn!(value = other, "unknown provider kind, defaulting to claude");
            ProviderKind::Claude
        }
    };
    Some(ProviderConfig {
        provider,
        api_key,
        model: env(&format!("{prefix}_MODEL")).unwrap_or_default(),
    })
}
