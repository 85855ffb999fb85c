//! Runtime configuration for the documentation engine.
//!
//! The CLI assembles a `Config` from flags and environment variables; the
//! engine validates it once before the run starts. Invalid configuration is
//! fatal (`EngineError::ConfigInvalid`, exit code 4).

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default bound on in-flight leaf generations.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Default completion cap for documentation requests.
pub const DEFAULT_MAX_TOKENS: u64 = 8_192;
/// Default completion cap for clustering requests.
pub const DEFAULT_MAX_TOKEN_PER_MODULE: u64 = 8_192;
/// Default token budget above which a component set is partitioned further.
pub const DEFAULT_MAX_TOKEN_PER_LEAF_MODULE: u64 = 16_384;
/// Default recursion cap for the module tree.
pub const DEFAULT_MAX_DEPTH: u32 = 2;

/// Environment variables honored by `Config::apply_env_overrides`.
const ENV_BASE_URL: &str = "DOCWEAVE_BASE_URL";
const ENV_API_KEY: &str = "DOCWEAVE_API_KEY";
const ENV_MAIN_MODEL: &str = "DOCWEAVE_MAIN_MODEL";
const ENV_CLUSTER_MODEL: &str = "DOCWEAVE_CLUSTER_MODEL";
const ENV_FALLBACK_MODELS: &str = "DOCWEAVE_FALLBACK_MODELS";

/// Validated runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Output directory for all generated artifacts.
    pub docs_dir: PathBuf,
    /// Root of the repository being documented; readable by agent tools.
    pub repo_dir: PathBuf,
    /// Completion cap for leaf/overview documentation requests.
    pub max_tokens: u64,
    /// Completion cap for clustering requests.
    pub max_token_per_module: u64,
    /// Token budget above which a component set is partitioned further.
    pub max_token_per_leaf_module: u64,
    /// Maximum module tree depth; the depth cap overrides the budget.
    pub max_depth: u32,
    /// Bound on in-flight leaf generations.
    pub concurrency: usize,
    /// Primary model for documentation generation.
    pub main_model: String,
    /// Model used by the partition oracle; defaults to `main_model`.
    #[serde(default)]
    pub cluster_model: Option<String>,
    /// Fallback models tried in order after the primary.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Chat-completions endpoint base URL.
    #[serde(default)]
    pub base_url: String,
    /// Bearer token for the endpoint.
    #[serde(default)]
    pub api_key: String,
    /// External agent command line; when set, generation runs in
    /// subprocess mode and the gateway tries this command first.
    #[serde(default)]
    pub agent_cmd: Option<String>,
    /// Extra instructions appended verbatim to every system prompt.
    #[serde(default)]
    pub custom_instructions: Option<String>,
    /// Stop the run at the first module failure instead of continuing
    /// with sibling branches.
    #[serde(default)]
    pub fail_fast: bool,
}

impl Config {
    /// Create a config with required paths and model, defaulting everything
    /// else.
    pub fn new(docs_dir: PathBuf, repo_dir: PathBuf, main_model: impl Into<String>) -> Self {
        Self {
            docs_dir,
            repo_dir,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_token_per_module: DEFAULT_MAX_TOKEN_PER_MODULE,
            max_token_per_leaf_module: DEFAULT_MAX_TOKEN_PER_LEAF_MODULE,
            max_depth: DEFAULT_MAX_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
            main_model: main_model.into(),
            cluster_model: None,
            fallback_models: Vec::new(),
            base_url: String::new(),
            api_key: String::new(),
            agent_cmd: None,
            custom_instructions: None,
            fail_fast: false,
        }
    }

    /// Fill unset credential and model fields from the environment.
    ///
    /// CLI flags win over environment variables, so only empty fields are
    /// touched.
    pub fn apply_env_overrides(&mut self) {
        if self.base_url.is_empty() {
            if let Ok(v) = std::env::var(ENV_BASE_URL) {
                self.base_url = v;
            }
        }
        if self.api_key.is_empty() {
            if let Ok(v) = std::env::var(ENV_API_KEY) {
                self.api_key = v;
            }
        }
        if self.main_model.is_empty() {
            if let Ok(v) = std::env::var(ENV_MAIN_MODEL) {
                self.main_model = v;
            }
        }
        if self.cluster_model.is_none() {
            if let Ok(v) = std::env::var(ENV_CLUSTER_MODEL) {
                if !v.is_empty() {
                    self.cluster_model = Some(v);
                }
            }
        }
        if self.fallback_models.is_empty() {
            if let Ok(v) = std::env::var(ENV_FALLBACK_MODELS) {
                self.fallback_models = v
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
        }
    }

    /// Model used for clustering requests.
    pub fn cluster_model(&self) -> &str {
        self.cluster_model.as_deref().unwrap_or(&self.main_model)
    }

    /// Repository name derived from `repo_dir`, used for root naming.
    pub fn repo_name(&self) -> String {
        self.repo_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string())
    }

    /// Whether an HTTP backend is configured at all.
    pub fn has_http_backend(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty() && !self.main_model.is_empty()
    }

    /// Validate before the run starts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.docs_dir.as_os_str().is_empty() {
            return Err(EngineError::ConfigInvalid("docs_dir is empty".into()));
        }
        if self.repo_dir.as_os_str().is_empty() {
            return Err(EngineError::ConfigInvalid("repo_dir is empty".into()));
        }
        if self.concurrency < 1 {
            return Err(EngineError::ConfigInvalid(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.max_tokens == 0 || self.max_token_per_module == 0 {
            return Err(EngineError::ConfigInvalid(
                "token caps must be positive".into(),
            ));
        }
        if self.max_token_per_leaf_module == 0 {
            return Err(EngineError::ConfigInvalid(
                "max_token_per_leaf_module must be positive".into(),
            ));
        }
        let has_cmd = self.agent_cmd.as_deref().is_some_and(|c| !c.is_empty());
        if !has_cmd && !self.has_http_backend() {
            return Err(EngineError::ConfigInvalid(
                "no LLM backend configured: set base_url/api_key/main_model or agent_cmd".into(),
            ));
        }
        Ok(())
    }
}
