//! Provider-abstract LLM gateway with a cascading fallback chain.
//!
//! A request flows through the configured backends in order — subprocess
//! first when an agent command is set, then the primary HTTP model, then
//! each fallback model — and the first success wins. Every backend failure
//! is recorded; when the whole cascade fails the caller receives
//! [`LlmError::Exhausted`] carrying the ordered error list.

pub mod http;
pub mod subprocess;

use crate::config::Config;
use crate::errors::LlmError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use http::HttpBackend;
pub use subprocess::CmdBackend;

/// What a request is for. Selects the model and completion cap; nothing
/// else about gateway behavior depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Cluster,
    LeafDoc,
    Overview,
    Translate,
}

/// One request as seen by a backend.
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u64,
}

/// A single backend in the cascade.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short label used in error reports and logs.
    fn label(&self) -> String;

    async fn invoke(
        &self,
        inv: &LlmInvocation,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

/// The cascade of backends plus the purpose → (model, cap) mapping.
pub struct Gateway {
    cmd: Option<CmdBackend>,
    http: Option<HttpBackend>,
    main_model: String,
    cluster_model: String,
    fallback_models: Vec<String>,
    max_tokens: u64,
    max_token_per_module: u64,
    /// Backends that actually served at least one request this run.
    used: std::sync::Mutex<std::collections::BTreeSet<String>>,
}

impl Gateway {
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let cmd = config
            .agent_cmd
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(CmdBackend::new);
        let http = if config.has_http_backend() {
            Some(HttpBackend::new(&config.base_url, config.api_key.clone())?)
        } else {
            None
        };
        if cmd.is_none() && http.is_none() {
            return Err(LlmError::Misconfiguration(
                "neither agent_cmd nor an HTTP endpoint is configured".into(),
            ));
        }
        Ok(Self {
            cmd,
            http,
            main_model: config.main_model.clone(),
            cluster_model: config.cluster_model().to_string(),
            fallback_models: config.fallback_models.clone(),
            max_tokens: config.max_tokens,
            max_token_per_module: config.max_token_per_module,
            used: std::sync::Mutex::new(std::collections::BTreeSet::new()),
        })
    }

    /// Models (and "subprocess") that served at least one request.
    pub fn used_models(&self) -> Vec<String> {
        self.used
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record_use(&self, label: &str) {
        if let Ok(mut set) = self.used.lock() {
            set.insert(label.to_string());
        }
    }

    /// Primary model and completion cap for a purpose.
    fn caps_for(&self, purpose: Purpose) -> (&str, u64) {
        match purpose {
            Purpose::Cluster => (&self.cluster_model, self.max_token_per_module),
            Purpose::LeafDoc | Purpose::Overview | Purpose::Translate => {
                (&self.main_model, self.max_tokens)
            }
        }
    }

    /// Send one prompt through the cascade and return the first success.
    pub async fn complete(
        &self,
        purpose: Purpose,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let (primary_model, max_tokens) = self.caps_for(purpose);
        let mut errors: Vec<String> = Vec::new();

        if let Some(cmd) = &self.cmd {
            let inv = LlmInvocation {
                prompt: prompt.to_string(),
                model: String::new(),
                max_tokens,
            };
            match cmd.invoke(&inv, cancel).await {
                Ok(text) => {
                    self.record_use("subprocess");
                    return Ok(text);
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(backend = %cmd.label(), error = %err, "Backend failed, cascading");
                    errors.push(format!("{}: {err}", cmd.label()));
                }
            }
        }

        if let Some(http) = &self.http {
            let mut tried = std::collections::HashSet::new();
            let models = std::iter::once(primary_model.to_string())
                .chain(self.fallback_models.iter().cloned())
                .filter(|m| !m.is_empty() && tried.insert(m.clone()));

            for model in models {
                if cancel.is_cancelled() {
                    return Err(LlmError::Cancelled);
                }
                let inv = LlmInvocation {
                    prompt: prompt.to_string(),
                    model: model.clone(),
                    max_tokens,
                };
                match http.invoke(&inv, cancel).await {
                    Ok(text) => {
                        debug!(model = %model, "Gateway request served");
                        self.record_use(&model);
                        return Ok(text);
                    }
                    Err(err) if err.is_cancelled() => return Err(err),
                    Err(err) => {
                        warn!(model = %model, error = %err, "Backend failed, cascading");
                        errors.push(format!("http({model}): {err}"));
                    }
                }
            }
        }

        Err(LlmError::Exhausted { errors })
    }
}

/// Shared handle used by the clusterer and orchestrator.
pub type SharedGateway = Arc<Gateway>;

/// Purpose-tagged completion capability. The orchestrator depends on this
/// trait rather than [`Gateway`] directly so tests can script responses.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn text(
        &self,
        purpose: Purpose,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl Completion for Gateway {
    async fn text(
        &self,
        purpose: Purpose,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.complete(purpose, prompt, cancel).await
    }
}
