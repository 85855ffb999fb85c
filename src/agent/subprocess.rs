//! Subprocess-mode orchestrator: one prompt in, raw Markdown out.
//!
//! The external agent receives the full prompt (system + user + complete
//! component sources + a strict output footer) on stdin with the docs
//! directory as its working directory, and its stdout becomes the module
//! document after fence-stripping (or `<OVERVIEW>` extraction for parents).

use crate::agent::{
    extract_overview, prompts, strip_code_fence, verify_written_doc, ModuleRequest, Orchestrator,
    ParentRequest, MIN_DOC_BYTES,
};
use crate::component::ComponentMap;
use crate::config::Config;
use crate::errors::EngineError;
use crate::llm::subprocess::CmdBackend;
use crate::tree::store::TreeStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct CmdOrchestrator {
    backend: CmdBackend,
    config: Arc<Config>,
    components: Arc<ComponentMap>,
    store: TreeStore,
}

impl CmdOrchestrator {
    pub fn new(
        agent_cmd: String,
        config: Arc<Config>,
        components: Arc<ComponentMap>,
        store: TreeStore,
    ) -> Self {
        Self {
            backend: CmdBackend::new(agent_cmd),
            config,
            components,
            store,
        }
    }

    fn leaf_prompt(&self, request: &ModuleRequest) -> String {
        let system = prompts::leaf_system_prompt(
            &request.name,
            &request.path,
            &request.description,
            &request.tree_outline,
            self.config.custom_instructions.as_deref(),
        );
        let user = prompts::module_user_prompt(
            &request.name,
            &request.component_ids,
            &self.components,
            true,
        );
        format!("{system}\n\n{user}{}", prompts::CMD_AGENT_FOOTER)
    }

    fn parent_prompt(&self, request: &ParentRequest) -> String {
        let payload =
            prompts::overview_payload(&request.tree, &request.path, self.store.docs_dir());
        let structure = serde_json::to_string_pretty(&payload).unwrap_or_default();
        let body = match &request.name {
            Some(name) => prompts::module_overview_prompt(name, &structure),
            None => prompts::repo_overview_prompt(&self.config.repo_name(), &structure),
        };
        let extra = self
            .config
            .custom_instructions
            .as_deref()
            .map(|s| format!("\n{s}\n"))
            .unwrap_or_default();
        format!("{body}{extra}{}", prompts::CMD_OVERVIEW_FOOTER)
    }
}

#[async_trait]
impl Orchestrator for CmdOrchestrator {
    async fn process_module(
        &self,
        request: &ModuleRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let prompt = self.leaf_prompt(request);
        debug!(
            module = %request.name,
            prompt_chars = prompt.len(),
            "Piping module prompt to agent command"
        );

        let raw = self
            .backend
            .run(&prompt, Some(self.store.docs_dir()), cancel)
            .await
            .map_err(|e| match e {
                crate::errors::LlmError::Cancelled => EngineError::Cancelled,
                other => EngineError::module_failed(&request.name, other),
            })?;

        let markdown = strip_code_fence(&raw);
        if markdown.len() < MIN_DOC_BYTES {
            return Err(EngineError::module_failed(
                &request.name,
                format!("agent output too short ({} bytes)", markdown.len()),
            ));
        }

        self.store.write_markdown(&request.file_name, &markdown)?;
        verify_written_doc(&self.store, &request.name, &request.file_name, MIN_DOC_BYTES)?;
        info!(module = %request.name, file = %request.file_name, bytes = markdown.len(), "Wrote module documentation");
        Ok(())
    }

    async fn generate_parent_doc(
        &self,
        request: &ParentRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let label = request.name.clone().unwrap_or_else(|| "overview".to_string());
        let prompt = self.parent_prompt(request);
        debug!(module = %label, prompt_chars = prompt.len(), "Piping overview prompt to agent command");

        let raw = self
            .backend
            .run(&prompt, Some(self.store.docs_dir()), cancel)
            .await
            .map_err(|e| match e {
                crate::errors::LlmError::Cancelled => EngineError::Cancelled,
                other => EngineError::module_failed(&label, other),
            })?;

        let markdown = extract_overview(&raw);
        if markdown.len() < MIN_DOC_BYTES {
            return Err(EngineError::module_failed(
                &label,
                format!("agent output too short ({} bytes)", markdown.len()),
            ));
        }

        self.store.write_markdown(&request.file_name, &markdown)?;
        verify_written_doc(&self.store, &label, &request.file_name, MIN_DOC_BYTES)?;
        info!(module = %label, file = %request.file_name, "Wrote synthesis documentation");
        Ok(())
    }
}
