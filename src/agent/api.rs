//! API-mode orchestrator.
//!
//! Simple modules are one completion: the response is fence-stripped and
//! written directly. Complex modules run a cooperative agent loop: the
//! model replies either with one JSON tool call — executed sequentially,
//! its result appended to the transcript — or with a terminal message once
//! it has created the document through the editor tool.

use crate::agent::{
    is_complex, prompts, strip_code_fence, tools::ToolInvocation, tools::Toolbox,
    verify_written_doc, ModuleRequest, Orchestrator, ParentRequest,
};
use crate::component::ComponentMap;
use crate::config::Config;
use crate::errors::{EngineError, LlmError};
use crate::llm::{Completion, Purpose};
use crate::tree::store::TreeStore;
use crate::util::extract_json_object;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turn budget for one module's agent loop.
const MAX_AGENT_TURNS: u32 = 50;

pub struct ApiOrchestrator {
    config: Arc<Config>,
    components: Arc<ComponentMap>,
    gateway: Arc<dyn Completion>,
    store: TreeStore,
}

impl ApiOrchestrator {
    pub fn new(
        config: Arc<Config>,
        components: Arc<ComponentMap>,
        gateway: Arc<dyn Completion>,
        store: TreeStore,
    ) -> Self {
        Self {
            config,
            components,
            gateway,
            store,
        }
    }

    /// One-shot generation for a simple module.
    async fn process_simple(
        &self,
        request: &ModuleRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
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
        let prompt = format!("{system}\n\n{user}");

        let response = self
            .gateway
            .text(Purpose::LeafDoc, &prompt, cancel)
            .await
            .map_err(|e| self.map_llm_error(&request.name, e))?;

        let markdown = strip_code_fence(&response);
        if markdown.is_empty() {
            return Err(EngineError::module_failed(
                &request.name,
                "model returned an empty document",
            ));
        }
        self.store.write_markdown(&request.file_name, &markdown)?;
        verify_written_doc(&self.store, &request.name, &request.file_name, 1)?;
        info!(module = %request.name, file = %request.file_name, "Wrote module documentation");
        Ok(())
    }

    /// Tool-driven agent loop for a complex module.
    async fn process_complex(
        &self,
        request: &ModuleRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let child_names: Vec<String> = request.children.iter().map(|c| c.name.clone()).collect();
        let system = prompts::complex_system_prompt(
            &request.name,
            &request.path,
            &request.description,
            &request.file_name,
            &request.tree_outline,
            &child_names,
            self.config.custom_instructions.as_deref(),
        );
        let user = prompts::module_user_prompt(
            &request.name,
            &request.component_ids,
            &self.components,
            false,
        );

        let mut toolbox = Toolbox::new(
            &self.components,
            self.store.docs_dir().to_path_buf(),
            self.config.repo_dir.clone(),
        );
        let mut transcript = format!("{system}\n\n{user}");

        for turn in 1..=MAX_AGENT_TURNS {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let response = self
                .gateway
                .text(Purpose::LeafDoc, &transcript, cancel)
                .await
                .map_err(|e| self.map_llm_error(&request.name, e))?;

            let call = extract_json_object(&response)
                .and_then(|json| serde_json::from_str::<ToolInvocation>(&json).ok());

            let Some(call) = call else {
                debug!(module = %request.name, turn, "Agent returned terminal message");
                break;
            };

            // Tool failures flow back to the agent as text, never as errors.
            let result = match call {
                ToolInvocation::ReadCodeComponents { ref component_ids } => {
                    toolbox.read_code_components(component_ids)
                }
                ToolInvocation::StrReplaceEditor {
                    op,
                    ref path,
                    ref file_text,
                    ref old_str,
                    ref new_str,
                    insert_line,
                    view_range,
                } => toolbox.editor(
                    op,
                    path,
                    file_text.as_deref(),
                    old_str.as_deref(),
                    new_str.as_deref(),
                    insert_line,
                    view_range,
                ),
                ToolInvocation::GenerateSubModuleDocumentation { ref child_names } => {
                    self.generate_sub_modules(request, child_names, cancel).await
                }
            };

            debug!(module = %request.name, turn, result_chars = result.len(), "Executed tool call");
            transcript.push_str(&format!(
                "\n\nASSISTANT:\n{response}\n\nTOOL RESULT:\n{result}\n\nContinue. Reply with the next tool call, or with a closing message when `{file}` is complete.",
                file = request.file_name,
            ));
        }

        verify_written_doc(&self.store, &request.name, &request.file_name, 1)?;
        info!(module = %request.name, file = %request.file_name, "Agent loop completed");
        Ok(())
    }

    /// Recursively document the named children of a complex module.
    async fn generate_sub_modules(
        &self,
        request: &ModuleRequest,
        child_names: &[String],
        cancel: &CancellationToken,
    ) -> String {
        let mut lines = Vec::new();
        for name in child_names {
            let Some(child) = request.children.iter().find(|c| &c.name == name) else {
                lines.push(format!("error: unknown child module {name}"));
                continue;
            };
            if self.store.markdown_present(&child.file_name) {
                lines.push(format!("{name}: already documented at {}", child.file_name));
                continue;
            }
            match self.process_module(child, cancel).await {
                Ok(()) => lines.push(format!("{name}: documented at {}", child.file_name)),
                Err(e) => {
                    warn!(module = %request.name, child = %name, error = %e, "Sub-module generation failed");
                    lines.push(format!("error: {name}: {e}"));
                }
            }
        }
        lines.join("\n")
    }

    fn map_llm_error(&self, module: &str, err: LlmError) -> EngineError {
        match err {
            LlmError::Cancelled => EngineError::Cancelled,
            other => EngineError::module_failed(module, other),
        }
    }
}

#[async_trait]
impl Orchestrator for ApiOrchestrator {
    async fn process_module(
        &self,
        request: &ModuleRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if is_complex(
            &request.component_ids,
            &self.components,
            self.config.max_tokens,
        ) {
            self.process_complex(request, cancel).await
        } else {
            self.process_simple(request, cancel).await
        }
    }

    async fn generate_parent_doc(
        &self,
        request: &ParentRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let label = request.name.clone().unwrap_or_else(|| "overview".to_string());
        let payload =
            prompts::overview_payload(&request.tree, &request.path, self.store.docs_dir());
        let structure = serde_json::to_string_pretty(&payload).unwrap_or_default();
        let mut prompt = match &request.name {
            Some(name) => prompts::module_overview_prompt(name, &structure),
            None => prompts::repo_overview_prompt(&self.config.repo_name(), &structure),
        };
        if let Some(extra) = self.config.custom_instructions.as_deref() {
            prompt.push('\n');
            prompt.push_str(extra);
        }

        let response = self
            .gateway
            .text(Purpose::Overview, &prompt, cancel)
            .await
            .map_err(|e| self.map_llm_error(&label, e))?;

        let markdown = strip_code_fence(&response);
        if markdown.is_empty() {
            return Err(EngineError::module_failed(
                &label,
                "model returned an empty overview",
            ));
        }
        self.store.write_markdown(&request.file_name, &markdown)?;
        verify_written_doc(&self.store, &label, &request.file_name, 1)?;
        info!(module = %label, file = %request.file_name, "Wrote synthesis documentation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted completion: pops responses in order and records prompts.
    struct ScriptedCompletion {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCompletion {
        fn new(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn text(
            &self,
            _purpose: Purpose,
            prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(LlmError::Exhausted { errors: vec![] })
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn component(id: &str, tokens: u64) -> (String, Component) {
        (
            id.to_string(),
            Component {
                id: id.to_string(),
                kind: Default::default(),
                file_path: format!("src/{id}.py"),
                start_line: 1,
                end_line: 1,
                source_code: "def f(): pass".to_string(),
                depends_on: Default::default(),
                token_estimate: Some(tokens),
            },
        )
    }

    fn simple_request() -> ModuleRequest {
        ModuleRequest {
            name: "api".to_string(),
            path: vec!["api".to_string()],
            description: "HTTP surface".to_string(),
            component_ids: vec!["a".to_string()],
            file_name: "api.md".to_string(),
            tree_outline: "- api\n".to_string(),
            children: vec![],
        }
    }

    fn orchestrator(
        docs_dir: &std::path::Path,
        gateway: Arc<dyn Completion>,
        components: ComponentMap,
    ) -> ApiOrchestrator {
        let mut config = Config::new(docs_dir.to_path_buf(), docs_dir.to_path_buf(), "m");
        config.api_key = "k".into();
        config.base_url = "https://example.com".into();
        ApiOrchestrator::new(
            Arc::new(config),
            Arc::new(components),
            gateway,
            TreeStore::new(docs_dir),
        )
    }

    #[tokio::test]
    async fn simple_module_is_one_call() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedCompletion::new(vec!["# API\n\nGenerated body."]);
        let orchestrator = orchestrator(
            dir.path(),
            gateway.clone(),
            [component("a", 10)].into_iter().collect(),
        );

        orchestrator
            .process_module(&simple_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gateway.calls(), 1);
        // Sources are inlined for the single call.
        assert!(gateway.prompts.lock().unwrap()[0].contains("def f(): pass"));
        let written = std::fs::read_to_string(dir.path().join("api.md")).unwrap();
        assert_eq!(written, "# API\n\nGenerated body.");
    }

    #[tokio::test]
    async fn complex_module_runs_the_agent_loop() {
        let dir = tempdir().unwrap();
        // Turn 1: the agent reads code. Turn 2: it creates the file.
        // Turn 3: terminal message.
        let gateway = ScriptedCompletion::new(vec![
            r#"{"tool": "read_code_components", "component_ids": ["a"]}"#,
            r##"{"tool": "str_replace_editor", "op": "create", "path": "big.md", "file_text": "# Big\n\nWritten through the editor tool."}"##,
            "The documentation is complete.",
        ]);
        // Heavy component forces the complex path.
        let orchestrator = orchestrator(
            dir.path(),
            gateway.clone(),
            [component("a", 100_000)].into_iter().collect(),
        );

        let mut request = simple_request();
        request.name = "big".to_string();
        request.file_name = "big.md".to_string();
        orchestrator
            .process_module(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(gateway.calls(), 3);
        // The tool result was fed back into the transcript.
        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[1].contains("def f(): pass"));
        assert!(prompts[2].contains("created big.md"));
        drop(prompts);

        let written = std::fs::read_to_string(dir.path().join("big.md")).unwrap();
        assert!(written.starts_with("# Big"));
    }

    #[tokio::test]
    async fn agent_loop_without_created_file_fails_the_module() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedCompletion::new(vec!["I decline to use tools."]);
        let orchestrator = orchestrator(
            dir.path(),
            gateway,
            [component("a", 100_000)].into_iter().collect(),
        );

        let mut request = simple_request();
        request.file_name = "never.md".to_string();
        let err = orchestrator
            .process_module(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModuleFailed { .. }));
        assert!(!dir.path().join("never.md").exists());
    }

    #[tokio::test]
    async fn tool_errors_are_returned_to_the_agent_not_raised() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedCompletion::new(vec![
            // Escape attempt: must come back as an error string.
            r#"{"tool": "str_replace_editor", "op": "create", "path": "../escape.md", "file_text": "x"}"#,
            r##"{"tool": "str_replace_editor", "op": "create", "path": "ok.md", "file_text": "# OK\n\nSecond attempt landed inside the sandbox."}"##,
            "Done.",
        ]);
        let orchestrator = orchestrator(
            dir.path(),
            gateway.clone(),
            [component("a", 100_000)].into_iter().collect(),
        );

        let mut request = simple_request();
        request.file_name = "ok.md".to_string();
        orchestrator
            .process_module(&request, &CancellationToken::new())
            .await
            .unwrap();

        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts[1].contains("error: write access outside"));
    }

    #[tokio::test]
    async fn exhausted_gateway_is_a_module_failure() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedCompletion::new(vec![]);
        let orchestrator = orchestrator(
            dir.path(),
            gateway,
            [component("a", 10)].into_iter().collect(),
        );

        let err = orchestrator
            .process_module(&simple_request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            EngineError::ModuleFailed { module, reason } => {
                assert_eq!(module, "api");
                assert!(reason.contains("backends failed"));
            }
            other => panic!("expected ModuleFailed, got {other:?}"),
        }
    }
}
