//! Per-module documentation orchestration.
//!
//! One trait, two implementations selected once per run: when `agent_cmd`
//! is configured every module is generated by piping one prompt to the
//! external agent ([`subprocess::CmdOrchestrator`]); otherwise the LLM
//! gateway is used directly, with a tool-driven agent loop for complex
//! modules ([`api::ApiOrchestrator`]). The scheduler never knows which is
//! in use.

pub mod api;
pub mod prompts;
pub mod subprocess;
pub mod tools;

use crate::component::{token_sum, ComponentMap};
use crate::config::Config;
use crate::errors::EngineError;
use crate::llm::SharedGateway;
use crate::tree::store::TreeStore;
use crate::tree::{ModulePath, ModuleTree};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Component-count threshold above which a module is complex.
const COMPLEX_COMPONENT_COUNT: usize = 10;

/// Minimum accepted size of a generated document, in bytes.
pub const MIN_DOC_BYTES: usize = 64;

/// Work order for one leaf (or component-owning) module.
#[derive(Debug, Clone)]
pub struct ModuleRequest {
    pub name: String,
    pub path: ModulePath,
    pub description: String,
    pub component_ids: Vec<String>,
    /// Target file name from the tree's deterministic naming plan.
    pub file_name: String,
    /// Names-and-descriptions outline of the whole tree, for orientation.
    pub tree_outline: String,
    /// Prebuilt requests for the module's direct children, used by the
    /// recursive sub-module tool on complex modules.
    pub children: Vec<ModuleRequest>,
}

/// Work order for a parent module or the repository overview.
#[derive(Debug, Clone)]
pub struct ParentRequest {
    /// `None` for the repository root overview.
    pub name: Option<String>,
    pub path: ModulePath,
    pub file_name: String,
    /// Snapshot of the tree with the subtree's doc paths filled in.
    pub tree: ModuleTree,
}

/// Produces one Markdown artifact per module and writes it through the
/// tree store.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Generate the document for a component-owning module.
    async fn process_module(
        &self,
        request: &ModuleRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;

    /// Generate the synthesis document for a parent module or the root.
    async fn generate_parent_doc(
        &self,
        request: &ParentRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;
}

/// Select the orchestrator implementation for this run.
pub fn build_orchestrator(
    config: Arc<Config>,
    components: Arc<ComponentMap>,
    gateway: SharedGateway,
    store: TreeStore,
) -> Arc<dyn Orchestrator> {
    match config.agent_cmd.as_deref().filter(|c| !c.is_empty()) {
        Some(cmd) => Arc::new(subprocess::CmdOrchestrator::new(
            cmd.to_string(),
            config,
            components,
            store,
        )),
        None => Arc::new(api::ApiOrchestrator::new(config, components, gateway, store)),
    }
}

/// A module is complex when it owns many components or their sources are
/// too large for a single completion's context share.
pub fn is_complex(component_ids: &[String], components: &ComponentMap, max_tokens: u64) -> bool {
    component_ids.len() > COMPLEX_COMPONENT_COUNT
        || token_sum(component_ids.iter(), components) > max_tokens / 2
}

/// Remove a single outer ```` ```markdown … ``` ```` (or bare ```` ``` ````)
/// fence, looking at the first and last line only.
pub fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    let inner = if lines.last().map(|l| l.trim()) == Some("```") {
        &lines[1..lines.len().saturating_sub(1)]
    } else {
        &lines[1..]
    };
    inner.join("\n").trim().to_string()
}

/// Extract the content between the first `<OVERVIEW>…</OVERVIEW>` pair;
/// missing tags fall back to fence-stripping.
pub fn extract_overview(text: &str) -> String {
    if let Some(start) = text.find("<OVERVIEW>") {
        let after = &text[start + "<OVERVIEW>".len()..];
        if let Some(end) = after.find("</OVERVIEW>") {
            return after[..end].trim().to_string();
        }
    }
    strip_code_fence(text)
}

/// Shared post-write check: the artifact must exist, be valid UTF-8, and
/// meet the mode's minimum size (64 bytes for piped agents, merely
/// non-empty for the API agent loop).
pub(crate) fn verify_written_doc(
    store: &TreeStore,
    module: &str,
    file_name: &str,
    min_bytes: usize,
) -> Result<(), EngineError> {
    let path = store.docs_dir().join(file_name);
    let bytes = std::fs::read(&path).map_err(|_| {
        EngineError::module_failed(module, format!("agent did not create {file_name}"))
    })?;
    if bytes.is_empty() || bytes.len() < min_bytes {
        return Err(EngineError::module_failed(
            module,
            format!("generated document is too short ({} bytes)", bytes.len()),
        ));
    }
    if String::from_utf8(bytes).is_err() {
        return Err(EngineError::module_failed(
            module,
            format!("{file_name} is not valid UTF-8"),
        ));
    }
    Ok(())
}
