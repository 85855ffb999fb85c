//! The documentation engine: clustering, scheduling, and persistence for
//! one repository run.
//!
//! Control flow: validate the configuration, load the persisted tree (or
//! cluster and persist a fresh one), drive the scheduler, then finalize —
//! metadata, the degenerate single-module promotion, and the empty-repo
//! note.

use crate::agent::build_orchestrator;
use crate::cluster::Clusterer;
use crate::component::{ComponentMap, LeafSet};
use crate::config::Config;
use crate::errors::EngineError;
use crate::llm::Gateway;
use crate::schedule::{ProgressEvent, Scheduler};
use crate::tree::store::{build_metadata, TreeStore};
use crate::tree::{ModuleTree, OVERVIEW_FILENAME};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Final report of one engine run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ok: bool,
    pub modules_total: usize,
    pub modules_done: usize,
    pub modules_failed: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct Engine {
    config: Arc<Config>,
    components: Arc<ComponentMap>,
    leaf_set: LeafSet,
    events: Option<mpsc::Sender<ProgressEvent>>,
}

impl Engine {
    /// Validate the configuration and assemble an engine.
    pub fn new(
        config: Config,
        components: ComponentMap,
        leaf_set: LeafSet,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            components: Arc::new(components),
            leaf_set,
            events: None,
        })
    }

    /// Attach a progress-event sink.
    pub fn with_events(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run to completion, resuming from a previous checkpoint when one
    /// exists under the docs directory.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, EngineError> {
        let store = TreeStore::new(&self.config.docs_dir);
        store.ensure_dir()?;

        let gateway = Arc::new(Gateway::from_config(&self.config)?);

        // Resume rule: an existing checkpoint wins over re-clustering.
        let mut tree = match store.load_tree()? {
            Some(tree) => {
                info!(modules = tree.module_count(), "Resuming from existing module tree");
                tree
            }
            None => {
                let clusterer =
                    Clusterer::new(&self.components, &self.config, gateway.as_ref());
                let outcome = clusterer.run(&self.leaf_set, cancel).await?;
                for warning in &outcome.warnings {
                    warn!("{warning}");
                }
                store.save_first_tree(&outcome.tree)?;
                store.save_tree(&outcome.tree)?;
                info!(
                    modules = outcome.tree.module_count(),
                    degraded = outcome.degraded,
                    "Clustered components into module tree"
                );
                outcome.tree
            }
        };

        let orchestrator = build_orchestrator(
            self.config.clone(),
            self.components.clone(),
            gateway.clone(),
            store.clone(),
        );
        let mut scheduler = Scheduler::new(self.config.clone(), orchestrator, store.clone());
        if let Some(tx) = &self.events {
            scheduler = scheduler.with_events(tx.clone());
        }

        let mut result = scheduler.run(&mut tree, cancel).await?;

        if !result.cancelled {
            self.promote_single_module(&store, &mut tree)?;
            self.ensure_empty_repo_overview(&store, &tree, &mut result)?;
        }

        let files = collect_files(&store, &tree);
        store.write_metadata(&build_metadata(
            &tree,
            &self.config,
            self.components.len(),
            files,
            gateway.used_models(),
            result.errors.clone(),
        ))?;

        let summary = RunSummary {
            ok: !result.cancelled && result.failed == 0,
            modules_total: tree.module_count(),
            modules_done: result.done,
            modules_failed: result.failed,
            errors: result.errors,
            cancelled: result.cancelled,
        };
        info!(
            ok = summary.ok,
            done = summary.modules_done,
            failed = summary.modules_failed,
            "Engine run finished"
        );
        Ok(summary)
    }

    /// A tree that collapsed to one module promotes its lone document to
    /// the repository overview.
    fn promote_single_module(
        &self,
        store: &TreeStore,
        tree: &mut ModuleTree,
    ) -> Result<(), EngineError> {
        if tree.module_count() != 1 || store.markdown_present(OVERVIEW_FILENAME) {
            return Ok(());
        }
        let path = tree.walk()[0].0.clone();
        let module = tree.get(&path).expect("single module path is valid");
        if !module.doc_status.is_done() || module.doc_path.is_empty() {
            return Ok(());
        }
        let old = module.doc_path.clone();
        store.rename_markdown(&old, OVERVIEW_FILENAME)?;
        if let Some(module) = tree.get_mut(&path) {
            module.doc_path = OVERVIEW_FILENAME.to_string();
        }
        store.save_tree(tree)?;
        info!(from = %old, "Promoted single module document to overview");
        Ok(())
    }

    /// An empty repository still gets an overview note; a failed LLM call
    /// must not fail the run.
    fn ensure_empty_repo_overview(
        &self,
        store: &TreeStore,
        tree: &ModuleTree,
        result: &mut crate::schedule::ScheduleResult,
    ) -> Result<(), EngineError> {
        if !tree.is_empty() || store.markdown_present(OVERVIEW_FILENAME) {
            return Ok(());
        }
        store.write_markdown(
            OVERVIEW_FILENAME,
            &format!(
                "# {}\n\nThis repository contains no documentable components.\n",
                self.config.repo_name()
            ),
        )?;
        // The overview is covered by the static note; drop its failure.
        let before = result.errors.len();
        result.errors.retain(|e| !e.starts_with("overview:"));
        result.failed = result.failed.saturating_sub(before - result.errors.len());
        Ok(())
    }
}

/// Markdown artifacts present on disk, overview first, then modules in
/// tree order.
fn collect_files(store: &TreeStore, tree: &ModuleTree) -> Vec<String> {
    let mut files = Vec::new();
    if store.markdown_present(OVERVIEW_FILENAME) {
        files.push(OVERVIEW_FILENAME.to_string());
    }
    for (_, module) in tree.walk() {
        if module.doc_status.is_done()
            && !module.doc_path.is_empty()
            && module.doc_path != OVERVIEW_FILENAME
            && store.markdown_present(&module.doc_path)
        {
            files.push(module.doc_path.clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

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

    fn cmd_config(dir: &std::path::Path, agent_cmd: &str) -> Config {
        let mut config = Config::new(dir.join("docs"), dir.to_path_buf(), "m");
        config.agent_cmd = Some(agent_cmd.to_string());
        config
    }

    const DOC_CMD: &str = "printf '# Module\\n\\nA generated document long enough to pass the size floor comfortably.\\n'";

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = Config::new("/tmp/docs".into(), "/tmp/repo".into(), "m");
        // No api_key, no agent_cmd.
        let err = Engine::new(config, ComponentMap::new(), BTreeSet::new()).unwrap_err();
        assert!(matches!(err, EngineError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn single_component_run_produces_only_an_overview() {
        let dir = tempdir().unwrap();
        let config = cmd_config(dir.path(), DOC_CMD);
        let components: ComponentMap = [component("a", 100)].into_iter().collect();
        let leaf_set: LeafSet = BTreeSet::from(["a".to_string()]);

        let engine = Engine::new(config, components, leaf_set).unwrap();
        let summary = engine.run(&CancellationToken::new()).await.unwrap();

        assert!(summary.ok);
        assert_eq!(summary.modules_total, 1);
        let docs = dir.path().join("docs");
        let overview = std::fs::read_to_string(docs.join("overview.md")).unwrap();
        assert!(overview.starts_with("# Module"));
        // The module file was renamed, not duplicated.
        let md_files: Vec<_> = std::fs::read_dir(&docs)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".md"))
            .collect();
        assert_eq!(md_files.len(), 1);

        // The checkpoint records the promotion.
        let store = TreeStore::new(&docs);
        let tree = store.load_tree().unwrap().unwrap();
        let (_, module) = &tree.walk()[0];
        assert_eq!(module.doc_path, "overview.md");
    }

    #[tokio::test]
    async fn empty_leaf_set_writes_a_note_and_never_fails() {
        let dir = tempdir().unwrap();
        // Agent command that always fails: the static note must still land.
        let config = cmd_config(dir.path(), "false");
        let engine = Engine::new(config, ComponentMap::new(), BTreeSet::new()).unwrap();
        let summary = engine.run(&CancellationToken::new()).await.unwrap();

        assert!(summary.ok);
        assert_eq!(summary.modules_total, 0);
        let overview =
            std::fs::read_to_string(dir.path().join("docs").join("overview.md")).unwrap();
        assert!(overview.contains("no documentable components"));

        // module_tree.json exists and is the empty object.
        let tree_text =
            std::fs::read_to_string(dir.path().join("docs").join("module_tree.json")).unwrap();
        assert_eq!(tree_text.trim(), "{}");
    }

    #[tokio::test]
    async fn second_run_skips_everything() {
        let dir = tempdir().unwrap();
        let components: ComponentMap = [component("a", 100)].into_iter().collect();
        let leaf_set: LeafSet = BTreeSet::from(["a".to_string()]);

        let engine = Engine::new(
            cmd_config(dir.path(), DOC_CMD),
            components.clone(),
            leaf_set.clone(),
        )
        .unwrap();
        engine.run(&CancellationToken::new()).await.unwrap();

        let overview_path = dir.path().join("docs").join("overview.md");
        let first = std::fs::read(&overview_path).unwrap();

        // Second run with an agent command that would fail if invoked:
        // resume must not call it.
        let engine = Engine::new(cmd_config(dir.path(), "false"), components, leaf_set).unwrap();
        let summary = engine.run(&CancellationToken::new()).await.unwrap();
        assert!(summary.ok);
        assert_eq!(std::fs::read(&overview_path).unwrap(), first);
    }

    #[tokio::test]
    async fn metadata_lists_overview_and_counts() {
        let dir = tempdir().unwrap();
        let components: ComponentMap = [component("a", 100)].into_iter().collect();
        let leaf_set: LeafSet = BTreeSet::from(["a".to_string()]);

        let engine =
            Engine::new(cmd_config(dir.path(), DOC_CMD), components, leaf_set).unwrap();
        engine.run(&CancellationToken::new()).await.unwrap();

        let metadata: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("docs").join("metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["counts"]["components"], 1);
        assert_eq!(metadata["counts"]["modules"], 1);
        assert_eq!(metadata["files"][0], "overview.md");
        assert_eq!(metadata["main_model"], "m");
    }
}
