//! Dependency-ordered execution over the module tree.
//!
//! Leaf modules run concurrently under a semaphore sized by the
//! configuration; parent modules run sequentially on the scheduler task
//! once their whole subtree is done; the repository overview runs last.
//! The scheduler is the single writer of the in-memory tree and of
//! `module_tree.json`: workers only return results. A module's status
//! reaches disk exclusively on success, which is what makes resume after a
//! crash exact.

use crate::agent::{prompts, ModuleRequest, Orchestrator, ParentRequest};
use crate::config::Config;
use crate::errors::EngineError;
use crate::tree::store::TreeStore;
use crate::tree::{FileNamePlan, Module, ModulePath, ModuleTree, OVERVIEW_FILENAME};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Transition of one module, reported to the progress sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub index: usize,
    pub total: usize,
    pub phase: ProgressPhase,
    pub module_name: String,
    pub elapsed_ms: u64,
    pub kind: ModuleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Start,
    Done,
    Skip,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Leaf,
    Parent,
    Overview,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Default)]
pub struct ScheduleResult {
    /// Modules `done` when the pass ended (including resumed skips).
    pub done: usize,
    /// Modules that failed during this pass.
    pub failed: usize,
    /// Per-module error strings, in completion order.
    pub errors: Vec<String>,
    /// True when the pass stopped on the cancellation signal.
    pub cancelled: bool,
    /// True when the root overview file is present at the end.
    pub overview_written: bool,
}

pub struct Scheduler {
    config: Arc<Config>,
    orchestrator: Arc<dyn Orchestrator>,
    store: TreeStore,
    events: Option<mpsc::Sender<ProgressEvent>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        orchestrator: Arc<dyn Orchestrator>,
        store: TreeStore,
    ) -> Self {
        Self {
            config,
            orchestrator,
            store,
            events: None,
        }
    }

    /// Attach a progress-event sink.
    pub fn with_events(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Drive the whole tree to completion (or until cancellation).
    pub async fn run(
        &self,
        tree: &mut ModuleTree,
        cancel: &CancellationToken,
    ) -> Result<ScheduleResult, EngineError> {
        let plan = FileNamePlan::for_tree(tree);
        let outline = prompts::tree_outline(tree);
        let total = tree.module_count() + 1; // +1 for the overview

        // Assign stable event indices in tree order.
        let indices: HashMap<String, usize> = tree
            .walk()
            .iter()
            .enumerate()
            .map(|(i, (path, _))| (path_key(path), i + 1))
            .collect();

        let mut result = ScheduleResult::default();

        self.run_leaves(tree, &plan, &outline, &indices, total, &mut result, cancel)
            .await?;

        if !result.cancelled {
            self.run_parents(tree, &plan, &indices, total, &mut result, cancel)
                .await?;
        }

        if !result.cancelled {
            self.run_overview(tree, total, &mut result, cancel).await?;
        }

        result.done = tree
            .walk()
            .iter()
            .filter(|(_, m)| m.doc_status.is_done())
            .count();
        result.overview_written = self.store.markdown_present(OVERVIEW_FILENAME);
        Ok(result)
    }

    /// Dispatch every leaf module under the concurrency semaphore.
    #[allow(clippy::too_many_arguments)]
    async fn run_leaves(
        &self,
        tree: &mut ModuleTree,
        plan: &FileNamePlan,
        outline: &str,
        indices: &HashMap<String, usize>,
        total: usize,
        result: &mut ScheduleResult,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let leaves: Vec<(ModulePath, ModuleRequest)> = tree
            .walk()
            .into_iter()
            .filter(|(_, module)| module.is_leaf())
            .map(|(path, module)| {
                let request = build_request(&path, module, plan, outline);
                (path, request)
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (result_tx, mut result_rx) =
            mpsc::channel::<(ModulePath, Result<(), EngineError>)>(leaves.len().max(1));
        let mut in_flight = 0usize;
        let mut started_at: HashMap<String, Instant> = HashMap::new();

        for (path, request) in leaves {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if self.config.fail_fast && result.failed > 0 {
                break;
            }

            let key = path_key(&path);
            let index = indices[&key];

            // Resume rule: a done module whose artifact survives is skipped.
            let module = tree.get(&path).expect("leaf path is valid");
            if module.doc_status.is_done()
                && !module.doc_path.is_empty()
                && self.store.markdown_present(&module.doc_path)
            {
                self.emit(index, total, ProgressPhase::Skip, &request.name, 0, ModuleKind::Leaf)
                    .await;
                continue;
            }

            // Drain finished workers without blocking so persistence and
            // events stay on this task.
            while let Ok((done_path, outcome)) = result_rx.try_recv() {
                in_flight -= 1;
                self.finish_leaf(tree, plan, indices, total, &done_path, outcome, &mut started_at, result)
                    .await?;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore is never closed")
                }
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
            };

            started_at.insert(key.clone(), Instant::now());
            self.emit(index, total, ProgressPhase::Start, &request.name, 0, ModuleKind::Leaf)
                .await;

            let orchestrator = self.orchestrator.clone();
            let worker_cancel = cancel.clone();
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let outcome = orchestrator.process_module(&request, &worker_cancel).await;
                let _ = tx.send((path, outcome)).await;
                drop(permit);
            });
            in_flight += 1;
        }

        while in_flight > 0 {
            match result_rx.recv().await {
                Some((path, outcome)) => {
                    in_flight -= 1;
                    self.finish_leaf(tree, plan, indices, total, &path, outcome, &mut started_at, result)
                        .await?;
                }
                None => break,
            }
        }

        if cancel.is_cancelled() {
            result.cancelled = true;
        }
        Ok(())
    }

    /// Record one leaf outcome: mutate the tree, persist on success, emit
    /// the terminal event.
    #[allow(clippy::too_many_arguments)]
    async fn finish_leaf(
        &self,
        tree: &mut ModuleTree,
        plan: &FileNamePlan,
        indices: &HashMap<String, usize>,
        total: usize,
        path: &ModulePath,
        outcome: Result<(), EngineError>,
        started_at: &mut HashMap<String, Instant>,
        result: &mut ScheduleResult,
    ) -> Result<(), EngineError> {
        let key = path_key(path);
        let index = indices[&key];
        let elapsed_ms = started_at
            .remove(&key)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let name = path.last().cloned().unwrap_or_default();

        match outcome {
            Ok(()) => {
                let file_name = plan.file_for(path);
                if let Some(module) = tree.get_mut(path) {
                    module.doc_status = crate::tree::DocStatus::Done;
                    module.doc_path = file_name;
                }
                self.store.save_tree(tree)?;
                self.emit(index, total, ProgressPhase::Done, &name, elapsed_ms, ModuleKind::Leaf)
                    .await;
            }
            Err(EngineError::Cancelled) => {
                // Leave the module untouched; the run is winding down.
                result.cancelled = true;
            }
            Err(err) => {
                warn!(module = %name, error = %err, "Module generation failed");
                result.failed += 1;
                result.errors.push(format!("{name}: {err}"));
                self.emit(index, total, ProgressPhase::Error, &name, elapsed_ms, ModuleKind::Leaf)
                    .await;
            }
        }
        Ok(())
    }

    /// Run parent modules sequentially, deepest first, each only when its
    /// subtree is complete.
    async fn run_parents(
        &self,
        tree: &mut ModuleTree,
        plan: &FileNamePlan,
        indices: &HashMap<String, usize>,
        total: usize,
        result: &mut ScheduleResult,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut parent_paths: Vec<ModulePath> = tree
            .walk()
            .into_iter()
            .filter(|(_, m)| !m.is_leaf())
            .map(|(path, _)| path)
            .collect();
        // Children before parents.
        parent_paths.sort_by_key(|p| std::cmp::Reverse(p.len()));

        for path in parent_paths {
            if cancel.is_cancelled() {
                result.cancelled = true;
                return Ok(());
            }
            if self.config.fail_fast && result.failed > 0 {
                return Ok(());
            }

            let key = path_key(&path);
            let index = indices[&key];
            let name = path.last().cloned().unwrap_or_default();
            let module = tree.get(&path).expect("parent path is valid");

            if module.doc_status.is_done()
                && !module.doc_path.is_empty()
                && self.store.markdown_present(&module.doc_path)
            {
                self.emit(index, total, ProgressPhase::Skip, &name, 0, ModuleKind::Parent)
                    .await;
                continue;
            }

            // Eligible only when every descendant is done.
            let children_done = module
                .children
                .iter()
                .all(|(_, child)| child.subtree_done());
            if !children_done {
                debug!(module = %name, "Subtree incomplete; parent deferred to a future run");
                continue;
            }

            let started = Instant::now();
            self.emit(index, total, ProgressPhase::Start, &name, 0, ModuleKind::Parent)
                .await;

            let request = ParentRequest {
                name: Some(name.clone()),
                path: path.clone(),
                file_name: plan.file_for(&path),
                tree: tree.clone(),
            };

            match self.orchestrator.generate_parent_doc(&request, cancel).await {
                Ok(()) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if let Some(module) = tree.get_mut(&path) {
                        module.doc_status = crate::tree::DocStatus::Done;
                        module.doc_path = request.file_name.clone();
                    }
                    self.store.save_tree(tree)?;
                    self.emit(index, total, ProgressPhase::Done, &name, elapsed_ms, ModuleKind::Parent)
                        .await;
                }
                Err(EngineError::Cancelled) => {
                    result.cancelled = true;
                    return Ok(());
                }
                Err(err) => {
                    warn!(module = %name, error = %err, "Parent generation failed");
                    result.failed += 1;
                    result.errors.push(format!("{name}: {err}"));
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.emit(index, total, ProgressPhase::Error, &name, elapsed_ms, ModuleKind::Parent)
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Generate the repository overview, strictly last. Skipped for a
    /// single-module tree — its lone document is promoted to the overview
    /// by the engine.
    async fn run_overview(
        &self,
        tree: &mut ModuleTree,
        total: usize,
        result: &mut ScheduleResult,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if tree.module_count() == 1 {
            return Ok(());
        }
        if !tree.all_done() {
            debug!("Not all modules are done; overview deferred to a future run");
            return Ok(());
        }

        let name = self.config.repo_name();
        if self.store.markdown_present(OVERVIEW_FILENAME) {
            self.emit(total, total, ProgressPhase::Skip, &name, 0, ModuleKind::Overview)
                .await;
            return Ok(());
        }

        let started = Instant::now();
        self.emit(total, total, ProgressPhase::Start, &name, 0, ModuleKind::Overview)
            .await;

        let request = ParentRequest {
            name: None,
            path: Vec::new(),
            file_name: OVERVIEW_FILENAME.to_string(),
            tree: tree.clone(),
        };

        match self.orchestrator.generate_parent_doc(&request, cancel).await {
            Ok(()) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.emit(total, total, ProgressPhase::Done, &name, elapsed_ms, ModuleKind::Overview)
                    .await;
            }
            Err(EngineError::Cancelled) => {
                result.cancelled = true;
            }
            Err(err) => {
                warn!(error = %err, "Overview generation failed");
                result.failed += 1;
                result.errors.push(format!("overview: {err}"));
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.emit(total, total, ProgressPhase::Error, &name, elapsed_ms, ModuleKind::Overview)
                    .await;
            }
        }
        Ok(())
    }

    async fn emit(
        &self,
        index: usize,
        total: usize,
        phase: ProgressPhase,
        module_name: &str,
        elapsed_ms: u64,
        kind: ModuleKind,
    ) {
        if let Some(tx) = &self.events {
            let _ = tx
                .send(ProgressEvent {
                    index,
                    total,
                    phase,
                    module_name: module_name.to_string(),
                    elapsed_ms,
                    kind,
                })
                .await;
        }
    }
}

/// Build the orchestrator work order for a module, including prebuilt
/// requests for its children.
fn build_request(
    path: &ModulePath,
    module: &Module,
    plan: &FileNamePlan,
    outline: &str,
) -> ModuleRequest {
    let children = module
        .children
        .iter()
        .map(|(name, child)| {
            let mut child_path = path.clone();
            child_path.push(name.clone());
            build_request(&child_path, child, plan, outline)
        })
        .collect();

    ModuleRequest {
        name: path.last().cloned().unwrap_or_default(),
        path: path.clone(),
        description: module.description.clone(),
        component_ids: module.component_ids.clone(),
        file_name: plan.file_for(path),
        tree_outline: outline.to_string(),
        children,
    }
}

fn path_key(path: &[String]) -> String {
    path.join("\u{1f}")
}
