//! Token-budget-driven clustering of components into a module tree.
//!
//! The clusterer partitions the leaf set recursively, asking the LLM to act
//! as a semantic partition oracle at every node whose token estimate exceeds
//! the leaf budget. Oracle output is validated strictly; invalid output gets
//! up to two repair rounds, then the deterministic fallback partition. The
//! clusterer is pure over its inputs and the oracle's responses — it never
//! touches the filesystem.

pub mod fallback;
pub mod prompts;

use crate::component::{token_sum, ComponentMap, LeafSet};
use crate::config::Config;
use crate::errors::{EngineError, LlmError};
use crate::llm::{Gateway, Purpose};
use crate::tree::{Module, ModuleChildren, ModuleTree};
use crate::util::extract_json_object;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum id-coverage repair rounds per node.
const MAX_REPAIR_ROUNDS: u32 = 2;
/// Maximum re-partitions after a group-count violation per node.
const MAX_REGROUPS: u32 = 1;
/// Allowed group count range.
const GROUP_RANGE: std::ops::RangeInclusive<usize> = 2..=12;

/// One named group returned by the oracle or the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub component_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PartitionResponse {
    groups: Vec<Group>,
}

/// The semantic partition oracle — the LLM gateway in production, a script
/// in tests.
#[async_trait]
pub trait PartitionOracle: Send + Sync {
    async fn partition(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl PartitionOracle for Gateway {
    async fn partition(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.complete(Purpose::Cluster, prompt, cancel).await
    }
}

/// Result of a clustering run.
#[derive(Debug)]
pub struct ClusterOutcome {
    pub tree: ModuleTree,
    /// Human-readable degradation notes (fallback partitions, collapses).
    pub warnings: Vec<String>,
    /// True when at least one node could not consult the oracle at all.
    pub degraded: bool,
}

struct ClusterState {
    warnings: Vec<String>,
    /// Once the cascade is exhausted, remaining nodes collapse to leaves
    /// without further oracle calls.
    exhausted: bool,
}

/// Recursive top-down partitioner.
pub struct Clusterer<'a> {
    components: &'a ComponentMap,
    config: &'a Config,
    oracle: &'a dyn PartitionOracle,
}

impl<'a> Clusterer<'a> {
    pub fn new(
        components: &'a ComponentMap,
        config: &'a Config,
        oracle: &'a dyn PartitionOracle,
    ) -> Self {
        Self {
            components,
            config,
            oracle,
        }
    }

    /// Cluster the leaf set into a module tree satisfying the partition,
    /// depth, and budget invariants.
    pub async fn run(
        &self,
        leaf_set: &LeafSet,
        cancel: &CancellationToken,
    ) -> Result<ClusterOutcome, EngineError> {
        let ids: Vec<String> = leaf_set.iter().cloned().collect();
        let mut state = ClusterState {
            warnings: Vec::new(),
            exhausted: false,
        };

        if ids.is_empty() {
            return Ok(ClusterOutcome {
                tree: ModuleTree::default(),
                warnings: state.warnings,
                degraded: false,
            });
        }

        let tokens = token_sum(ids.iter(), self.components);
        let mut roots = ModuleChildren::new();

        if tokens <= self.config.max_token_per_leaf_module || self.config.max_depth == 0 {
            let name =
                lca_name(&ids, self.components).unwrap_or_else(|| self.config.repo_name());
            roots.insert(name, Module::leaf("All repository components", ids));
        } else {
            match self.partition_node(&ids, 0, &mut state, cancel).await? {
                Some(groups) => {
                    for group in groups {
                        let module = self
                            .build(group.component_ids, 1, group.description, &mut state, cancel)
                            .await?;
                        roots.insert(group.name, module);
                    }
                }
                None => {
                    let name = lca_name(&ids, self.components)
                        .unwrap_or_else(|| self.config.repo_name());
                    roots.insert(name, Module::leaf("All repository components", ids));
                }
            }
        }

        let degraded = state.exhausted;
        Ok(ClusterOutcome {
            tree: ModuleTree::new(roots),
            warnings: state.warnings,
            degraded,
        })
    }

    /// Build the module for one recursion node.
    fn build<'b>(
        &'b self,
        ids: Vec<String>,
        depth: u32,
        description: String,
        state: &'b mut ClusterState,
        cancel: &'b CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Module, EngineError>> + Send + 'b>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let tokens = token_sum(ids.iter(), self.components);
            if tokens <= self.config.max_token_per_leaf_module || depth >= self.config.max_depth {
                return Ok(Module::leaf(description, ids));
            }

            match self.partition_node(&ids, depth, state, cancel).await? {
                Some(groups) => {
                    let mut children = ModuleChildren::new();
                    for group in groups {
                        let child = self
                            .build(group.component_ids, depth + 1, group.description, state, cancel)
                            .await?;
                        children.insert(group.name, child);
                    }
                    Ok(Module::parent(description, children))
                }
                // Oracle exhausted: collapse this node into a single leaf.
                None => Ok(Module::leaf(description, ids)),
            }
        })
    }

    /// Obtain a valid partition for `ids`, via the oracle with repairs, the
    /// deterministic fallback, or — when the cascade is exhausted — `None`.
    async fn partition_node(
        &self,
        ids: &[String],
        depth: u32,
        state: &mut ClusterState,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Group>>, EngineError> {
        let total_tokens = token_sum(ids.iter(), self.components);

        if state.exhausted {
            return Ok(None);
        }

        let expected: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        let base_prompt = prompts::partition_prompt(
            ids,
            self.components,
            self.config.custom_instructions.as_deref(),
        );

        let mut prompt = base_prompt.clone();
        let mut repairs = 0u32;
        let mut regroups = 0u32;

        loop {
            let response = match self.oracle.partition(&prompt, cancel).await {
                Ok(text) => text,
                Err(LlmError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err @ LlmError::Exhausted { .. }) => {
                    warn!(depth, error = %err, "Oracle exhausted; collapsing node");
                    state.warnings.push(format!(
                        "clustering degraded: oracle exhausted at depth {depth} ({err})"
                    ));
                    state.exhausted = true;
                    return Ok(None);
                }
                Err(err) => {
                    // Non-exhaustion gateway errors degrade straight to the
                    // deterministic fallback.
                    state.warnings.push(format!(
                        "clustering degraded: oracle error at depth {depth} ({err})"
                    ));
                    return Ok(Some(self.fallback(ids, depth, total_tokens)));
                }
            };

            let parsed = extract_json_object(&response)
                .and_then(|json| serde_json::from_str::<PartitionResponse>(&json).ok());

            let groups = match parsed {
                Some(parsed) => {
                    let mut groups = parsed.groups;
                    groups.retain(|g| !g.component_ids.is_empty());
                    groups
                }
                None => {
                    if repairs < MAX_REPAIR_ROUNDS {
                        repairs += 1;
                        debug!(depth, repairs, "Unparseable partition; requesting repair");
                        prompt = prompts::repair_prompt(&base_prompt, &response, &[], &[], &[]);
                        continue;
                    }
                    state
                        .warnings
                        .push(format!("clustering degraded: unparseable partition at depth {depth}"));
                    return Ok(Some(self.fallback(ids, depth, total_tokens)));
                }
            };

            let diff = coverage_diff(&groups, &expected);
            if !diff.is_empty() {
                if repairs < MAX_REPAIR_ROUNDS {
                    repairs += 1;
                    debug!(
                        depth,
                        repairs,
                        missing = diff.missing.len(),
                        unknown = diff.unknown.len(),
                        duplicates = diff.duplicates.len(),
                        "Partition coverage mismatch; requesting repair"
                    );
                    let previous = serde_json::to_string(&serde_json::json!({
                        "groups": groups
                    }))
                    .unwrap_or_default();
                    prompt = prompts::repair_prompt(
                        &base_prompt,
                        &previous,
                        &diff.missing,
                        &diff.unknown,
                        &diff.duplicates,
                    );
                    continue;
                }
                state
                    .warnings
                    .push(format!("clustering degraded: coverage mismatch at depth {depth}"));
                return Ok(Some(self.fallback(ids, depth, total_tokens)));
            }

            if !GROUP_RANGE.contains(&groups.len()) {
                if regroups < MAX_REGROUPS {
                    regroups += 1;
                    debug!(depth, count = groups.len(), "Group count out of range; re-partitioning");
                    prompt = prompts::regroup_prompt(&base_prompt, groups.len());
                    continue;
                }
                state
                    .warnings
                    .push(format!("clustering degraded: group count at depth {depth}"));
                return Ok(Some(self.fallback(ids, depth, total_tokens)));
            }

            // Every group must be strictly smaller than the whole set, or
            // recursion would not terminate.
            let shrinks = groups
                .iter()
                .all(|g| token_sum(g.component_ids.iter(), self.components) < total_tokens);
            if !shrinks {
                state
                    .warnings
                    .push(format!("clustering degraded: non-shrinking group at depth {depth}"));
                return Ok(Some(self.fallback(ids, depth, total_tokens)));
            }

            return Ok(Some(normalize_group_names(groups)));
        }
    }

    fn fallback(&self, ids: &[String], depth: u32, _total_tokens: u64) -> Vec<Group> {
        normalize_group_names(fallback::fallback_partition(
            ids,
            self.components,
            depth,
            self.config.max_token_per_leaf_module,
        ))
    }
}

#[derive(Debug, Default)]
struct CoverageDiff {
    missing: Vec<String>,
    unknown: Vec<String>,
    duplicates: Vec<String>,
}

impl CoverageDiff {
    fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty() && self.duplicates.is_empty()
    }
}

/// Compare the union of group ids against the expected set.
fn coverage_diff(groups: &[Group], expected: &BTreeSet<&str>) -> CoverageDiff {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut diff = CoverageDiff::default();

    for group in groups {
        for id in &group.component_ids {
            if !expected.contains(id.as_str()) {
                diff.unknown.push(id.clone());
            } else if !seen.insert(id.as_str()) {
                diff.duplicates.push(id.clone());
            }
        }
    }
    for id in expected {
        if !seen.contains(id) {
            diff.missing.push((*id).to_string());
        }
    }

    diff.missing.sort();
    diff.unknown.sort();
    diff.duplicates.sort();
    diff.duplicates.dedup();
    diff
}

/// Enforce sibling-name validity: strip path separators and NUL, replace
/// empty names, and disambiguate duplicates with stable suffixes.
fn normalize_group_names(groups: Vec<Group>) -> Vec<Group> {
    let mut taken: HashSet<String> = HashSet::new();
    groups
        .into_iter()
        .enumerate()
        .map(|(i, mut group)| {
            let mut name: String = group
                .name
                .chars()
                .map(|c| if c == '/' || c == '\\' || c == '\0' { '-' } else { c })
                .collect::<String>()
                .trim()
                .to_string();
            if name.is_empty() {
                name = format!("group-{}", i + 1);
            }
            if !taken.insert(name.clone()) {
                let mut n = 2;
                while !taken.insert(format!("{name}-{n}")) {
                    n += 1;
                }
                name = format!("{name}-{n}");
            }
            group.name = name;
            group
        })
        .collect()
}

/// Name derived from the longest common ancestor directory of the
/// components' file paths.
fn lca_name(ids: &[String], components: &ComponentMap) -> Option<String> {
    let mut prefix: Option<Vec<String>> = None;
    for id in ids {
        let component = components.get(id)?;
        let dirs: Vec<String> = Path::new(&component.file_path)
            .parent()?
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        prefix = Some(match prefix {
            None => dirs,
            Some(current) => current
                .into_iter()
                .zip(dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    prefix?.last().cloned()
}
