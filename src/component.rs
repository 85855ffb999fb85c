//! Input data model: the parsed components the engine documents.
//!
//! Components are produced by the parsing collaborator and are immutable
//! for the duration of a run. The engine references them by id only.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Kind of source declaration a component represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Function,
    Class,
    Method,
    Interface,
    Struct,
    Enum,
    #[default]
    Other,
}

/// A documentable unit of source code identified by a stable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Fully-qualified stable id (dotted path of file + symbol).
    pub id: String,
    #[serde(default)]
    pub kind: ComponentKind,
    pub file_path: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    /// Literal text of the definition.
    #[serde(default)]
    pub source_code: String,
    /// Best-effort dependency ids; may be incomplete, never traversed as
    /// ownership.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Token estimate; recomputed from source length when absent.
    #[serde(default)]
    pub token_estimate: Option<u64>,
}

impl Component {
    /// Effective token estimate: the caller-provided value, or ⌈chars/4⌉.
    pub fn tokens(&self) -> u64 {
        self.token_estimate
            .unwrap_or_else(|| estimate_tokens(&self.source_code))
    }
}

/// ⌈chars/4⌉ — the estimate used when the parser did not supply one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// All components of the repository, keyed by id.
pub type ComponentMap = HashMap<String, Component>;

/// Ids designated as documentable (top-level declarations).
pub type LeafSet = BTreeSet<String>;

/// Sum of token estimates for a set of ids, ignoring unknown ids.
pub fn token_sum<'a, I>(ids: I, components: &ComponentMap) -> u64
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter()
        .filter_map(|id| components.get(id))
        .map(Component::tokens)
        .sum()
}

/// On-disk input consumed by the CLI: the parser collaborator's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsFile {
    pub components: ComponentMap,
    pub leaf_ids: LeafSet,
}
