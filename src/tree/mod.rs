//! The module tree: the authoritative hierarchy of documentation modules.
//!
//! A `ModuleTree` is an insertion-ordered mapping of module names to
//! [`Module`]s. Leaf modules own component ids directly; parent modules own
//! only children. The tree is created once by the clusterer and afterwards
//! mutated only by the scheduler (status and doc paths), with every change
//! persisted atomically by the [`store::TreeStore`].

pub mod store;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Completion state of one module's documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    #[default]
    Absent,
    InProgress,
    Done,
    Failed,
}

impl DocStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// One node of the module tree. The module's name is the key under which it
/// is stored in its parent's `children` (or at the tree root).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Short human-readable phrase describing the module.
    #[serde(default)]
    pub description: String,
    /// Component ids owned directly by this module; empty for parents.
    #[serde(rename = "components", default)]
    pub component_ids: Vec<String>,
    #[serde(default)]
    pub doc_status: DocStatus,
    /// Relative path of the generated Markdown; non-empty iff `done`.
    #[serde(default)]
    pub doc_path: String,
    #[serde(default)]
    pub children: ModuleChildren,
}

impl Module {
    /// Create a leaf module owning the given component ids.
    pub fn leaf(description: impl Into<String>, component_ids: Vec<String>) -> Self {
        Self {
            description: description.into(),
            component_ids,
            doc_status: DocStatus::Absent,
            doc_path: String::new(),
            children: ModuleChildren::default(),
        }
    }

    /// Create a parent module over the given children.
    pub fn parent(description: impl Into<String>, children: ModuleChildren) -> Self {
        Self {
            description: description.into(),
            component_ids: Vec::new(),
            doc_status: DocStatus::Absent,
            doc_path: String::new(),
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of components in this module's whole subtree.
    pub fn component_count(&self) -> usize {
        self.component_ids.len()
            + self
                .children
                .iter()
                .map(|(_, m)| m.component_count())
                .sum::<usize>()
    }

    /// True when this module and every descendant is `done`.
    pub fn subtree_done(&self) -> bool {
        self.doc_status.is_done() && self.children.iter().all(|(_, m)| m.subtree_done())
    }
}

/// Insertion-ordered `name → Module` map.
///
/// Serialized as a JSON object whose key order is the child order, which the
/// persisted schema and the determinism property both depend on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleChildren(Vec<(String, Module)>);

impl ModuleChildren {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert preserving order; replaces an existing entry in place.
    pub fn insert(&mut self, name: impl Into<String>, module: Module) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = module;
        } else {
            self.0.push((name, module));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.0.iter_mut().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Module)> {
        self.0.iter().map(|(n, m)| (n, m))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Module)> {
        self.0.iter_mut().map(|(n, m)| (&*n, m))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Module)> for ModuleChildren {
    fn from_iter<I: IntoIterator<Item = (String, Module)>>(iter: I) -> Self {
        let mut children = Self::new();
        for (name, module) in iter {
            children.insert(name, module);
        }
        children
    }
}

impl Serialize for ModuleChildren {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, module) in &self.0 {
            map.serialize_entry(name, module)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ModuleChildren {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChildrenVisitor;

        impl<'de> Visitor<'de> for ChildrenVisitor {
            type Value = ModuleChildren;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of module name to module")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, module)) = access.next_entry::<String, Module>()? {
                    entries.push((name, module));
                }
                Ok(ModuleChildren(entries))
            }
        }

        deserializer.deserialize_map(ChildrenVisitor)
    }
}

/// The whole module hierarchy: the ordered top-level modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleTree(pub ModuleChildren);

/// A module's location in the tree as the names from the root.
pub type ModulePath = Vec<String>;

impl ModuleTree {
    pub fn new(roots: ModuleChildren) -> Self {
        Self(roots)
    }

    pub fn roots(&self) -> &ModuleChildren {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, path: &[String]) -> Option<&Module> {
        let (first, rest) = path.split_first()?;
        let mut module = self.0.get(first)?;
        for name in rest {
            module = module.children.get(name)?;
        }
        Some(module)
    }

    pub fn get_mut(&mut self, path: &[String]) -> Option<&mut Module> {
        let (first, rest) = path.split_first()?;
        let mut module = self.0.get_mut(first)?;
        for name in rest {
            module = module.children.get_mut(name)?;
        }
        Some(module)
    }

    /// Pre-order walk yielding `(path, module)` for every module.
    pub fn walk(&self) -> Vec<(ModulePath, &Module)> {
        fn recurse<'a>(
            children: &'a ModuleChildren,
            prefix: &[String],
            out: &mut Vec<(ModulePath, &'a Module)>,
        ) {
            for (name, module) in children.iter() {
                let mut path = prefix.to_vec();
                path.push(name.clone());
                out.push((path.clone(), module));
                recurse(&module.children, &path, out);
            }
        }
        let mut out = Vec::new();
        recurse(&self.0, &[], &mut out);
        out
    }

    /// Total number of modules in the tree.
    pub fn module_count(&self) -> usize {
        self.walk().len()
    }

    /// Number of leaf modules.
    pub fn leaf_count(&self) -> usize {
        self.walk().iter().filter(|(_, m)| m.is_leaf()).count()
    }

    /// Depth of the deepest module; an empty tree has depth 0.
    pub fn depth(&self) -> u32 {
        self.walk()
            .iter()
            .map(|(path, _)| path.len() as u32)
            .max()
            .unwrap_or(0)
    }

    /// Every component id owned by any module, in tree order.
    pub fn all_component_ids(&self) -> Vec<String> {
        self.walk()
            .into_iter()
            .flat_map(|(_, m)| m.component_ids.iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// True when every module in the tree is `done`.
    pub fn all_done(&self) -> bool {
        self.walk().iter().all(|(_, m)| m.doc_status.is_done())
    }
}

/// Map a human-readable module name to a safe filesystem basename stem.
///
/// Lowercases, replaces runs of characters outside `[A-Za-z0-9_-]` with a
/// single `_`, collapses repeated `_`, and truncates to 120 bytes. The
/// result is idempotent under re-application.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for ch in name.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' {
            last_was_underscore = false;
            Some(ch.to_ascii_lowercase())
        } else if ch == '_' {
            if last_was_underscore {
                None
            } else {
                last_was_underscore = true;
                Some('_')
            }
        } else if last_was_underscore {
            None
        } else {
            last_was_underscore = true;
            Some('_')
        };
        if let Some(c) = mapped {
            out.push(c);
        }
        if out.len() >= 120 {
            break;
        }
    }
    out.truncate(120);
    if out.is_empty() {
        out.push_str("module");
    }
    out
}

/// The root overview's fixed file name.
pub const OVERVIEW_FILENAME: &str = "overview.md";
/// Live tree checkpoint, updated after every module completion.
pub const MODULE_TREE_FILENAME: &str = "module_tree.json";
/// The initial clustering result; never mutated after creation.
pub const FIRST_MODULE_TREE_FILENAME: &str = "first_module_tree.json";
/// Generation metadata written at end of run.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Deterministic assignment of Markdown file names to module paths.
///
/// Computed with a pre-order walk: each module takes `sanitize(name).md`,
/// and collisions take stable `-2`, `-3`, … suffixes in walk order. The
/// plan is a pure function of the tree, so a resumed run recomputes the
/// identical assignment. `overview` is pre-reserved for the root document.
#[derive(Debug, Clone)]
pub struct FileNamePlan {
    by_path: HashMap<ModulePath, String>,
}

impl FileNamePlan {
    pub fn for_tree(tree: &ModuleTree) -> Self {
        let mut taken: HashMap<String, u32> = HashMap::new();
        taken.insert("overview".to_string(), 1);
        let mut by_path = HashMap::new();

        for (path, _) in tree.walk() {
            let stem = sanitize(path.last().expect("walk paths are non-empty"));
            let count = taken.entry(stem.clone()).or_insert(0);
            *count += 1;
            let file = if *count == 1 {
                format!("{stem}.md")
            } else {
                format!("{stem}-{count}.md")
            };
            by_path.insert(path, file);
        }

        Self { by_path }
    }

    /// File name for a module path; the empty path is the root overview.
    pub fn file_for(&self, path: &[String]) -> String {
        if path.is_empty() {
            return OVERVIEW_FILENAME.to_string();
        }
        self.by_path
            .get(path)
            .cloned()
            .unwrap_or_else(|| format!("{}.md", sanitize(path.last().expect("non-empty path"))))
    }
}
