//! Durable persistence for the module tree and generated Markdown.
//!
//! All writes go through temp+fsync+rename so that a crash or cancellation
//! at any point leaves either the previous or the new file, never a torn
//! one. Resume after interruption is exact because the tree checkpoint is
//! rewritten after every module completion.

use crate::errors::EngineError;
use crate::tree::{
    ModuleTree, FIRST_MODULE_TREE_FILENAME, METADATA_FILENAME, MODULE_TREE_FILENAME,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Generation metadata written at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub generated_at: String,
    pub commit_id: String,
    pub main_model: String,
    pub fallback_models: Vec<String>,
    pub counts: MetadataCounts,
    pub files: Vec<String>,
    /// Models (and "subprocess") that actually served requests this run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataCounts {
    pub components: usize,
    pub leaf_nodes: usize,
    pub modules: usize,
    pub max_depth: u32,
}

/// Filesystem store rooted at the docs output directory.
#[derive(Debug, Clone)]
pub struct TreeStore {
    docs_dir: PathBuf,
}

impl TreeStore {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    pub fn ensure_dir(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.docs_dir)
            .map_err(|e| EngineError::filesystem(&self.docs_dir, e))
    }

    fn tree_path(&self) -> PathBuf {
        self.docs_dir.join(MODULE_TREE_FILENAME)
    }

    /// Load the live tree checkpoint if one exists.
    pub fn load_tree(&self) -> Result<Option<ModuleTree>, EngineError> {
        let path = self.tree_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| EngineError::filesystem(&path, e))?;
        let tree: ModuleTree = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("corrupt {}: {e}", path.display()))?;
        debug!(path = %path.display(), modules = tree.module_count(), "Loaded module tree");
        Ok(Some(tree))
    }

    /// Persist the live tree checkpoint atomically.
    pub fn save_tree(&self, tree: &ModuleTree) -> Result<(), EngineError> {
        self.write_json(&self.tree_path(), tree)
    }

    /// Persist the initial clustering; written once and never mutated.
    pub fn save_first_tree(&self, tree: &ModuleTree) -> Result<(), EngineError> {
        self.write_json(&self.docs_dir.join(FIRST_MODULE_TREE_FILENAME), tree)
    }

    /// Write a finished Markdown artifact atomically.
    pub fn write_markdown(&self, file_name: &str, content: &str) -> Result<(), EngineError> {
        let path = self.docs_dir.join(file_name);
        atomic_write(&path, content.as_bytes()).map_err(|e| EngineError::filesystem(&path, e))
    }

    /// Whether a previously generated artifact is present and non-empty.
    pub fn markdown_present(&self, file_name: &str) -> bool {
        let path = self.docs_dir.join(file_name);
        fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
    }

    /// Rename a module file to another name (degenerate single-module runs
    /// promote their only document to the overview).
    pub fn rename_markdown(&self, from: &str, to: &str) -> Result<(), EngineError> {
        let src = self.docs_dir.join(from);
        let dst = self.docs_dir.join(to);
        fs::rename(&src, &dst).map_err(|e| EngineError::filesystem(&src, e))
    }

    pub fn write_metadata(&self, metadata: &Metadata) -> Result<(), EngineError> {
        self.write_json(&self.docs_dir.join(METADATA_FILENAME), metadata)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), EngineError> {
        let body = serde_json::to_string_pretty(value)
            .map_err(|e| anyhow::anyhow!("serialize {}: {e}", path.display()))?;
        atomic_write(path, body.as_bytes()).map_err(|e| EngineError::filesystem(path, e))
    }
}

/// Build end-of-run metadata from the final tree and config. `files` is the
/// ordered list of Markdown artifacts actually present on disk, overview
/// first.
pub fn build_metadata(
    tree: &ModuleTree,
    config: &crate::config::Config,
    component_count: usize,
    files: Vec<String>,
    models_used: Vec<String>,
    errors: Vec<String>,
) -> Metadata {
    Metadata {
        generated_at: Utc::now().to_rfc3339(),
        commit_id: head_commit_id(&config.repo_dir).unwrap_or_default(),
        main_model: config.main_model.clone(),
        fallback_models: config.fallback_models.clone(),
        counts: MetadataCounts {
            components: component_count,
            leaf_nodes: tree.leaf_count(),
            modules: tree.module_count(),
            max_depth: tree.depth(),
        },
        files,
        models_used,
        errors,
    }
}

/// Best-effort HEAD commit id of the documented repository.
pub fn head_commit_id(repo_dir: &Path) -> Option<String> {
    let repo = git2::Repository::discover(repo_dir).ok()?;
    let head = repo.head().ok()?;
    head.target().map(|oid| oid.to_string())
}

/// Write-temp + fsync + rename. The temp file lives in the target
/// directory so the rename stays on one filesystem.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Module, ModuleChildren};
    use tempfile::tempdir;

    fn sample_tree() -> ModuleTree {
        let mut roots = ModuleChildren::new();
        roots.insert("api", Module::leaf("HTTP surface", vec!["api.handler".into()]));
        roots.insert("core", Module::leaf("Core logic", vec!["core.run".into()]));
        ModuleTree::new(roots)
    }

    #[test]
    fn load_missing_tree_is_none() {
        let dir = tempdir().unwrap();
        let store = TreeStore::new(dir.path());
        assert!(store.load_tree().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = TreeStore::new(dir.path());
        let tree = sample_tree();
        store.save_tree(&tree).unwrap();

        let loaded = store.load_tree().unwrap().unwrap();
        assert_eq!(tree, loaded);

        // No stray temp file after a successful write.
        assert!(!dir.path().join("module_tree.tmp").exists());
    }

    #[test]
    fn save_twice_is_byte_identical() {
        let dir = tempdir().unwrap();
        let store = TreeStore::new(dir.path());
        let tree = sample_tree();
        store.save_tree(&tree).unwrap();
        let first = fs::read(dir.path().join(MODULE_TREE_FILENAME)).unwrap();
        store.save_tree(&tree).unwrap();
        let second = fs::read(dir.path().join(MODULE_TREE_FILENAME)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn markdown_present_requires_non_empty() {
        let dir = tempdir().unwrap();
        let store = TreeStore::new(dir.path());
        assert!(!store.markdown_present("api.md"));

        fs::write(dir.path().join("api.md"), "").unwrap();
        assert!(!store.markdown_present("api.md"));

        store.write_markdown("api.md", "# API\n").unwrap();
        assert!(store.markdown_present("api.md"));
    }

    #[test]
    fn corrupt_tree_is_an_error_not_a_panic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODULE_TREE_FILENAME), "{not json").unwrap();
        let store = TreeStore::new(dir.path());
        assert!(store.load_tree().is_err());
    }

    #[test]
    fn metadata_schema_matches_contract() {
        let dir = tempdir().unwrap();
        let store = TreeStore::new(dir.path());
        let metadata = Metadata {
            generated_at: Utc::now().to_rfc3339(),
            commit_id: String::new(),
            main_model: "m".to_string(),
            fallback_models: vec!["f".to_string()],
            counts: MetadataCounts {
                components: 3,
                leaf_nodes: 2,
                modules: 2,
                max_depth: 1,
            },
            files: vec!["overview.md".to_string(), "api.md".to_string()],
            models_used: Vec::new(),
            errors: Vec::new(),
        };
        store.write_metadata(&metadata).unwrap();

        let text = fs::read_to_string(dir.path().join(METADATA_FILENAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["generated_at"].is_string());
        assert_eq!(value["counts"]["components"], 3);
        assert_eq!(value["files"][0], "overview.md");
        // Empty error list is omitted from the schema.
        assert!(value.get("errors").is_none());
    }
}
