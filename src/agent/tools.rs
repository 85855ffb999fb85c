//! Tool dispatch for the API-mode agent loop.
//!
//! Tool calls arrive as JSON objects in the model's reply and are executed
//! sequentially. Failures are reported back to the agent as plain-text
//! results, never raised. All editor writes are confined to the docs
//! directory; `view` may additionally read anywhere under the repo
//! directory.

use crate::component::ComponentMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component as PathComponent, Path, PathBuf};

/// A parsed tool call from the agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolInvocation {
    ReadCodeComponents {
        component_ids: Vec<String>,
    },
    StrReplaceEditor {
        op: EditorOp,
        path: String,
        #[serde(default)]
        file_text: Option<String>,
        #[serde(default)]
        old_str: Option<String>,
        #[serde(default)]
        new_str: Option<String>,
        #[serde(default)]
        insert_line: Option<usize>,
        #[serde(default)]
        view_range: Option<(usize, usize)>,
    },
    GenerateSubModuleDocumentation {
        child_names: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorOp {
    View,
    Create,
    StrReplace,
    Insert,
    UndoEdit,
}

/// Executes the synchronous tools for one module's agent loop.
///
/// Holds an undo stack per edited path; `None` entries mean the file did
/// not exist before the edit.
pub struct Toolbox<'a> {
    components: &'a ComponentMap,
    docs_dir: PathBuf,
    repo_dir: PathBuf,
    undo: HashMap<PathBuf, Vec<Option<String>>>,
}

impl<'a> Toolbox<'a> {
    pub fn new(components: &'a ComponentMap, docs_dir: PathBuf, repo_dir: PathBuf) -> Self {
        Self {
            components,
            docs_dir,
            repo_dir,
            undo: HashMap::new(),
        }
    }

    /// Concatenated source bodies with location headers.
    pub fn read_code_components(&self, ids: &[String]) -> String {
        let mut out = String::new();
        for id in ids {
            match self.components.get(id) {
                Some(c) => {
                    out.push_str(&format!(
                        "## {} ({}:{}-{})\n{}\n\n",
                        id, c.file_path, c.start_line, c.end_line, c.source_code
                    ));
                }
                None => out.push_str(&format!("## {id}\nunknown component id\n\n")),
            }
        }
        if out.is_empty() {
            "no component ids given".to_string()
        } else {
            out
        }
    }

    /// Execute one editor command, returning the result or an error string.
    pub fn editor(
        &mut self,
        op: EditorOp,
        path: &str,
        file_text: Option<&str>,
        old_str: Option<&str>,
        new_str: Option<&str>,
        insert_line: Option<usize>,
        view_range: Option<(usize, usize)>,
    ) -> String {
        match op {
            EditorOp::View => self.view(path, view_range),
            EditorOp::Create => match file_text {
                Some(text) => self.create(path, text),
                None => "error: create requires file_text".to_string(),
            },
            EditorOp::StrReplace => match (old_str, new_str) {
                (Some(old), Some(new)) => self.str_replace(path, old, new),
                _ => "error: str_replace requires old_str and new_str".to_string(),
            },
            EditorOp::Insert => match (insert_line, new_str) {
                (Some(line), Some(text)) => self.insert(path, line, text),
                _ => "error: insert requires insert_line and new_str".to_string(),
            },
            EditorOp::UndoEdit => self.undo_edit(path),
        }
    }

    fn view(&self, path: &str, range: Option<(usize, usize)>) -> String {
        let resolved = match self.resolve_read(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if resolved.is_dir() {
            let mut entries: Vec<String> = match std::fs::read_dir(&resolved) {
                Ok(iter) => iter
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect(),
                Err(e) => return format!("error: cannot list {path}: {e}"),
            };
            entries.sort();
            return entries.join("\n");
        }
        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return format!("error: cannot read {path}: {e}"),
        };
        let lines: Vec<&str> = content.lines().collect();
        let (start, end) = match range {
            Some((s, e)) => (s.max(1), e.min(lines.len())),
            None => (1, lines.len()),
        };
        lines
            .iter()
            .enumerate()
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start.saturating_sub(1)))
            .map(|(i, line)| format!("{:>6}\t{line}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn create(&mut self, path: &str, text: &str) -> String {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        self.push_undo(&resolved);
        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return format!("error: cannot create directory for {path}: {e}");
            }
        }
        match std::fs::write(&resolved, text) {
            Ok(()) => format!("created {path} ({} bytes)", text.len()),
            Err(e) => format!("error: cannot write {path}: {e}"),
        }
    }

    fn str_replace(&mut self, path: &str, old: &str, new: &str) -> String {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return format!("error: cannot read {path}: {e}"),
        };
        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return format!("error: old_str not found in {path}");
        }
        if occurrences > 1 {
            return format!("error: old_str appears {occurrences} times in {path}; it must be unique");
        }
        self.push_undo(&resolved);
        let updated = content.replacen(old, new, 1);
        match std::fs::write(&resolved, updated) {
            Ok(()) => format!("replaced 1 occurrence in {path}"),
            Err(e) => format!("error: cannot write {path}: {e}"),
        }
    }

    fn insert(&mut self, path: &str, line: usize, text: &str) -> String {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return format!("error: cannot read {path}: {e}"),
        };
        let mut lines: Vec<&str> = content.lines().collect();
        let at = line.min(lines.len());
        lines.insert(at, text);
        self.push_undo(&resolved);
        match std::fs::write(&resolved, lines.join("\n") + "\n") {
            Ok(()) => format!("inserted after line {at} in {path}"),
            Err(e) => format!("error: cannot write {path}: {e}"),
        }
    }

    fn undo_edit(&mut self, path: &str) -> String {
        let resolved = match self.resolve_write(path) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match self.undo.get_mut(&resolved).and_then(Vec::pop) {
            Some(Some(previous)) => match std::fs::write(&resolved, previous) {
                Ok(()) => format!("reverted last edit to {path}"),
                Err(e) => format!("error: cannot restore {path}: {e}"),
            },
            Some(None) => match std::fs::remove_file(&resolved) {
                Ok(()) => format!("removed {path} (did not exist before the edit)"),
                Err(e) => format!("error: cannot remove {path}: {e}"),
            },
            None => format!("error: no edits to undo for {path}"),
        }
    }

    fn push_undo(&mut self, resolved: &Path) {
        let previous = std::fs::read_to_string(resolved).ok();
        self.undo
            .entry(resolved.to_path_buf())
            .or_default()
            .push(previous);
    }

    /// Resolve a write path; it must stay under `docs_dir`.
    fn resolve_write(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = normalize(&self.docs_dir, path);
        if resolved.starts_with(&self.docs_dir) {
            Ok(resolved)
        } else {
            Err(format!(
                "error: write access outside the documentation directory is not allowed: {path}"
            ))
        }
    }

    /// Resolve a read path; `docs_dir` and `repo_dir` are both readable.
    /// A relative path is tried against the docs directory first, then the
    /// repository.
    fn resolve_read(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = normalize(&self.docs_dir, path);
        if resolved.starts_with(&self.docs_dir) {
            if resolved.exists() {
                return Ok(resolved);
            }
            let in_repo = normalize(&self.repo_dir, path);
            if in_repo.starts_with(&self.repo_dir) && in_repo.exists() {
                return Ok(in_repo);
            }
            return Ok(resolved);
        }
        if resolved.starts_with(&self.repo_dir) {
            return Ok(resolved);
        }
        Err(format!("error: read access not allowed: {path}"))
    }
}

/// Resolve `path` against `base` and normalize `.`/`..` lexically, so the
/// prefix check cannot be escaped through parent components.
fn normalize(base: &Path, path: &str) -> PathBuf {
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            PathComponent::ParentDir => {
                out.pop();
            }
            PathComponent::CurDir => {}
            other => out.push(other),
        }
    }
    out
}
