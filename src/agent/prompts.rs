//! Prompt assembly for module documentation and overview generation.

use crate::component::ComponentMap;
use crate::tree::{Module, ModuleTree};
use std::path::Path;

/// Footer demanding raw Markdown from a piped agent.
pub const CMD_AGENT_FOOTER: &str = r#"

---
IMPORTANT OUTPUT INSTRUCTIONS:
- Output ONLY the complete markdown content for the documentation file.
- Do NOT add any preamble, explanation, or commentary before or after the markdown.
- Do NOT use XML/JSON wrappers. Just raw markdown starting from the first heading.
- Mermaid diagrams are welcome; make sure they are well-formed.
"#;

/// Footer demanding a tagged overview from a piped agent.
pub const CMD_OVERVIEW_FOOTER: &str = r#"

---
IMPORTANT OUTPUT INSTRUCTIONS:
Return ONLY the markdown content wrapped exactly as shown:
<OVERVIEW>
...your markdown here...
</OVERVIEW>
"#;

/// System prompt for a simple leaf module (single-call generation).
pub fn leaf_system_prompt(
    module_name: &str,
    module_path: &[String],
    description: &str,
    tree_outline: &str,
    custom_instructions: Option<&str>,
) -> String {
    let extra = custom_instructions
        .map(|s| format!("\n{s}\n"))
        .unwrap_or_default();
    let responsibility = if description.is_empty() {
        String::new()
    } else {
        format!("\nResponsibility: {description}\n")
    };
    format!(
        r#"You are a senior engineer writing reference documentation for the module `{module_name}` (path: {path}).
{responsibility}
Write a complete markdown document describing what the module does, its key components, how they interact, and how the module fits into the repository. Use Mermaid diagrams where they clarify structure or flow.

Repository module tree for orientation:
{tree_outline}
{extra}"#,
        path = display_path(module_path),
    )
}

/// System prompt for a complex module driven through the agent loop.
/// Includes the tool manifest and the required output file name.
pub fn complex_system_prompt(
    module_name: &str,
    module_path: &[String],
    description: &str,
    file_name: &str,
    tree_outline: &str,
    child_names: &[String],
    custom_instructions: Option<&str>,
) -> String {
    let extra = custom_instructions
        .map(|s| format!("\n{s}\n"))
        .unwrap_or_default();
    let responsibility = if description.is_empty() {
        String::new()
    } else {
        format!("\nResponsibility: {description}\n")
    };
    let sub_module_tool = if child_names.is_empty() {
        String::new()
    } else {
        format!(
            r#"
{{"tool": "generate_sub_module_documentation", "child_names": ["..."]}}
    Generates documentation for the named child modules ({children}) before you synthesize this one."#,
            children = child_names.join(", "),
        )
    };

    format!(
        r#"You are a senior engineer writing reference documentation for the complex module `{module_name}` (path: {path}).
{responsibility}
Repository module tree for orientation:
{tree_outline}

Work iteratively. On each turn, either invoke exactly one tool by replying with a single JSON object, or reply with a short closing message once the documentation file has been created.

Available tools:
{{"tool": "read_code_components", "component_ids": ["..."]}}
    Returns the source code of the named components.
{{"tool": "str_replace_editor", "op": "view|create|str_replace|insert|undo_edit", "path": "...", ...}}
    File operations. "view" takes an optional "view_range": [start, end]; "create" takes "file_text"; "str_replace" takes "old_str" and "new_str"; "insert" takes "insert_line" and "new_str". Writes are confined to the documentation directory.{sub_module_tool}

You MUST create the final markdown document at `{file_name}` using str_replace_editor with op "create". Use Mermaid diagrams where they clarify structure or flow.
{extra}"#,
        path = display_path(module_path),
    )
}

/// User prompt listing the module's components. `with_sources` inlines the
/// full source bodies (subprocess and simple-leaf modes); otherwise only
/// ids and locations are listed and the agent reads code through tools.
pub fn module_user_prompt(
    module_name: &str,
    component_ids: &[String],
    components: &ComponentMap,
    with_sources: bool,
) -> String {
    let mut listing = String::new();
    for id in component_ids {
        match components.get(id) {
            Some(c) => {
                listing.push_str(&format!(
                    "### {} ({}:{}-{})\n",
                    id, c.file_path, c.start_line, c.end_line
                ));
                if with_sources {
                    listing.push_str("```\n");
                    listing.push_str(&c.source_code);
                    if !c.source_code.ends_with('\n') {
                        listing.push('\n');
                    }
                    listing.push_str("```\n\n");
                }
            }
            None => listing.push_str(&format!("### {id} (source unavailable)\n\n")),
        }
    }

    format!(
        "Document the module `{module_name}`. It owns these components:\n\n{listing}"
    )
}

/// Overview prompt for the whole repository.
pub fn repo_overview_prompt(repo_name: &str, structure_json: &str) -> String {
    format!(
        r#"You are writing the top-level architecture overview for the repository `{repo_name}`.

Below is the repository's module structure. Modules marked with "docs" include their full generated documentation; use it to synthesize an accurate overview covering the purpose of the system, the responsibilities of each module, and how the modules interact. Include a Mermaid architecture diagram.

{structure_json}"#
    )
}

/// Overview prompt for an intermediate parent module.
pub fn module_overview_prompt(module_name: &str, structure_json: &str) -> String {
    format!(
        r#"You are writing the synthesis document for the parent module `{module_name}`.

Below is the repository's module structure with this module marked "is_target". Its direct children include their full generated documentation; synthesize an overview of the module covering its responsibilities, how its children cooperate, and cross-child interactions. Include Mermaid diagrams where useful.

{structure_json}"#
    )
}

/// Indented names-and-descriptions outline of the whole tree.
pub fn tree_outline(tree: &ModuleTree) -> String {
    let mut out = String::new();
    for (path, module) in tree.walk() {
        let indent = "  ".repeat(path.len() - 1);
        let name = path.last().expect("walk paths are non-empty");
        if module.description.is_empty() {
            out.push_str(&format!("{indent}- {name}\n"));
        } else {
            out.push_str(&format!("{indent}- {name}: {}\n", module.description));
        }
    }
    out
}

/// Contextual payload for parent/overview generation: a recursive copy of
/// the tree in which only the target's direct children carry their full
/// generated Markdown; every other module appears as name, description and
/// component count. The target is tagged `is_target`.
pub fn overview_payload(
    tree: &ModuleTree,
    target_path: &[String],
    docs_dir: &Path,
) -> serde_json::Value {
    fn module_value(
        module: &Module,
        path: &[String],
        target_path: &[String],
        docs_dir: &Path,
    ) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "description".to_string(),
            serde_json::Value::String(module.description.clone()),
        );
        obj.insert(
            "component_count".to_string(),
            serde_json::Value::Number(module.component_count().into()),
        );

        if path == target_path {
            obj.insert("is_target".to_string(), serde_json::Value::Bool(true));
        }

        // Direct child of the target: inline its generated documentation.
        if path.len() == target_path.len() + 1 && path.starts_with(target_path) {
            let docs = if module.doc_path.is_empty() {
                String::new()
            } else {
                std::fs::read_to_string(docs_dir.join(&module.doc_path)).unwrap_or_default()
            };
            obj.insert("docs".to_string(), serde_json::Value::String(docs));
        }

        if !module.children.is_empty() {
            let mut children = serde_json::Map::new();
            for (child_name, child) in module.children.iter() {
                let mut child_path = path.to_vec();
                child_path.push(child_name.clone());
                children.insert(
                    child_name.clone(),
                    module_value(child, &child_path, target_path, docs_dir),
                );
            }
            obj.insert("children".to_string(), serde_json::Value::Object(children));
        }

        serde_json::Value::Object(obj)
    }

    let mut root = serde_json::Map::new();
    for (name, module) in tree.roots().iter() {
        let path = vec![name.clone()];
        root.insert(
            name.clone(),
            module_value(module, &path, target_path, docs_dir),
        );
    }
    serde_json::Value::Object(root)
}

fn display_path(path: &[String]) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.join(" / ")
    }
}
