//! `docweave status` — inspect a docs directory's generation state.

use anyhow::Result;
use console::style;
use docweave::tree::store::TreeStore;
use docweave::tree::{DocStatus, METADATA_FILENAME, OVERVIEW_FILENAME};
use std::path::Path;

pub fn cmd_status(docs_dir: &Path) -> Result<()> {
    let store = TreeStore::new(docs_dir);
    let Some(tree) = store.load_tree()? else {
        println!("No module tree found in {}", docs_dir.display());
        return Ok(());
    };

    let mut done = 0;
    for (path, module) in tree.walk() {
        let indent = "  ".repeat(path.len() - 1);
        let name = path.last().expect("walk paths are non-empty");
        let glyph = match module.doc_status {
            DocStatus::Done => {
                done += 1;
                style("✓").green()
            }
            DocStatus::InProgress => style("…").yellow(),
            DocStatus::Failed => style("✗").red(),
            DocStatus::Absent => style("·").dim(),
        };
        let file = if module.doc_path.is_empty() {
            String::new()
        } else {
            format!("  {}", style(&module.doc_path).dim())
        };
        println!("{indent}{glyph} {name}{file}");
    }

    let total = tree.module_count();
    let overview = store.markdown_present(OVERVIEW_FILENAME);
    println!();
    println!(
        "{done}/{total} modules documented, overview {}",
        if overview {
            style("present").green()
        } else {
            style("missing").red()
        }
    );

    let metadata_path = docs_dir.join(METADATA_FILENAME);
    if let Ok(text) = std::fs::read_to_string(&metadata_path) {
        if let Ok(metadata) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(generated_at) = metadata["generated_at"].as_str() {
                println!("last generated {generated_at}");
            }
        }
    }

    Ok(())
}
