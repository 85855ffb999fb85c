//! Prompt construction for the partition oracle.
//!
//! Partition prompts carry qualified names, file paths, and best-effort
//! dependencies only — never source bodies — to keep the request small.

use crate::component::ComponentMap;

/// Maximum dependencies listed per component in the partition prompt.
const MAX_DEPS_SHOWN: usize = 5;

/// The first partition request for a component set.
pub fn partition_prompt(
    ids: &[String],
    components: &ComponentMap,
    custom_instructions: Option<&str>,
) -> String {
    let mut listing = String::new();
    for id in ids {
        match components.get(id) {
            Some(c) => {
                listing.push_str(&format!("- {} ({})", id, c.file_path));
                if !c.depends_on.is_empty() {
                    let deps: Vec<&str> = c
                        .depends_on
                        .iter()
                        .take(MAX_DEPS_SHOWN)
                        .map(String::as_str)
                        .collect();
                    listing.push_str(&format!(" [depends on: {}]", deps.join(", ")));
                }
                listing.push('\n');
            }
            None => {
                listing.push_str(&format!("- {id}\n"));
            }
        }
    }

    let extra = custom_instructions
        .map(|s| format!("\n{s}\n"))
        .unwrap_or_default();

    format!(
        r#"You are organizing a codebase into cohesive functional modules for documentation.

Group the following code components into modules. Components that collaborate closely or implement one concern belong together.

Components:
{listing}
Rules:
- Return between 2 and 12 groups.
- Every component id must appear in exactly one group.
- Use only the ids listed above; do not invent ids.
- Give each group a short human-readable name and a one-phrase description.
{extra}
Respond with a single JSON object of this exact shape and nothing else:
{{"groups": [{{"name": "...", "description": "...", "component_ids": ["...", "..."]}}]}}"#
    )
}

/// A repair request: the previous grouping plus a structured diff of what
/// was wrong with it.
pub fn repair_prompt(
    original_prompt: &str,
    previous_output: &str,
    missing: &[String],
    unknown: &[String],
    duplicates: &[String],
) -> String {
    let mut problems = String::new();
    if !missing.is_empty() {
        problems.push_str(&format!("- missing_ids: {}\n", missing.join(", ")));
    }
    if !unknown.is_empty() {
        problems.push_str(&format!("- unknown_ids: {}\n", unknown.join(", ")));
    }
    if !duplicates.is_empty() {
        problems.push_str(&format!("- duplicate_ids: {}\n", duplicates.join(", ")));
    }
    if problems.is_empty() {
        problems.push_str("- output was not a valid JSON object of the required shape\n");
    }

    format!(
        r#"{original_prompt}

Your previous answer was:
{previous_output}

It was invalid:
{problems}
Return the complete corrected JSON object. Every listed component id must appear in exactly one group, and no other ids may appear."#
    )
}

/// A re-partition request after a group-count violation.
pub fn regroup_prompt(original_prompt: &str, group_count: usize) -> String {
    format!(
        r#"{original_prompt}

Your previous answer had {group_count} groups, which is outside the allowed range of 2 to 12. Partition the components again into between 2 and 12 groups."#
    )
}
