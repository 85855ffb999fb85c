//! Deterministic fallback partition used when the oracle fails.
//!
//! Groups by the directory component at the current recursion depth; when
//! every id shares that component, splits alphabetically into token-balanced
//! chunks instead. Group order is ASCII-sorted by key.

use crate::cluster::Group;
use crate::component::{token_sum, ComponentMap};
use std::collections::BTreeMap;
use std::path::Component as PathComponent;
use std::path::Path;

/// Partition `ids` without the LLM. `depth` selects which path component
/// keys the groups; `budget` sizes the alphabetic chunks.
pub fn fallback_partition(
    ids: &[String],
    components: &ComponentMap,
    depth: u32,
    budget: u64,
) -> Vec<Group> {
    // BTreeMap gives the ASCII key ordering for free.
    let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for id in ids {
        let key = components
            .get(id)
            .map(|c| path_component_at(&c.file_path, depth as usize))
            .unwrap_or_else(|| "other".to_string());
        by_dir.entry(key).or_default().push(id.clone());
    }

    if by_dir.len() >= 2 {
        return by_dir
            .into_iter()
            .map(|(key, group_ids)| Group {
                name: key.clone(),
                description: format!("Components under {key}"),
                component_ids: group_ids,
            })
            .collect();
    }

    alphabetic_chunks(ids, components, budget)
}

/// The `depth`-th path component, or the file name when the path is
/// shallower than `depth`.
fn path_component_at(file_path: &str, depth: usize) -> String {
    let parts: Vec<String> = Path::new(file_path)
        .components()
        .filter_map(|c| match c {
            PathComponent::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts
        .get(depth)
        .or_else(|| parts.last())
        .cloned()
        .unwrap_or_else(|| "other".to_string())
}

/// Split ASCII-sorted ids into ⌈tok/budget⌉ token-balanced contiguous
/// chunks named `part-01`, `part-02`, …
fn alphabetic_chunks(ids: &[String], components: &ComponentMap, budget: u64) -> Vec<Group> {
    let mut sorted: Vec<String> = ids.to_vec();
    sorted.sort();

    let total = token_sum(sorted.iter(), components);
    let chunk_count = (total.div_ceil(budget.max(1)) as usize).clamp(2, sorted.len().max(2));
    let target = total / chunk_count as u64;

    let mut groups: Vec<Group> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0u64;

    for id in sorted {
        let tokens = token_sum(std::iter::once(&id), components);
        current_tokens += tokens;
        current.push(id);
        let remaining_chunks = chunk_count - groups.len();
        if current_tokens >= target && remaining_chunks > 1 {
            groups.push(chunk_group(groups.len() + 1, std::mem::take(&mut current)));
            current_tokens = 0;
        }
    }
    if !current.is_empty() {
        groups.push(chunk_group(groups.len() + 1, current));
    }

    groups
}

fn chunk_group(index: usize, component_ids: Vec<String>) -> Group {
    Group {
        name: format!("part-{index:02}"),
        description: format!("Alphabetical slice {index}"),
        component_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    fn component(id: &str, file_path: &str, tokens: u64) -> (String, Component) {
        (
            id.to_string(),
            Component {
                id: id.to_string(),
                kind: Default::default(),
                file_path: file_path.to_string(),
                start_line: 1,
                end_line: 1,
                source_code: String::new(),
                depends_on: Default::default(),
                token_estimate: Some(tokens),
            },
        )
    }

    #[test]
    fn groups_by_first_path_component_at_depth_zero() {
        let components: ComponentMap = [
            component("api.routes", "api/routes.py", 100),
            component("api.auth", "api/auth.py", 100),
            component("db.models", "db/models.py", 100),
        ]
        .into_iter()
        .collect();
        let ids: Vec<String> = vec!["api.routes".into(), "api.auth".into(), "db.models".into()];

        let groups = fallback_partition(&ids, &components, 0, 1000);
        assert_eq!(groups.len(), 2);
        // ASCII order by key.
        assert_eq!(groups[0].name, "api");
        assert_eq!(groups[1].name, "db");
        assert_eq!(groups[0].component_ids.len(), 2);
    }

    #[test]
    fn deeper_depth_uses_deeper_component() {
        let components: ComponentMap = [
            component("a", "src/core/a.py", 100),
            component("b", "src/util/b.py", 100),
        ]
        .into_iter()
        .collect();
        let ids: Vec<String> = vec!["a".into(), "b".into()];

        // At depth 0 both share "src": falls through to chunks.
        let groups = fallback_partition(&ids, &components, 0, 150);
        assert!(groups.iter().all(|g| g.name.starts_with("part-")));

        // At depth 1 they split by directory.
        let groups = fallback_partition(&ids, &components, 1, 150);
        assert_eq!(groups[0].name, "core");
        assert_eq!(groups[1].name, "util");
    }

    #[test]
    fn alphabetic_chunks_cover_everything_once() {
        let components: ComponentMap = (0..10)
            .map(|i| component(&format!("m.c{i}"), "m/mod.py", 100))
            .collect();
        let ids: Vec<String> = (0..10).map(|i| format!("m.c{i}")).collect();

        let groups = fallback_partition(&ids, &components, 0, 300);
        let mut seen: Vec<String> = groups
            .iter()
            .flat_map(|g| g.component_ids.clone())
            .collect();
        seen.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(groups.len() >= 2);
        // Chunk names sort in ASCII order.
        let names: Vec<&String> = groups.iter().map(|g| &g.name).collect();
        let mut sorted_names = names.clone();
        sorted_names.sort();
        assert_eq!(names, sorted_names);
    }

    #[test]
    fn fallback_is_deterministic() {
        let components: ComponentMap = (0..6)
            .map(|i| component(&format!("x.c{i}"), "x/mod.py", 50))
            .collect();
        let ids: Vec<String> = (0..6).map(|i| format!("x.c{i}")).collect();

        let a = fallback_partition(&ids, &components, 0, 120);
        let b = fallback_partition(&ids, &components, 0, 120);
        assert_eq!(a.len(), b.len());
        for (ga, gb) in a.iter().zip(b.iter()) {
            assert_eq!(ga.name, gb.name);
            assert_eq!(ga.component_ids, gb.component_ids);
        }
    }
}
