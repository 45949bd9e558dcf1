//! Dependency ordering for table creation and removal
//!
//! Tables are created after the tables they reference. Kahn's algorithm with
//! a sorted ready set keeps the order deterministic; a foreign key cycle is
//! broken by emitting the lexicographically smallest remaining table and
//! leaving its unsatisfied references to be added afterwards.

use std::collections::{BTreeMap, BTreeSet};

/// Table metadata for dependency ordering.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// Folded table name.
    pub name: String,
    /// Folded names of tables this table references.
    pub dependencies: Vec<String>,
}

/// Orders tables so that dependencies come first.
///
/// Dependencies on tables outside `tables` and on the table itself are
/// ignored. Never fails: cycles are broken deterministically, so the caller
/// must check each reference against the returned order to find the ones
/// that point forward.
pub fn creation_order(tables: &[TableInfo]) -> Vec<String> {
    let known: BTreeSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for table in tables {
        let deps: BTreeSet<&str> = table
            .dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| *d != table.name && known.contains(d))
            .collect();
        in_degree.insert(&table.name, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(&table.name);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut result = Vec::with_capacity(tables.len());
    let mut emitted: BTreeSet<&str> = BTreeSet::new();

    while emitted.len() < in_degree.len() {
        let current = match ready.pop_first() {
            Some(name) => name,
            // Cycle: break it at the smallest remaining name.
            None => match in_degree.keys().find(|name| !emitted.contains(*name)) {
                Some(name) => *name,
                None => break,
            },
        };
        if !emitted.insert(current) {
            continue;
        }
        result.push(current.to_string());

        for child in dependents.get(current).into_iter().flatten() {
            if emitted.contains(child) {
                continue;
            }
            if let Some(degree) = in_degree.get_mut(child) {
                if *degree > 0 {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, deps: &[&str]) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn dependencies_come_first() {
        let order = creation_order(&[
            info("posts", &["users"]),
            info("comments", &["posts", "users"]),
            info("users", &[]),
        ]);
        assert_eq!(order, ["users", "posts", "comments"]);
    }

    #[test]
    fn independent_tables_are_lexicographic() {
        let order = creation_order(&[info("b", &[]), info("c", &[]), info("a", &[])]);
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn cycles_are_broken_at_the_smallest_name() {
        let order = creation_order(&[
            info("b", &["a"]),
            info("a", &["b"]),
            info("c", &["a"]),
        ]);
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn ignores_self_and_external_references() {
        let order = creation_order(&[info("tree", &["tree", "users"]), info("a", &["tree"])]);
        assert_eq!(order, ["tree", "a"]);
    }
}
