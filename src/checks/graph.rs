//! Prerequisite graph over check names
//!
//! Resolved once at load time. Anything the runner could trip over later
//! (duplicates, dangling prerequisites, cycles) is rejected here.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::CheckSpec;
use crate::error::LoadError;

/// Maximum edit distance for a "did you mean" suggestion
const MAX_SUGGESTION_DISTANCE: u32 = 3;

/// Topological order over `checks`, ties broken by declaration order
pub fn execution_order(checks: &[CheckSpec]) -> Result<Vec<usize>, LoadError> {
    let index = name_index(checks)?;

    let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(checks.len());
    for check in checks {
        let mut deps = Vec::with_capacity(check.requires.len());
        for prerequisite in &check.requires {
            match index.get(prerequisite.as_str()) {
                Some(&dep) => deps.push(dep),
                None => {
                    return Err(LoadError::UnknownPrerequisite {
                        check: check.name.clone(),
                        prerequisite: prerequisite.clone(),
                        suggestion: suggest(prerequisite, checks.iter().map(|c| c.name.as_str())),
                    })
                }
            }
        }
        dependencies.push(deps);
    }

    if let Some(cycle) = find_cycle(&dependencies) {
        return Err(LoadError::CyclicPrerequisites {
            cycle: cycle.into_iter().map(|i| checks[i].name.clone()).collect(),
        });
    }

    // Kahn's algorithm, always taking the earliest-declared ready check.
    let mut remaining: Vec<usize> = dependencies.iter().map(|deps| deps.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); checks.len()];
    for (check, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(check);
        }
    }

    let mut ready: BTreeSet<usize> = (0..checks.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(checks.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    Ok(order)
}

/// Names of `targets` plus everything they transitively require
pub fn with_prerequisites<'a>(
    checks: &'a [CheckSpec],
    targets: &[String],
) -> Result<HashSet<&'a str>, LoadError> {
    let by_name: HashMap<&str, &CheckSpec> =
        checks.iter().map(|check| (check.name.as_str(), check)).collect();

    let mut keep = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();
    for target in targets {
        match by_name.get_key_value(target.as_str()) {
            Some((&name, _)) => stack.push(name),
            None => {
                return Err(LoadError::UnknownTarget {
                    target: target.clone(),
                    suggestion: suggest(target, checks.iter().map(|c| c.name.as_str())),
                })
            }
        }
    }

    while let Some(name) = stack.pop() {
        if !keep.insert(name) {
            continue;
        }
        if let Some(check) = by_name.get(name) {
            stack.extend(check.requires.iter().map(|r| r.as_str()));
        }
    }

    Ok(keep)
}

/// Closest candidate by edit distance, if any is close enough
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .filter(|candidate| *candidate != name)
        .map(|candidate| {
            (
                triple_accel::levenshtein_exp(name.as_bytes(), candidate.as_bytes()),
                candidate,
            )
        })
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.to_string())
}

fn name_index(checks: &[CheckSpec]) -> Result<HashMap<&str, usize>, LoadError> {
    let mut index = HashMap::with_capacity(checks.len());
    for (i, check) in checks.iter().enumerate() {
        if check.name.trim().is_empty() {
            return Err(LoadError::InvalidCheckSpec {
                reason: format!("check #{} has an empty name", i + 1),
            });
        }
        if index.insert(check.name.as_str(), i).is_some() {
            return Err(LoadError::DuplicateCheck(check.name.clone()));
        }
    }
    Ok(index)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// First cycle found, as a closed path (`a -> b -> a`)
fn find_cycle(dependencies: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    let mut path = Vec::new();
    for start in 0..dependencies.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(start, dependencies, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    node: usize,
    dependencies: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    marks[node] = Mark::InProgress;
    path.push(node);
    for &dep in &dependencies[node] {
        match marks[dep] {
            Mark::InProgress => {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(dep, dependencies, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }
    path.pop();
    marks[node] = Mark::Done;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, requires: &[&str]) -> CheckSpec {
        CheckSpec::from_fn(name, |_ctx| async { Ok(()) }).requires(requires.iter().copied())
    }

    fn names(checks: &[CheckSpec], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| checks[i].name.clone()).collect()
    }

    #[test]
    fn test_order_respects_prerequisites() {
        let checks = vec![
            check("runs", &["compiles"]),
            check("exists", &[]),
            check("compiles", &["exists"]),
            check("style", &[]),
        ];
        let order = execution_order(&checks).unwrap();
        assert_eq!(names(&checks, &order), vec!["exists", "compiles", "runs", "style"]);
    }

    #[test]
    fn test_independent_checks_keep_declaration_order() {
        let checks = vec![check("b", &[]), check("a", &[]), check("c", &[])];
        let order = execution_order(&checks).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_prerequisite_suggests_name() {
        let checks = vec![check("compiles", &[]), check("runs", &["compile"])];
        match execution_order(&checks) {
            Err(LoadError::UnknownPrerequisite {
                check,
                prerequisite,
                suggestion,
            }) => {
                assert_eq!(check, "runs");
                assert_eq!(prerequisite, "compile");
                assert_eq!(suggestion.as_deref(), Some("compiles"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cycle_is_reported_as_path() {
        let checks = vec![check("a", &["c"]), check("b", &["a"]), check("c", &["b"])];
        match execution_order(&checks) {
            Err(LoadError::CyclicPrerequisites { cycle }) => {
                assert_eq!(cycle, vec!["a", "c", "b", "a"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let checks = vec![check("a", &["a"])];
        assert!(matches!(
            execution_order(&checks),
            Err(LoadError::CyclicPrerequisites { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let checks = vec![check("a", &[]), check("a", &[])];
        assert!(matches!(
            execution_order(&checks),
            Err(LoadError::DuplicateCheck(name)) if name == "a"
        ));
    }

    #[test]
    fn test_with_prerequisites() {
        let checks = vec![
            check("exists", &[]),
            check("compiles", &["exists"]),
            check("emma", &["compiles"]),
            check("rodrigo", &["compiles"]),
        ];
        let keep = with_prerequisites(&checks, &["emma".to_string()]).unwrap();
        let mut keep: Vec<&str> = keep.into_iter().collect();
        keep.sort();
        assert_eq!(keep, vec!["compiles", "emma", "exists"]);

        assert!(matches!(
            with_prerequisites(&checks, &["ema".to_string()]),
            Err(LoadError::UnknownTarget { suggestion: Some(s), .. }) if s == "emma"
        ));
    }

    #[test]
    fn test_suggest_needs_close_match() {
        assert_eq!(suggest("zzzzzzzz", ["exists", "compiles"]), None);
    }
}
