//! Step graph validation and execution ordering.
//!
//! Edges run from a dependency to its dependents. Ordering uses Kahn's
//! algorithm seeded in definition order, so independent steps keep the order
//! in which they were authored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::core::types::WorkflowDefinition;

/// Structural problems with a workflow graph. Fatal to starting a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("step id must not be empty")]
    EmptyStepId,
    #[error("step id '{0}' must not contain path separators or '..'")]
    UnsafeStepId(String),
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("step '{step}' depends on non-existent step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
    #[error("step '{step}': output path must be relative: {path}")]
    AbsoluteOutput { step: String, path: String },
    #[error("step '{step}': {field} must be > 0")]
    NonPositiveLimit { step: String, field: &'static str },
    #[error("circular dependency detected involving steps: {}", .steps.join(", "))]
    CyclicDependency { steps: Vec<String> },
}

/// Check ids, dependency references, output paths, and limits.
///
/// Acyclicity is checked separately by [`resolve_order`] and [`find_cycle`].
pub fn validate_structure(workflow: &WorkflowDefinition) -> Result<(), GraphError> {
    check_references(workflow)?;
    for step in &workflow.steps {
        if let Some(path) = step.outputs.iter().find(|p| is_absolute_output(p)) {
            return Err(GraphError::AbsoluteOutput {
                step: step.id.clone(),
                path: path.clone(),
            });
        }
        if step.timeout_secs == 0 {
            return Err(GraphError::NonPositiveLimit {
                step: step.id.clone(),
                field: "timeout",
            });
        }
        if step.max_turns == 0 {
            return Err(GraphError::NonPositiveLimit {
                step: step.id.clone(),
                field: "max_turns",
            });
        }
    }
    Ok(())
}

fn is_absolute_output(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute()
}

/// Step ids name files under the workspace `logs/` area.
fn is_unsafe_id(id: &str) -> bool {
    id.contains(['/', '\\']) || id.contains("..")
}

fn check_references(workflow: &WorkflowDefinition) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            return Err(GraphError::EmptyStepId);
        }
        if is_unsafe_id(&step.id) {
            return Err(GraphError::UnsafeStepId(step.id.clone()));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(GraphError::DuplicateStep(step.id.clone()));
        }
    }
    for step in &workflow.steps {
        if let Some(dep) = step.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(GraphError::UnknownDependency {
                step: step.id.clone(),
                dependency: dep.clone(),
            });
        }
    }
    Ok(())
}

/// Resolve a linear execution order in which every dependency precedes its
/// dependents.
///
/// Fails with [`GraphError::CyclicDependency`] naming the steps that lie on a
/// cycle (in definition order). Steps that are blocked only because they sit
/// downstream of a cycle are not reported.
pub fn resolve_order(workflow: &WorkflowDefinition) -> Result<Vec<String>, GraphError> {
    check_references(workflow)?;

    let mut in_degree: HashMap<&str, usize> =
        workflow.steps.iter().map(|s| (s.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &workflow.steps {
        for dep in &step.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
            *in_degree.entry(step.id.as_str()).or_default() += 1;
        }
    }

    let mut queue: VecDeque<&str> = workflow
        .steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut order = Vec::with_capacity(workflow.steps.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for &next in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            let degree = in_degree.entry(next).or_default();
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() < workflow.steps.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let blocked: Vec<&str> = workflow
            .step_ids()
            .filter(|id| !ordered.contains(id))
            .collect();
        let steps = steps_on_cycles(workflow, &blocked);
        debug!(?steps, blocked = blocked.len(), "cycle detected");
        return Err(GraphError::CyclicDependency { steps });
    }

    debug!(?order, "execution order resolved");
    Ok(order)
}

/// Keep only the blocked steps that can reach themselves through other
/// blocked steps.
fn steps_on_cycles(workflow: &WorkflowDefinition, blocked: &[&str]) -> Vec<String> {
    let blocked_set: HashSet<&str> = blocked.iter().copied().collect();
    let edges: HashMap<&str, Vec<&str>> = workflow
        .steps
        .iter()
        .filter(|s| blocked_set.contains(s.id.as_str()))
        .map(|s| {
            let deps = s
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|d| blocked_set.contains(d))
                .collect();
            (s.id.as_str(), deps)
        })
        .collect();

    blocked
        .iter()
        .filter(|start| reaches(&edges, start, start))
        .map(|id| id.to_string())
        .collect()
}

fn reaches(edges: &HashMap<&str, Vec<&str>>, from: &str, target: &str) -> bool {
    let mut stack: Vec<&str> = edges.get(from).cloned().unwrap_or_default();
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if visited.insert(node)
            && let Some(next) = edges.get(node)
        {
            stack.extend(next.iter().copied());
        }
    }
    false
}

/// Find one dependency cycle via depth-first search.
///
/// Returns the cycle path with its first step repeated at the end
/// (`["a", "b", "a"]`), or `None` if the graph is acyclic. Unknown
/// dependency references are ignored here.
pub fn find_cycle(workflow: &WorkflowDefinition) -> Option<Vec<String>> {
    let graph: HashMap<&str, Vec<&str>> = workflow
        .steps
        .iter()
        .map(|s| {
            (
                s.id.as_str(),
                s.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut search = CycleSearch {
        graph: &graph,
        visited: HashSet::new(),
        on_stack: HashSet::new(),
        path: Vec::new(),
    };
    workflow
        .step_ids()
        .find_map(|id| (!search.visited.contains(id)).then(|| search.visit(id)).flatten())
}

struct CycleSearch<'a> {
    graph: &'a HashMap<&'a str, Vec<&'a str>>,
    visited: HashSet<&'a str>,
    on_stack: HashSet<&'a str>,
    path: Vec<&'a str>,
}

impl<'a> CycleSearch<'a> {
    fn visit(&mut self, node: &'a str) -> Option<Vec<String>> {
        self.visited.insert(node);
        self.on_stack.insert(node);
        self.path.push(node);

        let graph = self.graph;
        for &next in graph.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if !self.visited.contains(next) {
                if let Some(cycle) = self.visit(next) {
                    return Some(cycle);
                }
            } else if self.on_stack.contains(next) {
                let start = self.path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    self.path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        self.path.pop();
        self.on_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ModelName, StepDefinition};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn step(id: &str, deps: &[&str]) -> StepDefinition {
        let mut step = StepDefinition::new(id, ModelName::Haiku, "prompt.md");
        step.depends_on = deps.iter().map(|d| d.to_string()).collect();
        step
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "test".to_string(),
            description: String::new(),
            steps,
        }
    }

    fn assert_respects_dependencies(wf: &WorkflowDefinition, order: &[String]) {
        let index: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        assert_eq!(index.len(), wf.steps.len(), "order must be a permutation");
        for step in &wf.steps {
            for dep in &step.depends_on {
                assert!(
                    index[dep.as_str()] < index[step.id.as_str()],
                    "{dep} must precede {}",
                    step.id
                );
            }
        }
    }

    #[test]
    fn linear_chain_resolves_in_dependency_order() {
        let wf = workflow(vec![
            step("step3", &["step2"]),
            step("step1", &[]),
            step("step2", &["step1"]),
        ]);
        let order = resolve_order(&wf).expect("order");
        assert_eq!(order, vec!["step1", "step2", "step3"]);
    }

    #[test]
    fn independent_steps_keep_definition_order() {
        let wf = workflow(vec![step("b", &[]), step("a", &[]), step("c", &[])]);
        assert_eq!(resolve_order(&wf).expect("order"), vec!["b", "a", "c"]);
    }

    #[test]
    fn diamond_places_join_last() {
        let wf = workflow(vec![
            step("top", &[]),
            step("left", &["top"]),
            step("right", &["top"]),
            step("bottom", &["left", "right"]),
        ]);
        let order = resolve_order(&wf).expect("order");
        assert_eq!(order.first().map(String::as_str), Some("top"));
        assert_eq!(order.last().map(String::as_str), Some("bottom"));
        assert_respects_dependencies(&wf, &order);
    }

    #[test]
    fn two_step_cycle_names_both_steps() {
        let wf = workflow(vec![step("A", &["B"]), step("B", &["A"])]);
        let err = resolve_order(&wf).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                steps: vec!["A".to_string(), "B".to_string()]
            }
        );
    }

    #[test]
    fn cycle_report_excludes_downstream_steps() {
        let wf = workflow(vec![
            step("root", &[]),
            step("a", &["root", "c"]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("after", &["c"]),
        ]);
        let GraphError::CyclicDependency { steps } = resolve_order(&wf).unwrap_err() else {
            panic!("expected cycle");
        };
        assert_eq!(steps, vec!["a", "b", "c"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let wf = workflow(vec![step("a", &["a"])]);
        let GraphError::CyclicDependency { steps } = resolve_order(&wf).unwrap_err() else {
            panic!("expected cycle");
        };
        assert_eq!(steps, vec!["a"]);
        assert_eq!(find_cycle(&wf), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let wf = workflow(vec![step("a", &["ghost"])]);
        assert_eq!(
            resolve_order(&wf).unwrap_err(),
            GraphError::UnknownDependency {
                step: "a".to_string(),
                dependency: "ghost".to_string()
            }
        );
    }

    #[test]
    fn ids_that_leave_the_logs_area_are_rejected() {
        for id in ["../project/evil", "a/b", "a\\b", ".."] {
            let wf = workflow(vec![step(id, &[])]);
            assert_eq!(
                validate_structure(&wf).unwrap_err(),
                GraphError::UnsafeStepId(id.to_string())
            );
            assert!(resolve_order(&wf).is_err());
        }
        assert!(validate_structure(&workflow(vec![step("write_tests.v2", &[])])).is_ok());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let wf = workflow(vec![step("a", &[]), step("a", &[])]);
        assert_eq!(
            validate_structure(&wf).unwrap_err(),
            GraphError::DuplicateStep("a".to_string())
        );
    }

    #[test]
    fn absolute_outputs_are_rejected() {
        let mut s = step("a", &[]);
        s.outputs = vec!["/etc/passwd".to_string()];
        let err = validate_structure(&workflow(vec![s])).unwrap_err();
        assert!(matches!(err, GraphError::AbsoluteOutput { .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut s = step("a", &[]);
        s.timeout_secs = 0;
        let err = validate_structure(&workflow(vec![s])).unwrap_err();
        assert_eq!(err.to_string(), "step 'a': timeout must be > 0");
    }

    #[test]
    fn find_cycle_returns_closed_path() {
        let wf = workflow(vec![
            step("a", &["b"]),
            step("b", &["c"]),
            step("c", &["a"]),
        ]);
        assert_eq!(
            find_cycle(&wf),
            Some(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "a".to_string()
            ])
        );
    }

    #[test]
    fn find_cycle_is_none_for_dag() {
        let wf = workflow(vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])]);
        assert_eq!(find_cycle(&wf), None);
    }

    /// Random DAGs: edges only point from lower to higher index, then the
    /// steps are shuffled so definition order differs from topological order.
    #[test]
    fn random_dags_resolve_to_valid_orders() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.gen_range(1..12);
            let mut steps: Vec<StepDefinition> = (0..n)
                .map(|i| {
                    let deps: Vec<String> = (0..i)
                        .filter(|_| rng.gen_bool(0.3))
                        .map(|j| format!("s{j}"))
                        .collect();
                    let mut s = step(&format!("s{i}"), &[]);
                    s.depends_on = deps;
                    s
                })
                .collect();
            for i in (1..steps.len()).rev() {
                let j = rng.gen_range(0..=i);
                steps.swap(i, j);
            }
            let wf = workflow(steps);
            let order = resolve_order(&wf).expect("dag resolves");
            assert_respects_dependencies(&wf, &order);
            assert_eq!(find_cycle(&wf), None);
        }
    }

    /// Random graphs with one injected back edge: the resolver and the DFS
    /// agree that a cycle exists, and every reported step lies on the cycle.
    #[test]
    fn random_cycles_are_reported_by_both_checks() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let n = rng.gen_range(2..10);
            let mut steps: Vec<StepDefinition> =
                (0..n).map(|i| step(&format!("s{i}"), &[])).collect();
            // Chain lo..=hi so the back edge closes a known cycle.
            let lo = rng.gen_range(0..n - 1);
            let hi = rng.gen_range(lo + 1..n);
            for i in lo + 1..=hi {
                steps[i].depends_on.push(format!("s{}", i - 1));
            }
            steps[lo].depends_on.push(format!("s{hi}"));
            let cycle_members: HashSet<String> = (lo..=hi).map(|i| format!("s{i}")).collect();

            let wf = workflow(steps);
            let GraphError::CyclicDependency { steps } = resolve_order(&wf).unwrap_err() else {
                panic!("expected cycle");
            };
            assert!(!steps.is_empty());
            assert!(steps.iter().all(|s| cycle_members.contains(s)));
            assert!(find_cycle(&wf).is_some());
        }
    }
}
