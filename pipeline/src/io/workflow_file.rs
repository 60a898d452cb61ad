//! YAML workflow files.
//!
//! ```yaml
//! workflow:
//!   name: code-generation
//!   description: Plan, implement, and test
//!   steps:
//!     - id: plan
//!       model: sonnet
//!       prompt_strategy: prompts/plan.md
//!       outputs: [context/plan.md]
//!     - id: implement
//!       model: opus
//!       wrapper: claude_code
//!       prompt_strategy: prompts/implement.md
//!       depends_on: [plan]
//!       timeout: 600
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_yaml::Value;
use tracing::debug;

use crate::core::graph::{find_cycle, validate_structure};
use crate::core::types::WorkflowDefinition;

const ROOT_KEY: &str = "workflow";
const BACKEND_KEYS: [&str; 2] = ["wrapper", "backend"];

/// Parse a workflow file and check its structure.
///
/// Steps that do not name a backend get `default_backend`. Cycles are not
/// rejected here; see [`validate_workflow`].
pub fn load_workflow(path: &Path, default_backend: &str) -> Result<WorkflowDefinition> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let workflow = parse_workflow(&contents, default_backend)
        .with_context(|| format!("parse workflow {}", path.display()))?;
    debug!(
        path = %path.display(),
        name = %workflow.name,
        steps = workflow.steps.len(),
        "workflow loaded"
    );
    Ok(workflow)
}

/// Parse workflow YAML text. See [`load_workflow`].
pub fn parse_workflow(contents: &str, default_backend: &str) -> Result<WorkflowDefinition> {
    let mut doc: Value = serde_yaml::from_str(contents).context("parse yaml")?;
    let root = doc
        .get_mut(ROOT_KEY)
        .ok_or_else(|| anyhow!("missing top-level '{ROOT_KEY}' key"))?;

    if let Some(steps) = root.get_mut("steps").and_then(Value::as_sequence_mut) {
        for step in steps {
            if let Some(map) = step.as_mapping_mut()
                && !BACKEND_KEYS.iter().any(|key| map.contains_key(*key))
            {
                map.insert(
                    Value::from("wrapper"),
                    Value::from(default_backend.to_string()),
                );
            }
        }
    }

    let workflow: WorkflowDefinition =
        serde_yaml::from_value(root.clone()).context("decode workflow")?;
    validate_structure(&workflow)?;
    Ok(workflow)
}

/// Problems that would stop the workflow from running, as readable lines.
///
/// Reports a dependency cycle as a path (`a -> b -> a`) and every prompt
/// template that does not exist. An empty list means the workflow is valid.
/// Structural problems are listed too, though only a hand-built definition
/// can have them: [`load_workflow`] already rejects those files.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(err) = validate_structure(workflow) {
        problems.push(err.to_string());
    }

    if let Some(cycle) = find_cycle(workflow) {
        problems.push(format!("Circular dependency: {}", cycle.join(" -> ")));
    }

    for step in &workflow.steps {
        if !Path::new(&step.prompt_source).is_file() {
            problems.push(format!(
                "Step '{}': prompt template not found: {}",
                step.id, step.prompt_source
            ));
        }
    }

    problems
}
