//! Prompt template loading and rendering.
//!
//! A step's prompt source names a template file. Templates see the run's
//! context variables plus `workspace`, the workspace root path, through
//! minijinja syntax (`{{ problem_name }}`) or a plain `{problem_name}`
//! placeholder. Text minijinja cannot parse is used as written, with only
//! the plain placeholders filled.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::Environment;
use tracing::{debug, warn};

use crate::io::workspace::WorkspaceHandle;

/// Read a template file.
pub fn load_template(path: &Path) -> Result<String> {
    if !path.is_file() {
        anyhow::bail!("prompt template not found: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("read prompt template {}", path.display()))
}

/// Render `source` with `context` and the workspace root.
pub fn render(
    source: &str,
    workspace: &WorkspaceHandle,
    context: &BTreeMap<String, String>,
) -> String {
    let mut vars = context.clone();
    vars.insert(
        "workspace".to_string(),
        workspace.root.display().to_string(),
    );

    let env = Environment::new();
    let rendered = match env.render_str(source, &vars) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(err = %err, "prompt is not a valid template, using plain placeholders");
            source.to_string()
        }
    };
    let rendered = fill_placeholders(rendered, &vars);
    debug!(bytes = rendered.len(), "prompt rendered");
    rendered
}

/// Replace every `{key}` with its value.
fn fill_placeholders(mut text: String, vars: &BTreeMap<String, String>) -> String {
    for (key, value) in vars {
        let placeholder = format!("{{{key}}}");
        if text.contains(&placeholder) {
            text = text.replace(&placeholder, value);
        }
    }
    text
}

/// Load the template at `path` and render it for a step.
pub fn build_prompt(
    path: &Path,
    workspace: &WorkspaceHandle,
    context: &BTreeMap<String, String>,
) -> Result<String> {
    let source = load_template(path)?;
    Ok(render(&source, workspace, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::create_workspace;

    #[test]
    fn renders_context_and_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(&temp.path().join("ws"), None).expect("workspace");
        let template = temp.path().join("plan.md");
        fs::write(
            &template,
            "Plan {{ problem_name }} in {{ workspace }}/project",
        )
        .expect("write");
        let context = BTreeMap::from([("problem_name".to_string(), "reverse".to_string())]);

        let prompt = build_prompt(&template, &workspace, &context).expect("prompt");

        assert_eq!(
            prompt,
            format!("Plan reverse in {}/project", workspace.root.display())
        );
    }

    #[test]
    fn missing_template_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("workspace");
        let err =
            build_prompt(&temp.path().join("nope.md"), &workspace, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("prompt template not found"));
    }

    #[test]
    fn plain_placeholders_are_filled() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("workspace");
        let context = BTreeMap::from([("problem_name".to_string(), "reverse".to_string())]);

        let prompt = render("Solve {problem_name} in {workspace}", &workspace, &context);

        assert_eq!(
            prompt,
            format!("Solve reverse in {}", workspace.root.display())
        );
    }

    #[test]
    fn brace_heavy_prompt_is_kept_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = create_workspace(temp.path(), None).expect("workspace");
        let source = "Write a Go template like {{ .Name } and put it in {workspace}/project.\n\
                      {% raw %} println!(\"{{}}\", x); {unknown}";

        let prompt = render(source, &workspace, &BTreeMap::new());

        assert!(prompt.starts_with("Write a Go template like {{ .Name } and put it in "));
        assert!(prompt.contains(&format!("{}/project", workspace.root.display())));
        assert!(prompt.contains("println!(\"{{}}\", x); {unknown}"));
    }
}
