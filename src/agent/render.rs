//! Command and prompt rendering (spec §4.5).
//!
//! Mirrors the teacher's `config::expand_template`: a minijinja
//! `Environment` restricted to a closed, explicitly-built variable set plus
//! a single `sanitize` filter, never exposing arbitrary host state or
//! functions to the template.

use std::collections::HashMap;

use minijinja::{Environment, Value};

use crate::error::CrewError;

/// The closed set of variables a command or prompt template may reference.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub model: String,
    pub prompt: String,
    pub args: Vec<String>,
    pub r#continue: bool,
    pub worktree: String,
    pub title: String,
    pub description: String,
    pub branch: String,
    pub issue: Option<String>,
    pub task_id: u64,
    pub git_dir: String,
    pub repo_root: String,
}

/// Result of rendering an agent's command template.
#[derive(Debug, Clone)]
pub struct RenderedCommand {
    pub command: String,
    pub prompt: String,
}

fn sanitize_branch_name(branch: &str) -> String {
    branch.replace(['/', '\\'], "-")
}

fn build_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_filter("sanitize", |value: Value| -> String {
        sanitize_branch_name(value.as_str().unwrap_or_default())
    });
    env
}

fn build_context(ctx: &RenderContext) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    vars.insert("model".to_string(), Value::from(ctx.model.clone()));
    vars.insert("prompt".to_string(), Value::from(ctx.prompt.clone()));
    vars.insert("args".to_string(), Value::from(ctx.args.clone()));
    vars.insert("continue".to_string(), Value::from(ctx.r#continue));
    vars.insert("worktree".to_string(), Value::from(ctx.worktree.clone()));
    vars.insert("title".to_string(), Value::from(ctx.title.clone()));
    vars.insert("description".to_string(), Value::from(ctx.description.clone()));
    vars.insert("branch".to_string(), Value::from(ctx.branch.clone()));
    vars.insert("issue".to_string(), Value::from(ctx.issue.clone()));
    vars.insert("task_id".to_string(), Value::from(ctx.task_id));
    vars.insert("git_dir".to_string(), Value::from(ctx.git_dir.clone()));
    vars.insert("repo_root".to_string(), Value::from(ctx.repo_root.clone()));
    vars
}

/// Render a template string (command or prompt) against the closed variable
/// set. Values are not shell-escaped here; callers that embed the result
/// directly in a shell string should escape individual fields up front via
/// [`shell_escape_value`].
pub fn render(template: &str, ctx: &RenderContext) -> Result<String, CrewError> {
    let env = build_env();
    let tmpl = env
        .template_from_str(template)
        .map_err(|e| CrewError::Other(format!("template syntax error: {e}")))?;
    tmpl.render(Value::from(build_context(ctx)))
        .map_err(|e| CrewError::Other(format!("template render error: {e}")))
}

/// Shell-escape a single value for safe interpolation into a rendered
/// command line.
pub fn shell_escape_value(value: &str) -> String {
    shell_escape::escape(std::borrow::Cow::Borrowed(value)).to_string()
}

/// Resolve the prompt precedence for a role invocation: an explicit caller
/// message wins, then the agent's configured prompt, then a role default.
pub fn resolve_prompt(
    explicit_message: Option<&str>,
    configured_prompt: Option<&str>,
    role_default: &str,
) -> String {
    if let Some(m) = explicit_message {
        return m.to_string();
    }
    if let Some(p) = configured_prompt {
        return p.to_string();
    }
    role_default.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RenderContext {
        RenderContext {
            model: "sonnet".to_string(),
            prompt: "fix the bug".to_string(),
            args: vec!["--verbose".to_string()],
            r#continue: false,
            worktree: "/repo/.crew/crew-1".to_string(),
            title: "Fix the bug".to_string(),
            description: "details".to_string(),
            branch: "crew-1".to_string(),
            issue: None,
            task_id: 1,
            git_dir: "/repo/.git".to_string(),
            repo_root: "/repo".to_string(),
        }
    }

    #[test]
    fn renders_closed_variables() {
        let out = render("{{ model }}: {{ prompt }}", &ctx()).unwrap();
        assert_eq!(out, "sonnet: fix the bug");
    }

    #[test]
    fn continue_flag_drives_conditional() {
        let mut c = ctx();
        c.r#continue = true;
        let out = render("run{% if continue %} --continue{% endif %}", &c).unwrap();
        assert_eq!(out, "run --continue");
    }

    #[test]
    fn sanitize_filter_replaces_path_separators() {
        let mut c = ctx();
        c.branch = "feature/foo".to_string();
        let out = render("{{ branch | sanitize }}", &c).unwrap();
        assert_eq!(out, "feature-foo");
    }

    #[test]
    fn unknown_variable_renders_empty_not_error() {
        // minijinja's default undefined behavior renders undefined as empty,
        // matching the teacher's closed-environment semantics.
        let out = render("{{ nonexistent }}", &ctx()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn prompt_precedence_prefers_explicit_message() {
        assert_eq!(resolve_prompt(Some("explicit"), Some("configured"), "default"), "explicit");
        assert_eq!(resolve_prompt(None, Some("configured"), "default"), "configured");
        assert_eq!(resolve_prompt(None, None, "default"), "default");
    }

    #[test]
    fn shell_escape_quotes_values_with_spaces() {
        let escaped = shell_escape_value("hello world");
        assert!(escaped.contains("hello world"));
    }
}
