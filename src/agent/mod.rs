//! Agent registry and command/prompt rendering (spec §4.5).

mod builtin;
mod registry;
mod render;

pub use registry::AgentRegistry;
pub use render::{render, resolve_prompt, shell_escape_value, RenderContext, RenderedCommand};

use crate::config::AgentConfig;
use crate::error::CrewError;

/// Default reviewer prompt used when neither the caller nor the agent
/// config supplies one.
pub const DEFAULT_REVIEWER_PROMPT: &str = "Please review this task.";

/// Render a resolved agent's command and prompt for a single invocation.
pub fn render_invocation(
    agent: &AgentConfig,
    explicit_message: Option<&str>,
    role_default_prompt: &str,
    mut ctx: RenderContext,
) -> Result<RenderedCommand, CrewError> {
    let prompt_template = resolve_prompt(explicit_message, agent.prompt.as_deref(), role_default_prompt);
    ctx.prompt = render(&prompt_template, &ctx)?;

    let command_template = agent
        .command_template
        .as_deref()
        .ok_or_else(|| CrewError::Other("agent has no command-template to render".to_string()))?;
    let command = render(command_template, &ctx)?;

    Ok(RenderedCommand { command, prompt: ctx.prompt })
}

/// Render an agent's `setup-script`, if configured, into a one-shot shell
/// script body for worktree setup.
pub fn render_setup_script(agent: &AgentConfig, ctx: &RenderContext) -> Result<Option<String>, CrewError> {
    match &agent.setup_script {
        Some(script) => Ok(Some(render(script, ctx)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentRole, Config};

    fn sample_ctx() -> RenderContext {
        RenderContext {
            model: "sonnet".to_string(),
            prompt: String::new(),
            args: vec![],
            r#continue: false,
            worktree: "/repo/.crew/crew-1".to_string(),
            title: "Fix bug".to_string(),
            description: "desc".to_string(),
            branch: "crew-1".to_string(),
            issue: None,
            task_id: 1,
            git_dir: "/repo/.git".to_string(),
            repo_root: "/repo".to_string(),
        }
    }

    #[test]
    fn render_invocation_uses_agent_prompt_when_no_explicit_message() {
        let config = Config::default();
        let registry = AgentRegistry::new(&config);
        let agent = registry.resolve("claude").unwrap();
        let out = render_invocation(&agent, None, "default worker prompt", sample_ctx()).unwrap();
        assert_eq!(out.prompt, "default worker prompt");
        assert!(out.command.contains("claude"));
        assert!(out.command.contains("sonnet"));
    }

    #[test]
    fn render_invocation_prefers_explicit_message() {
        let config = Config::default();
        let registry = AgentRegistry::new(&config);
        let agent = registry.resolve("claude").unwrap();
        let out = render_invocation(&agent, Some("do the thing"), "default", sample_ctx()).unwrap();
        assert_eq!(out.prompt, "do the thing");
    }

    #[test]
    fn reviewer_falls_back_to_role_default_prompt() {
        let config = Config::default();
        let registry = AgentRegistry::new(&config);
        let agent = registry.resolve("claude-reviewer").unwrap();
        assert_eq!(agent.role, Some(AgentRole::Reviewer));
        let out = render_invocation(&agent, None, DEFAULT_REVIEWER_PROMPT, sample_ctx()).unwrap();
        assert_eq!(out.prompt, DEFAULT_REVIEWER_PROMPT);
    }

    #[test]
    fn setup_script_renders_when_present() {
        let mut agent = crate::config::AgentConfig::default();
        agent.setup_script = Some("echo {{ branch }}".to_string());
        let rendered = render_setup_script(&agent, &sample_ctx()).unwrap();
        assert_eq!(rendered, Some("echo crew-1".to_string()));
    }

    #[test]
    fn setup_script_absent_is_none() {
        let agent = crate::config::AgentConfig::default();
        let rendered = render_setup_script(&agent, &sample_ctx()).unwrap();
        assert_eq!(rendered, None);
    }
}
