//! Built-in agent presets, keyed by CLI tool (spec §4.5).
//!
//! Each tool expands into three variants: `<tool>` (worker), `<tool>-manager`
//! (hidden, inherits from worker), `<tool>-reviewer` (hidden, inherits from
//! worker). Preference order when auto-selecting a default is
//! `opencode > claude > codex`, matching the teacher's own reliance on
//! `which` for locating a single external tool (`Git Bash` on Windows)
//! generalized to three candidates here.

use crate::config::{AgentConfig, AgentRole};

/// CLI tool names with a built-in preset, in default-selection preference
/// order.
pub const PREFERENCE_ORDER: &[&str] = &["opencode", "claude", "codex"];

fn worker_preset(tool: &str, command_template: &str) -> AgentConfig {
    AgentConfig {
        role: Some(AgentRole::Worker),
        command_template: Some(command_template.to_string()),
        default_model: None,
        system_prompt: None,
        prompt: None,
        setup_script: None,
        inherit: None,
        hidden: false,
        description: Some(format!("Built-in {tool} worker preset")),
        args: vec![],
        env: Default::default(),
        extras: Default::default(),
    }
}

fn derived_preset(tool: &str, role: AgentRole) -> AgentConfig {
    AgentConfig {
        role: Some(role),
        command_template: None,
        default_model: None,
        system_prompt: None,
        prompt: None,
        setup_script: None,
        inherit: Some(tool.to_string()),
        hidden: true,
        description: None,
        args: vec![],
        env: Default::default(),
        extras: Default::default(),
    }
}

/// Return `(name, preset)` pairs for every built-in tool's worker/manager/
/// reviewer variants.
pub fn all_presets() -> Vec<(String, AgentConfig)> {
    let templates: &[(&str, &str)] = &[
        ("claude", "claude {% if continue %}--continue {% endif %}--model {{ model }} \"{{ prompt }}\""),
        ("opencode", "opencode run {% if continue %}--continue {% endif %}--model {{ model }} \"{{ prompt }}\""),
        ("codex", "codex exec {% if continue %}--continue {% endif %}--model {{ model }} \"{{ prompt }}\""),
    ];

    let mut presets = Vec::new();
    for (tool, template) in templates {
        presets.push((tool.to_string(), worker_preset(tool, template)));
        presets.push((format!("{tool}-manager"), derived_preset(tool, AgentRole::Manager)));
        presets.push((format!("{tool}-reviewer"), derived_preset(tool, AgentRole::Reviewer)));
    }
    presets
}

/// Discover the first tool in [`PREFERENCE_ORDER`] whose executable is on
/// `PATH`, using the `which` crate (matching the teacher's own dependency
/// for the same purpose).
pub fn discover_default() -> Option<&'static str> {
    PREFERENCE_ORDER.iter().copied().find(|tool| which::which(tool).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_yields_three_variants() {
        let presets = all_presets();
        assert_eq!(presets.len(), PREFERENCE_ORDER.len() * 3);
        assert!(presets.iter().any(|(name, _)| name == "claude"));
        assert!(presets.iter().any(|(name, _)| name == "claude-manager"));
        assert!(presets.iter().any(|(name, _)| name == "claude-reviewer"));
    }

    #[test]
    fn manager_and_reviewer_variants_are_hidden_and_inherit_worker() {
        let presets = all_presets();
        let (_, manager) = presets.iter().find(|(n, _)| n == "opencode-manager").unwrap();
        assert!(manager.hidden);
        assert_eq!(manager.inherit.as_deref(), Some("opencode"));
    }
}
