//! Agent registry: built-in presets merged with configured agents, `inherit`
//! chain resolution, and role-default selection (spec §4.5).

use indexmap::IndexMap;

use crate::config::{AgentConfig, AgentRole, Config};
use crate::error::CrewError;

use super::builtin;

/// The merged set of named agents a repo can reference: built-in presets
/// overridden/extended by whatever the config layers declared.
pub struct AgentRegistry {
    agents: IndexMap<String, AgentConfig>,
}

impl AgentRegistry {
    /// Build a registry from a loaded config, layering configured agents on
    /// top of the built-in presets (a configured agent with the same name
    /// as a built-in preset replaces it outright; it does not merge).
    pub fn new(config: &Config) -> Self {
        let mut agents = IndexMap::new();
        for (name, preset) in builtin::all_presets() {
            agents.insert(name, preset);
        }
        for (name, cfg) in &config.agents {
            agents.insert(name.clone(), cfg.clone());
        }
        Self { agents }
    }

    /// Names of all non-hidden agents, in insertion order.
    pub fn visible_names(&self) -> Vec<&str> {
        self.agents
            .iter()
            .filter(|(_, a)| !a.hidden)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Resolve an agent's `inherit` chain into a flattened config: any field
    /// left unset on the child is filled from its parent, walking up the
    /// chain. `role` and `inherit` are never inherited — a child must state
    /// its own role (or leave it role-less) and its own inherit target.
    pub fn resolve(&self, name: &str) -> Result<AgentConfig, CrewError> {
        let mut chain = Vec::new();
        let mut current = name.to_string();
        loop {
            if chain.contains(&current) {
                return Err(CrewError::Other(format!(
                    "agent `{name}` has a cyclic inherit chain through `{current}`"
                )));
            }
            chain.push(current.clone());
            let cfg = self
                .agents
                .get(&current)
                .ok_or_else(|| CrewError::AgentNotFound { name: current.clone() })?;
            match &cfg.inherit {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }

        let mut resolved = self.agents.get(&chain[0]).cloned().unwrap();
        for ancestor_name in &chain[1..] {
            let ancestor = self.agents.get(ancestor_name).unwrap();
            merge_missing(&mut resolved, ancestor);
        }
        Ok(resolved)
    }

    /// Pick the default agent name for a role: an explicit config default
    /// wins; otherwise fall back to the first PATH-discoverable built-in
    /// tool in preference order.
    pub fn default_for_role(&self, config: &Config, role: AgentRole) -> Option<String> {
        let explicit = match role {
            AgentRole::Worker => &config.default_worker,
            AgentRole::Manager => &config.default_manager,
            AgentRole::Reviewer => &config.default_reviewer,
        };
        if let Some(name) = explicit {
            return Some(name.clone());
        }
        let tool = builtin::discover_default()?;
        match role {
            AgentRole::Worker => Some(tool.to_string()),
            AgentRole::Manager => Some(format!("{tool}-manager")),
            AgentRole::Reviewer => Some(format!("{tool}-reviewer")),
        }
    }
}

/// Fill any unset field on `child` from `parent`, leaving `role` and
/// `inherit` untouched.
fn merge_missing(child: &mut AgentConfig, parent: &AgentConfig) {
    if child.command_template.is_none() {
        child.command_template = parent.command_template.clone();
    }
    if child.default_model.is_none() {
        child.default_model = parent.default_model.clone();
    }
    if child.system_prompt.is_none() {
        child.system_prompt = parent.system_prompt.clone();
    }
    if child.prompt.is_none() {
        child.prompt = parent.prompt.clone();
    }
    if child.setup_script.is_none() {
        child.setup_script = parent.setup_script.clone();
    }
    if child.description.is_none() {
        child.description = parent.description.clone();
    }
    if child.args.is_empty() {
        child.args = parent.args.clone();
    }
    for (k, v) in &parent.env {
        child.env.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in &parent.extras {
        child.extras.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_manager_inherits_worker_command_template() {
        let config = Config::default();
        let registry = AgentRegistry::new(&config);
        let resolved = registry.resolve("claude-manager").unwrap();
        assert_eq!(resolved.role, Some(AgentRole::Manager));
        assert!(resolved.command_template.unwrap().contains("claude"));
    }

    #[test]
    fn unknown_agent_errors() {
        let config = Config::default();
        let registry = AgentRegistry::new(&config);
        let err = registry.resolve("nonexistent").unwrap_err();
        assert!(matches!(err, CrewError::AgentNotFound { .. }));
    }

    #[test]
    fn cyclic_inherit_is_rejected() {
        let mut config = Config::default();
        let mut a = AgentConfig::default();
        a.inherit = Some("b".to_string());
        let mut b = AgentConfig::default();
        b.inherit = Some("a".to_string());
        config.agents.insert("a".to_string(), a);
        config.agents.insert("b".to_string(), b);
        let registry = AgentRegistry::new(&config);
        let err = registry.resolve("a").unwrap_err();
        assert!(matches!(err, CrewError::Other(_)));
    }

    #[test]
    fn configured_agent_overrides_builtin_of_same_name() {
        let mut config = Config::default();
        let mut claude = AgentConfig::default();
        claude.command_template = Some("custom-claude {{ prompt }}".to_string());
        config.agents.insert("claude".to_string(), claude);
        let registry = AgentRegistry::new(&config);
        let resolved = registry.resolve("claude").unwrap();
        assert_eq!(resolved.command_template.as_deref(), Some("custom-claude {{ prompt }}"));
    }

    #[test]
    fn explicit_default_worker_wins_over_discovery() {
        let mut config = Config::default();
        config.default_worker = Some("claude".to_string());
        let registry = AgentRegistry::new(&config);
        assert_eq!(registry.default_for_role(&config, AgentRole::Worker), Some("claude".to_string()));
    }
}
