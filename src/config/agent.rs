//! The `Agent` config schema (spec §3 Config, §4.5).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The role an agent plays in a task's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentRole {
    Worker,
    Manager,
    Reviewer,
}

/// One named, role-scoped agent configuration (spec §3 Agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AgentRole>,
    #[serde(rename = "command-template", default, skip_serializing_if = "Option::is_none")]
    pub command_template: Option<String>,
    #[serde(rename = "default-model", default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(rename = "system-prompt", default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(rename = "setup-script", default, skip_serializing_if = "Option::is_none")]
    pub setup_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, toml::Value>,
}
