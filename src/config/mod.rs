//! Layered configuration: global (`~/.config/git-crew/config.toml`), repo
//! (`.crew.toml`), and a runtime overlay (`config.runtime.toml`) rewritten by
//! toggles like `set-review-mode` (spec §3 Config, §6 External Interfaces).
//!
//! Grounded on the teacher crate's `config::user`/`config::project` split:
//! typed structs with a `#[serde(flatten)]` tail map so unknown keys survive
//! decode instead of erroring, paired with `etcetera`'s XDG base-strategy
//! lookup rather than hand-rolled `$HOME` concatenation.

mod agent;

pub use agent::{AgentConfig, AgentRole};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CrewError;
use crate::store;

/// How `complete` gates review (spec §4.2 Expansion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewMode {
    #[default]
    Auto,
    Manual,
    AutoFix,
}

impl std::str::FromStr for ReviewMode {
    type Err = CrewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ReviewMode::Auto),
            "manual" => Ok(ReviewMode::Manual),
            "auto_fix" => Ok(ReviewMode::AutoFix),
            other => Err(CrewError::InvalidReviewMode { value: other.to_string() }),
        }
    }
}

impl std::fmt::Display for ReviewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewMode::Auto => "auto",
            ReviewMode::Manual => "manual",
            ReviewMode::AutoFix => "auto_fix",
        };
        write!(f, "{s}")
    }
}

/// Worktree setup directives (spec §4.3 Setup).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeDefaults {
    #[serde(default)]
    pub copy: Vec<PathBuf>,
    #[serde(rename = "setup-command", default, skip_serializing_if = "Option::is_none")]
    pub setup_command: Option<String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, toml::Value>,
}

/// Task-level defaults (spec §3 Config).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_review: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, toml::Value>,
}

/// The schema the core depends on, decoded from one TOML layer. Unknown
/// top-level keys land in `extras` rather than erroring (spec §6 "Unknown
/// TOML keys ... accepted but surfaced as warnings").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agents: IndexMap<String, AgentConfig>,
    #[serde(rename = "default-worker", default, skip_serializing_if = "Option::is_none")]
    pub default_worker: Option<String>,
    #[serde(rename = "default-manager", default, skip_serializing_if = "Option::is_none")]
    pub default_manager: Option<String>,
    #[serde(rename = "default-reviewer", default, skip_serializing_if = "Option::is_none")]
    pub default_reviewer: Option<String>,
    #[serde(rename = "complete-command", default, skip_serializing_if = "Option::is_none")]
    pub complete_command: Option<String>,
    #[serde(rename = "diff-command", default, skip_serializing_if = "Option::is_none")]
    pub diff_command: Option<String>,
    #[serde(default)]
    pub worktree: WorktreeDefaults,
    #[serde(default)]
    pub tasks: TaskDefaults,
    #[serde(rename = "review-mode", default, skip_serializing_if = "Option::is_none")]
    pub review_mode: Option<ReviewMode>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, toml::Value>,
}

/// Which layer contributed the effective value of a setting, for `crew config
/// show` provenance (spec §3 Config Expansion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigSource {
    Default,
    Global,
    Repo,
    Runtime,
    Override,
}

/// The merged config plus observational metadata (spec §3 Expansion).
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub warnings: Vec<String>,
    pub sources: BTreeMap<String, ConfigSource>,
}

/// `<XDG_CONFIG_HOME>/git-crew/config.toml`, resolved via `etcetera`'s
/// base-strategy rather than a hand-rolled `$HOME` join (spec §6).
pub fn global_config_path() -> Option<PathBuf> {
    use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("git-crew").join("config.toml"))
}

pub fn global_override_path() -> Option<PathBuf> {
    global_config_path().map(|p| p.with_file_name("config.override.toml"))
}

pub fn repo_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".crew.toml")
}

pub fn runtime_config_path(crew_dir: &Path) -> PathBuf {
    crew_dir.join("config.runtime.toml")
}

fn decode_layer(path: &Path) -> Result<Option<Config>, CrewError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| CrewError::io(format!("reading {}", path.display()), e))?;
    let config: Config = toml::from_str(&text).map_err(|e| CrewError::Other(format!("invalid TOML in {}: {e}", path.display())))?;
    Ok(Some(config))
}

/// Load and merge every layer, in increasing precedence: default < global <
/// repo < runtime < override (spec §3 Config Expansion).
pub fn load(repo_root: &Path, crew_dir: &Path) -> Result<LoadedConfig, CrewError> {
    let mut merged = Config::default();
    let mut warnings = Vec::new();
    let mut sources: BTreeMap<String, ConfigSource> = BTreeMap::new();

    let layers: [(ConfigSource, Option<PathBuf>); 4] = [
        (ConfigSource::Global, global_config_path()),
        (ConfigSource::Repo, Some(repo_config_path(repo_root))),
        (ConfigSource::Runtime, Some(runtime_config_path(crew_dir))),
        (ConfigSource::Override, global_override_path()),
    ];

    for (source, path) in layers {
        let Some(path) = path else { continue };
        let Some(layer) = decode_layer(&path)? else { continue };
        warnings.extend(collect_warnings(&path, &layer));
        merge_into(&mut merged, &mut sources, source, layer);
    }

    Ok(LoadedConfig { config: merged, warnings, sources })
}

/// Merge `layer` over `base`, recording which scalar settings `source`
/// actually overrode (agent map entries are merged by key, last write wins).
fn merge_into(base: &mut Config, sources: &mut BTreeMap<String, ConfigSource>, source: ConfigSource, layer: Config) {
    for (name, agent) in layer.agents {
        base.agents.insert(name, agent);
    }
    macro_rules! take {
        ($field:ident) => {
            if let Some(value) = layer.$field {
                base.$field = Some(value);
                sources.insert(stringify!($field).to_string(), source);
            }
        };
    }
    take!(default_worker);
    take!(default_manager);
    take!(default_reviewer);
    take!(complete_command);
    take!(diff_command);
    take!(review_mode);

    if layer.worktree.setup_command.is_some() {
        base.worktree.setup_command = layer.worktree.setup_command;
        sources.insert("worktree.setup_command".to_string(), source);
    }
    if !layer.worktree.copy.is_empty() {
        base.worktree.copy = layer.worktree.copy;
        sources.insert("worktree.copy".to_string(), source);
    }
    if layer.tasks.skip_review.is_some() {
        base.tasks.skip_review = layer.tasks.skip_review;
        sources.insert("tasks.skip_review".to_string(), source);
    }
    if layer.tasks.namespace.is_some() {
        base.tasks.namespace = layer.tasks.namespace;
        sources.insert("tasks.namespace".to_string(), source);
    }
}

/// Walk a decoded layer's `extras` tail maps and emit one warning per
/// unrecognized key (spec §6 "surfaced as warnings, never silently dropped").
fn collect_warnings(path: &Path, layer: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    for key in layer.extras.keys() {
        warnings.push(format!("{}: unknown top-level key `{key}`", path.display()));
    }
    for key in layer.worktree.extras.keys() {
        warnings.push(format!("{}: unknown key `worktree.{key}`", path.display()));
    }
    for key in layer.tasks.extras.keys() {
        warnings.push(format!("{}: unknown key `tasks.{key}`", path.display()));
    }
    for (name, agent) in &layer.agents {
        for key in agent.extras.keys() {
            warnings.push(format!("{}: unknown key `agents.{name}.{key}`", path.display()));
        }
    }
    warnings
}

/// Effective `skip_review` default, resolved against `config.tasks`.
pub fn default_skip_review(config: &Config) -> bool {
    config.tasks.skip_review.unwrap_or(false)
}

/// Rewrite only the runtime overlay with a new `review-mode`, under an
/// exclusive lock of that file alone (spec §5 Shared resources).
pub fn set_review_mode(crew_dir: &Path, mode: ReviewMode) -> Result<(), CrewError> {
    let path = runtime_config_path(crew_dir);
    let _guard = store::NamespaceLock::exclusive(&path.with_extension("toml.lock"))?;

    let mut current = decode_layer(&path)?.unwrap_or_default();
    current.review_mode = Some(mode);
    let text = toml::to_string_pretty(&current).map_err(|e| CrewError::Other(e.to_string()))?;
    store::write_atomic(&path, &text)
}

/// Write a brand-new repo config to `.crew.toml`, failing if one already
/// exists (spec §7 `ConfigExists`, `crew config init`).
pub fn init_repo_config(repo_root: &Path) -> Result<PathBuf, CrewError> {
    let path = repo_config_path(repo_root);
    if path.exists() {
        return Err(CrewError::ConfigExists { path });
    }
    let default = Config::default();
    let text = toml::to_string_pretty(&default).map_err(|e| CrewError::Other(e.to_string()))?;
    store::write_atomic(&path, &text)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_top_level_key_becomes_a_warning_not_an_error() {
        let toml = "bogus-setting = true\n";
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.extras.contains_key("bogus-setting"));
        let warnings = collect_warnings(Path::new("x.toml"), &config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bogus-setting"));
    }

    #[test]
    fn repo_layer_overrides_global_layer_per_field() {
        let dir = TempDir::new().unwrap();
        let crew_dir = dir.path().join(".git/crew");
        std::fs::create_dir_all(&crew_dir).unwrap();
        std::fs::write(
            repo_config_path(dir.path()),
            "default-worker = \"claude\"\nreview-mode = \"manual\"\n",
        )
        .unwrap();

        let loaded = load(dir.path(), &crew_dir).unwrap();
        assert_eq!(loaded.config.default_worker.as_deref(), Some("claude"));
        assert_eq!(loaded.config.review_mode, Some(ReviewMode::Manual));
        assert_eq!(loaded.sources.get("default_worker"), Some(&ConfigSource::Repo));
    }

    #[test]
    fn set_review_mode_only_touches_runtime_overlay() {
        let dir = TempDir::new().unwrap();
        let crew_dir = dir.path().join(".git/crew");
        std::fs::create_dir_all(&crew_dir).unwrap();
        set_review_mode(&crew_dir, ReviewMode::AutoFix).unwrap();

        let loaded = load(dir.path(), &crew_dir).unwrap();
        assert_eq!(loaded.config.review_mode, Some(ReviewMode::AutoFix));
        assert_eq!(loaded.sources.get("review_mode"), Some(&ConfigSource::Runtime));
    }

    #[test]
    fn init_repo_config_fails_if_already_present() {
        let dir = TempDir::new().unwrap();
        init_repo_config(dir.path()).unwrap();
        let err = init_repo_config(dir.path()).unwrap_err();
        assert!(matches!(err, CrewError::ConfigExists { .. }));
    }

    #[test]
    fn review_mode_parses_known_values_only() {
        assert_eq!("auto".parse::<ReviewMode>().unwrap(), ReviewMode::Auto);
        assert_eq!("auto_fix".parse::<ReviewMode>().unwrap(), ReviewMode::AutoFix);
        assert!("bogus".parse::<ReviewMode>().is_err());
    }
}
