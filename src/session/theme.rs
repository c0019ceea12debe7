//! Status-bar theming (spec §4.4): a type-indexed color scheme and the
//! agent-name shortening rule used in the right-hand status segment.

/// Session kind, used to pick a status-bar background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Worker,
    Reviewer,
}

impl SessionKind {
    /// `tmux` color name for `status-bg`.
    pub fn bg_color(self) -> &'static str {
        match self {
            SessionKind::Worker => "colour24",
            SessionKind::Reviewer => "colour54",
        }
    }
}

/// Agent names observed in the wild get a conventional shorthand in the
/// status bar (`opencode -> oc`, `medium -> med`, `anthropic -> an`); parts
/// of 5 characters or fewer are kept as-is, longer unknown parts are
/// truncated to 3 characters, and parts are rejoined with `-`.
pub fn shorten_agent_name(agent: &str) -> String {
    agent
        .split('-')
        .map(|part| match part {
            "opencode" => "oc".to_string(),
            "medium" => "med".to_string(),
            "anthropic" => "an".to_string(),
            p if p.chars().count() <= 5 => p.to_string(),
            p => p.chars().take(3).collect(),
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Render the `tmux set-option` lines that theme a session for `kind`,
/// showing `title` and the shortened `agent` name on the right.
pub fn status_bar_options(id: u64, title: &str, agent: &str, kind: SessionKind) -> Vec<(String, String)> {
    let short = shorten_agent_name(agent);
    let right = format!("#{id} {title} \u{2502} {short}");
    vec![
        ("status-bg".to_string(), kind.bg_color().to_string()),
        ("status-right".to_string(), right),
        ("status-right-length".to_string(), "80".to_string()),
        ("window-status-format".to_string(), "".to_string()),
        ("window-status-current-format".to_string(), "".to_string()),
        ("mouse".to_string(), "on".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_known_vendor_names() {
        assert_eq!(shorten_agent_name("opencode"), "oc");
        assert_eq!(shorten_agent_name("anthropic-medium"), "an-med");
    }

    #[test]
    fn keeps_short_unknown_parts_and_truncates_long_ones() {
        assert_eq!(shorten_agent_name("claude"), "cla");
        assert_eq!(shorten_agent_name("codex"), "codex");
        assert_eq!(shorten_agent_name("gpt"), "gpt");
    }

    #[test]
    fn status_right_includes_id_title_and_shortened_agent() {
        let opts = status_bar_options(7, "Fix bug", "opencode", SessionKind::Worker);
        let right = opts.iter().find(|(k, _)| k == "status-right").unwrap();
        assert!(right.1.contains("#7 Fix bug"));
        assert!(right.1.contains("oc"));
    }
}
