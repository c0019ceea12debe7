//! `<id>.md` parsing and rendering: YAML-style frontmatter + description +
//! appended comment blocks (spec §4.1 Parsing contract).
//!
//! Hand-rolled rather than pulled from a YAML crate: the frontmatter grammar
//! here is deliberately smaller than YAML (flat `key: value` pairs, one
//! array-or-CSV field) and needs bespoke duplicate/unknown-key errors that a
//! generic deserializer wouldn't surface with the right wording.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::task::{Comment, CommentType};
use crate::error::CrewError;

const KNOWN_KEYS: &[&str] = &["title", "labels", "parent", "skip_review"];

#[derive(Debug, Clone, Default)]
pub struct FrontMatter {
    pub title: String,
    pub labels: BTreeSet<String>,
    pub parent_id: Option<u64>,
    pub skip_review: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTaskFile {
    pub front_matter: FrontMatter,
    pub description: String,
    pub comments: Vec<Comment>,
}

/// Parse a full `<id>.md` file.
pub fn parse(content: &str) -> Result<ParsedTaskFile, CrewError> {
    let mut lines = content.lines();

    let Some(first) = lines.next() else {
        return Err(CrewError::Other("empty task file".into()));
    };
    if first.trim_end() != "---" {
        return Err(CrewError::Other("task file must start with '---' frontmatter".into()));
    }

    let mut fm_lines = Vec::new();
    let mut closed = false;
    let mut rest_start = 0usize;
    let all_lines: Vec<&str> = content.lines().collect();
    let mut idx = 1;
    while idx < all_lines.len() {
        if all_lines[idx].trim_end() == "---" {
            closed = true;
            rest_start = idx + 1;
            break;
        }
        fm_lines.push(all_lines[idx]);
        idx += 1;
    }
    if !closed {
        return Err(CrewError::Other("frontmatter missing terminating '---'".into()));
    }

    let front_matter = parse_frontmatter_lines(&fm_lines)?;

    let remainder = all_lines[rest_start..].join("\n");
    let (description, comments) = split_description_and_comments(&remainder)?;

    Ok(ParsedTaskFile {
        front_matter,
        description,
        comments,
    })
}

fn parse_frontmatter_lines(lines: &[&str]) -> Result<FrontMatter, CrewError> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut fm = FrontMatter::default();
    let mut title_set = false;

    for line in lines {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(CrewError::Other(format!("malformed frontmatter line: {line:?}")));
        };
        let key = key.trim();
        let value = value.trim();

        if !KNOWN_KEYS.contains(&key) {
            return Err(CrewError::Other(format!("unknown frontmatter key: {key:?}")));
        }
        if !seen.insert(key.to_string()) {
            return Err(CrewError::Other(format!("duplicate frontmatter key: {key:?}")));
        }

        match key {
            "title" => {
                if value.is_empty() {
                    return Err(CrewError::EmptyTitle);
                }
                fm.title = value.to_string();
                title_set = true;
            }
            "labels" => {
                fm.labels = parse_labels(value);
            }
            "parent" => {
                let n: u64 = value
                    .parse()
                    .map_err(|_| CrewError::InvalidParentID { reason: format!("not a non-negative integer: {value:?}") })?;
                fm.parent_id = if n == 0 { None } else { Some(n) };
            }
            "skip_review" => {
                fm.skip_review = match value {
                    "true" => Some(true),
                    "false" => Some(false),
                    other => {
                        return Err(CrewError::Other(format!(
                            "skip_review must be true or false, got {other:?}"
                        )));
                    }
                };
            }
            _ => unreachable!("filtered by KNOWN_KEYS check above"),
        }
    }

    if !title_set {
        return Err(CrewError::EmptyTitle);
    }

    Ok(fm)
}

/// Parse a `labels` value, accepting either `[a, b, c]` or bare CSV `a, b, c`.
/// Trims, deduplicates, and sorts (via `BTreeSet`) per spec §3.
fn parse_labels(value: &str) -> BTreeSet<String> {
    let inner = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn render_labels(labels: &BTreeSet<String>) -> String {
    let items: Vec<String> = labels.iter().cloned().collect();
    format!("[{}]", items.join(", "))
}

/// Split the post-frontmatter body into the free-text description and a list
/// of trailing comment blocks. The comment separator (`---` followed by a
/// `# Comment: N` line) is recognized only outside of ``` / ~~~ code fences.
fn split_description_and_comments(body: &str) -> Result<(String, Vec<Comment>), CrewError> {
    let lines: Vec<&str> = body.lines().collect();
    let mut in_fence = false;
    let mut fence_marker = "";

    let mut block_starts = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        if !in_fence && (trimmed.starts_with("```") || trimmed.starts_with("~~~")) {
            in_fence = true;
            fence_marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
        } else if in_fence && trimmed.starts_with(fence_marker) {
            in_fence = false;
        } else if !in_fence
            && line.trim_end() == "---"
            && i + 1 < lines.len()
            && lines[i + 1].trim_start().starts_with("# Comment:")
        {
            block_starts.push(i);
        }
        i += 1;
    }

    let description_end = block_starts.first().copied().unwrap_or(lines.len());
    let description = lines[..description_end].join("\n").trim().to_string();

    let mut comments = Vec::new();
    for (idx, &start) in block_starts.iter().enumerate() {
        let end = block_starts.get(idx + 1).copied().unwrap_or(lines.len());
        let block = &lines[start + 1..end];
        comments.push(parse_comment_block(block)?);
    }

    for (expected, comment) in comments.iter().enumerate() {
        if comment.index != expected {
            return Err(CrewError::InvalidCommentMeta {
                reason: format!("expected comment index {expected}, found {}", comment.index),
            });
        }
    }

    Ok((description, comments))
}

fn parse_comment_block(lines: &[&str]) -> Result<Comment, CrewError> {
    let mut index = None;
    let mut author = None;
    let mut time = None;
    let mut r#type = None;
    let mut tags = BTreeSet::new();
    let mut metadata = std::collections::BTreeMap::new();
    let mut body_start = 0;

    for (i, line) in lines.iter().enumerate() {
        let line_trimmed = line.trim_end();
        if let Some(rest) = line_trimmed.strip_prefix("# Comment:") {
            index = Some(rest.trim().parse::<usize>().map_err(|_| {
                CrewError::InvalidCommentMeta { reason: format!("bad comment index: {rest:?}") }
            })?);
        } else if let Some(rest) = line_trimmed.strip_prefix("# Author:") {
            author = Some(rest.trim().to_string());
        } else if let Some(rest) = line_trimmed.strip_prefix("# Time:") {
            time = Some(
                DateTime::parse_from_rfc3339(rest.trim())
                    .map_err(|e| CrewError::InvalidCommentMeta { reason: format!("bad timestamp: {e}") })?
                    .with_timezone(&Utc),
            );
        } else if let Some(rest) = line_trimmed.strip_prefix("# Type:") {
            r#type = Some(rest.trim().parse::<CommentType>().map_err(|_| {
                CrewError::InvalidCommentMeta { reason: format!("bad comment type: {rest:?}") }
            })?);
        } else if let Some(rest) = line_trimmed.strip_prefix("# Tags:") {
            tags = rest.trim().split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        } else if let Some(rest) = line_trimmed.strip_prefix("# Meta:") {
            if let Some((k, v)) = rest.trim().split_once('=') {
                metadata.insert(k.trim().to_string(), v.trim().to_string());
            }
        } else {
            body_start = i;
            break;
        }
        body_start = i + 1;
    }

    let index = index.ok_or_else(|| CrewError::InvalidCommentMeta { reason: "missing # Comment: header".into() })?;
    let author = author.ok_or_else(|| CrewError::InvalidCommentMeta { reason: "missing # Author: header".into() })?;
    let time = time.ok_or_else(|| CrewError::InvalidCommentMeta { reason: "missing # Time: header".into() })?;

    let body_lines = &lines[body_start.min(lines.len())..];
    let text = body_lines.join("\n").trim().to_string();
    if text.is_empty() {
        return Err(CrewError::EmptyMessage);
    }

    Ok(Comment {
        index,
        author,
        time,
        text,
        r#type,
        tags,
        metadata,
    })
}

/// Render a task file: frontmatter, description, then one block per comment.
pub fn render(front_matter: &FrontMatter, description: &str, comments: &[Comment]) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: {}\n", front_matter.title));
    if !front_matter.labels.is_empty() {
        out.push_str(&format!("labels: {}\n", render_labels(&front_matter.labels)));
    }
    if let Some(parent) = front_matter.parent_id {
        out.push_str(&format!("parent: {parent}\n"));
    }
    if let Some(skip) = front_matter.skip_review {
        out.push_str(&format!("skip_review: {skip}\n"));
    }
    out.push_str("---\n\n");
    out.push_str(description.trim_end());
    out.push('\n');

    for comment in comments {
        out.push_str("\n---\n");
        out.push_str(&format!("# Comment: {}\n", comment.index));
        out.push_str(&format!("# Author: {}\n", comment.author));
        out.push_str(&format!("# Time: {}\n", comment.time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
        if let Some(t) = comment.r#type {
            out.push_str(&format!("# Type: {t}\n"));
        }
        if !comment.tags.is_empty() {
            out.push_str(&format!("# Tags: {}\n", comment.tags.iter().cloned().collect::<Vec<_>>().join(", ")));
        }
        for (k, v) in &comment.metadata {
            out.push_str(&format!("# Meta: {k}={v}\n"));
        }
        out.push('\n');
        out.push_str(comment.text.trim_end());
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        "---\ntitle: Fix the bug\nlabels: [backend, urgent]\nparent: 3\nskip_review: true\n---\n\nSomething needs fixing.\n\nWith a fenced block:\n\n```\n---\n# Comment: not actually a comment\n```\n".to_string()
    }

    #[test]
    fn parses_frontmatter_fields() {
        let parsed = parse(&sample()).unwrap();
        assert_eq!(parsed.front_matter.title, "Fix the bug");
        assert_eq!(parsed.front_matter.labels.len(), 2);
        assert_eq!(parsed.front_matter.parent_id, Some(3));
        assert_eq!(parsed.front_matter.skip_review, Some(true));
        assert!(parsed.comments.is_empty());
    }

    #[test]
    fn fenced_separator_does_not_split_comments() {
        let parsed = parse(&sample()).unwrap();
        assert!(parsed.description.contains("# Comment: not actually a comment"));
    }

    #[test]
    fn unknown_key_is_hard_error() {
        let content = "---\ntitle: x\nbogus: 1\n---\n\nbody\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("unknown frontmatter key"));
    }

    #[test]
    fn duplicate_key_is_hard_error() {
        let content = "---\ntitle: x\ntitle: y\n---\n\nbody\n";
        let err = parse(content).unwrap_err();
        assert!(err.to_string().contains("duplicate frontmatter key"));
    }

    #[test]
    fn parent_zero_is_unset() {
        let content = "---\ntitle: x\nparent: 0\n---\n\nbody\n";
        let parsed = parse(content).unwrap();
        assert_eq!(parsed.front_matter.parent_id, None);
    }

    #[test]
    fn comment_blocks_roundtrip() {
        let fm = FrontMatter { title: "T".into(), labels: BTreeSet::new(), parent_id: None, skip_review: None };
        let comments = vec![Comment {
            index: 0,
            author: "agent".into(),
            time: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            text: "did the thing".into(),
            r#type: Some(CommentType::Report),
            tags: BTreeSet::from(["a".to_string(), "b".to_string()]),
            metadata: Default::default(),
        }];
        let rendered = render(&fm, "desc", &comments);
        let parsed = parse(&rendered).unwrap();
        assert_eq!(parsed.comments, comments);
        assert_eq!(parsed.description, "desc");
    }

    #[test]
    fn out_of_order_comment_index_is_rejected() {
        let content = "---\ntitle: x\n---\n\nbody\n\n---\n# Comment: 1\n# Author: a\n# Time: 2026-01-01T00:00:00Z\n\ntext\n";
        let err = parse(content).unwrap_err();
        assert!(matches!(err, CrewError::InvalidCommentMeta { .. }));
    }
}
