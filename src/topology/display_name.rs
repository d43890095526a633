//! Display name shortening.
//!
//! Connections are commonly named after their group ("Prod Servers web-01"
//! under "Prod Servers"). When drawn inside the group that prefix is noise,
//! so leading and trailing runs of tokens that also appear in the parent's
//! name are stripped. The interior of the name is kept verbatim, separators
//! included.

use std::collections::HashSet;

/// Strip the parent's name tokens from both ends of `name`.
///
/// Matching is case-insensitive on alphanumeric tokens. Returns `name`
/// unchanged when nothing would remain.
pub fn shrink_display_name(name: &str, parent_name: &str) -> String {
    let parent_tokens: HashSet<String> = token_spans(parent_name)
        .into_iter()
        .map(|(start, end)| parent_name[start..end].to_lowercase())
        .collect();
    if parent_tokens.is_empty() {
        return name.to_string();
    }

    let spans = token_spans(name);
    let is_parent = |&(start, end): &(usize, usize)| {
        parent_tokens.contains(&name[start..end].to_lowercase())
    };

    let first = spans.iter().position(|s| !is_parent(s));
    let last = spans.iter().rposition(|s| !is_parent(s));
    match (first, last) {
        (Some(first), Some(last)) => {
            let (start, _) = spans[first];
            let (_, end) = spans[last];
            if first == 0 && last == spans.len() - 1 {
                // Nothing stripped; keep surrounding punctuation
                name.to_string()
            } else {
                name[start..end].to_string()
            }
        }
        _ => name.to_string(),
    }
}

/// Byte spans of maximal alphanumeric runs
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_leading_parent_tokens() {
        assert_eq!(shrink_display_name("Prod Servers web-01", "Prod Servers"), "web-01");
        assert_eq!(shrink_display_name("prod_servers-db.02", "Prod Servers"), "db.02");
    }

    #[test]
    fn test_strips_trailing_parent_tokens() {
        assert_eq!(shrink_display_name("web-01 (Prod)", "Prod"), "web-01");
    }

    #[test]
    fn test_keeps_interior_tokens() {
        assert_eq!(
            shrink_display_name("Lab bastion lab-gw", "Lab"),
            "bastion lab-gw"
        );
    }

    #[test]
    fn test_unchanged_when_nothing_matches() {
        assert_eq!(shrink_display_name("(web-01)", "Prod"), "(web-01)");
        assert_eq!(shrink_display_name("web-01", ""), "web-01");
    }

    #[test]
    fn test_unchanged_when_everything_matches() {
        assert_eq!(shrink_display_name("Prod", "Prod Servers"), "Prod");
        assert_eq!(shrink_display_name("", "Prod"), "");
    }

    #[test]
    fn test_multibyte_names() {
        assert_eq!(shrink_display_name("Zürich hôte-1", "Zürich"), "hôte-1");
    }
}
