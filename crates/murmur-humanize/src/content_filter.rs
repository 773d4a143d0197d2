//! Configurable erasure rules for outgoing / persisted reply text.
//!
//! Rule syntax (one rule per string):
//! - `<start>*<end>`  — erase everything between the markers, inclusive
//! - `{{>*<end>`      — erase from the start of the message through `<end>`
//! - `<start>*>}}`    — erase from `<start>` through the end of the message
//!
//! Output filtering and save filtering are two independent [`FilterSet`]s;
//! the same reply can be sent one way and persisted another.

use tracing::warn;

/// Marker meaning "start of message" in a head rule.
const HEAD_MARKER: &str = "{{>";
/// Marker meaning "end of message" in a tail rule.
const TAIL_MARKER: &str = ">}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    /// Erase `start…end` inclusive, repeatedly.
    Range { start: String, end: String },
    /// Erase from the beginning of the text through `end`.
    Head { end: String },
    /// Erase from `start` through the end of the text.
    Tail { start: String },
}

impl FilterRule {
    /// Parse a single rule string. Returns `None` (with a warning) for
    /// rules missing the `*` wildcard or a required marker.
    pub fn parse(rule: &str) -> Option<FilterRule> {
        let rule = rule.trim();
        if rule.is_empty() {
            return None;
        }
        let Some((start, end)) = rule.split_once('*') else {
            warn!(rule, "content filter rule has no '*' wildcard, ignoring");
            return None;
        };
        let start = start.trim();
        let end = end.trim();

        if start == HEAD_MARKER {
            if end.is_empty() {
                warn!(rule, "head filter rule missing end marker, ignoring");
                return None;
            }
            return Some(FilterRule::Head {
                end: end.to_string(),
            });
        }
        if end == TAIL_MARKER {
            if start.is_empty() {
                warn!(rule, "tail filter rule missing start marker, ignoring");
                return None;
            }
            return Some(FilterRule::Tail {
                start: start.to_string(),
            });
        }
        if start.is_empty() || end.is_empty() {
            warn!(rule, "range filter rule missing a marker, ignoring");
            return None;
        }
        Some(FilterRule::Range {
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    /// Apply this rule once over the whole text. Idempotent: a second pass
    /// over already-filtered text changes nothing.
    pub fn apply(&self, content: &str) -> String {
        let mut out = content.to_string();
        match self {
            FilterRule::Head { end } => {
                if let Some(pos) = out.find(end.as_str()) {
                    out = out[pos + end.len()..].to_string();
                }
            }
            FilterRule::Tail { start } => {
                if let Some(pos) = out.find(start.as_str()) {
                    out.truncate(pos);
                }
            }
            FilterRule::Range { start, end } => loop {
                let Some(start_pos) = out.find(start.as_str()) else {
                    break;
                };
                let Some(end_rel) = out[start_pos + start.len()..].find(end.as_str()) else {
                    break;
                };
                let end_pos = start_pos + start.len() + end_rel + end.len();
                out.replace_range(start_pos..end_pos, "");
            },
        }
        if out != content {
            out = collapse_blank_runs(&out).trim().to_string();
        }
        out
    }
}

/// A parsed, enabled rule list. Invalid rules are dropped at construction.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    enabled: bool,
    rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new(enabled: bool, rules: &[String]) -> Self {
        let rules = if enabled {
            rules.iter().filter_map(|r| FilterRule::parse(r)).collect()
        } else {
            Vec::new()
        };
        Self { enabled, rules }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }

    /// Run every rule in order. Returns the input unchanged when disabled.
    pub fn apply(&self, content: &str) -> String {
        if !self.is_active() || content.is_empty() {
            return content.to_string();
        }
        let mut out = content.to_string();
        for rule in &self.rules {
            out = rule.apply(&out);
        }
        out
    }
}

/// Collapse runs of 3+ newlines left behind by an erasure.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(rules: &[&str]) -> FilterSet {
        FilterSet::new(true, &rules.iter().map(|r| r.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn range_rule_erases_inclusive() {
        let f = set(&["<think>*</think>"]);
        assert_eq!(f.apply("a<think>secret</think>b"), "ab");
    }

    #[test]
    fn range_rule_erases_every_occurrence() {
        let f = set(&["[m]*[/m]"]);
        assert_eq!(f.apply("x[m]1[/m]y[m]2[/m]z"), "xyz");
    }

    #[test]
    fn head_rule_erases_through_marker() {
        let f = set(&["{{>*###"]);
        assert_eq!(f.apply("preamble###hello"), "hello");
    }

    #[test]
    fn tail_rule_erases_from_marker() {
        let f = set(&["-- sig*>}}"]);
        assert_eq!(f.apply("hello-- sig\nbot v2"), "hello");
    }

    #[test]
    fn unterminated_range_is_left_alone() {
        let f = set(&["<a>*</a>"]);
        assert_eq!(f.apply("x<a>never closed"), "x<a>never closed");
    }

    #[test]
    fn filtering_is_idempotent() {
        let f = set(&["<t>*</t>", "{{>*::", "END*>}}"]);
        let input = "head::body<t>cut</t>tail END trailing";
        let once = f.apply(input);
        assert_eq!(f.apply(&once), once);
    }

    #[test]
    fn invalid_rules_are_dropped() {
        let f = set(&["no wildcard", "*", "{{>*", "*>}}"]);
        assert!(!f.is_active());
        assert_eq!(f.apply("unchanged"), "unchanged");
    }

    #[test]
    fn disabled_set_passes_through() {
        let f = FilterSet::new(false, &["a*b".to_string()]);
        assert_eq!(f.apply("a x b"), "a x b");
    }

    #[test]
    fn blank_runs_are_collapsed_after_erasure() {
        let f = set(&["<x>*</x>"]);
        let out = f.apply("line1\n\n<x>gone</x>\n\n\nline2");
        assert!(!out.contains("\n\n\n"));
    }
}
