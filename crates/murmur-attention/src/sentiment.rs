//! Keyword sentiment detection with negation windows.
//!
//! A keyword hit is discarded when any configured negation word appears in
//! the `negation_check_range` characters immediately before it ("not great"
//! must not count as praise). Majority polarity wins; ties are neutral.

use murmur_core::config::EmotionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Scan `text` for sentiment. Returns `None` when detection is disabled,
/// nothing matches, or positive and negative scores tie.
pub fn detect(text: &str, config: &EmotionConfig) -> Option<Polarity> {
    if !config.enable_attention_emotion_detection || text.is_empty() {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let positive = score_keywords(&chars, &config.positive_keywords, config);
    let negative = score_keywords(&chars, &config.negative_keywords, config);

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Some(Polarity::Positive),
        std::cmp::Ordering::Less => Some(Polarity::Negative),
        std::cmp::Ordering::Equal => None,
    }
}

/// Count non-negated occurrences of every keyword.
fn score_keywords(chars: &[char], keywords: &[String], config: &EmotionConfig) -> usize {
    let mut score = 0;
    for keyword in keywords {
        let kw: Vec<char> = keyword.chars().collect();
        if kw.is_empty() {
            continue;
        }
        let mut start = 0;
        while let Some(pos) = find_from(chars, &kw, start) {
            if !(config.attention_enable_negation && has_negation_before(chars, pos, config)) {
                score += 1;
            }
            start = pos + 1;
        }
    }
    score
}

/// Char-index substring search (byte offsets would split CJK text).
fn find_from(haystack: &[char], needle: &[char], start: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + start)
}

/// Any negation word within the window just before `keyword_pos`?
fn has_negation_before(chars: &[char], keyword_pos: usize, config: &EmotionConfig) -> bool {
    let window_start = keyword_pos.saturating_sub(config.attention_negation_check_range);
    let window: String = chars[window_start..keyword_pos].iter().collect();
    config
        .attention_negation_words
        .iter()
        .filter(|w| !w.is_empty())
        .any(|w| window.contains(w.as_str()))
}
