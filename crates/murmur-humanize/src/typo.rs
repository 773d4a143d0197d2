//! Typo injection — swaps a few characters for homophones so replies read
//! like they were typed by hand, not generated.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

use murmur_core::config::TypoConfig;

/// Built-in homophone pairs for the most common CJK slips. Config entries
/// merge over these.
const BUILTIN_HOMOPHONES: [(&str, &[&str]); 12] = [
    ("的", &["得", "地"]),
    ("在", &["再"]),
    ("再", &["在"]),
    ("吗", &["嘛"]),
    ("吧", &["八"]),
    ("是", &["事"]),
    ("做", &["作"]),
    ("作", &["做"]),
    ("他", &["她", "它"]),
    ("那", &["哪"]),
    ("哪", &["那"]),
    ("啊", &["阿"]),
];

#[derive(Debug, Clone)]
pub struct TypoGenerator {
    config: TypoConfig,
    homophones: HashMap<char, Vec<char>>,
}

impl TypoGenerator {
    pub fn new(config: TypoConfig) -> Self {
        let mut homophones: HashMap<char, Vec<char>> = HashMap::new();
        for (from, to) in BUILTIN_HOMOPHONES {
            if let Some(key) = from.chars().next() {
                homophones.insert(key, to.iter().filter_map(|s| s.chars().next()).collect());
            }
        }
        for (from, alternatives) in &config.typo_homophones {
            if let Some(key) = from.chars().next() {
                let alts: Vec<char> = alternatives.iter().filter_map(|s| s.chars().next()).collect();
                if !alts.is_empty() {
                    homophones.insert(key, alts);
                }
            }
        }
        Self { config, homophones }
    }

    /// Whether this text qualifies for injection at all (length and CJK
    /// thresholds; the probability draw happens in [`TypoGenerator::inject`]).
    fn is_eligible(&self, text: &str) -> bool {
        if text.chars().count() < self.config.typo_min_text_length {
            return false;
        }
        let cjk = text.chars().filter(|c| is_cjk(*c)).count();
        cjk >= self.config.typo_min_cjk_chars
    }

    /// Maybe replace `[typo_min_count, typo_max_count]` characters with
    /// homophones. Returns the input untouched when disabled, ineligible,
    /// or when the probability draw fails.
    pub fn inject(&self, text: &str) -> String {
        if !self.config.enable_typo_injection || !self.is_eligible(text) {
            return text.to_string();
        }
        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() >= self.config.typo_probability {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut candidates: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|(_, c)| self.homophones.contains_key(c))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return text.to_string();
        }

        candidates.shuffle(&mut rng);
        let lo = self.config.typo_min_count.max(1);
        let hi = self.config.typo_max_count.max(lo);
        let count = rng.gen_range(lo..=hi).min(candidates.len());

        let mut out = chars;
        for &idx in candidates.iter().take(count) {
            if let Some(alts) = self.homophones.get(&out[idx]) {
                if let Some(&replacement) = alts.choose(&mut rng) {
                    out[idx] = replacement;
                }
            }
        }
        debug!(replaced = count, "typo injection applied");
        out.into_iter().collect()
    }
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}
