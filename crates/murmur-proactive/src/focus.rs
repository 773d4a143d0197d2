//! Attention-focus selection for proactive prompts.
//!
//! The prompt can name a couple of users the bot currently pays attention
//! to. Selection is a weighted draw over the attention ranking (defaults
//! favor the top spot heavily), with an optional hint to continue with the
//! user focused last time.

use rand::Rng;
use tracing::warn;

/// Parse `"1:55,2:25,3:12,4:8"` into rank→weight pairs (rank is 1-based).
/// Malformed entries are skipped with a warning; an empty result falls
/// back to uniform weights at selection time.
pub fn parse_rank_weights(spec: &str) -> Vec<(usize, f64)> {
    let mut weights = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((rank, weight)) = part.split_once(':') else {
            warn!(entry = part, "rank weight entry missing ':', skipping");
            continue;
        };
        match (rank.trim().parse::<usize>(), weight.trim().parse::<f64>()) {
            (Ok(rank), Ok(weight)) if rank >= 1 && weight > 0.0 => {
                weights.push((rank, weight));
            }
            _ => warn!(entry = part, "unparseable rank weight entry, skipping"),
        }
    }
    weights
}

/// Pick up to `max_selected` distinct users from the attention ranking
/// (`ranked` is ordered best-first) using the rank weights.
pub fn pick_focus_users<R: Rng + ?Sized>(
    ranked: &[(String, String, f64)],
    weights: &[(usize, f64)],
    max_selected: usize,
    rng: &mut R,
) -> Vec<(String, String)> {
    if ranked.is_empty() || max_selected == 0 {
        return Vec::new();
    }
    let weight_for = |rank: usize| -> f64 {
        weights
            .iter()
            .find(|(r, _)| *r == rank)
            .map(|(_, w)| *w)
            .unwrap_or(if weights.is_empty() { 1.0 } else { 0.0 })
    };

    let mut pool: Vec<(usize, &(String, String, f64))> = ranked.iter().enumerate().collect();
    let mut picked = Vec::new();
    while picked.len() < max_selected && !pool.is_empty() {
        let total: f64 = pool.iter().map(|(i, _)| weight_for(i + 1)).sum();
        if total <= 0.0 {
            break;
        }
        let mut draw = rng.gen::<f64>() * total;
        let mut chosen = pool.len() - 1;
        for (slot, (i, _)) in pool.iter().enumerate() {
            draw -= weight_for(i + 1);
            if draw <= 0.0 {
                chosen = slot;
                break;
            }
        }
        let (_, (id, name, _)) = pool.remove(chosen);
        picked.push((id.clone(), name.clone()));
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn ranked() -> Vec<(String, String, f64)> {
        vec![
            ("u1".to_string(), "alice".to_string(), 0.9),
            ("u2".to_string(), "bob".to_string(), 0.5),
            ("u3".to_string(), "carol".to_string(), 0.2),
        ]
    }

    #[test]
    fn parse_accepts_the_default_spec() {
        let w = parse_rank_weights("1:55,2:25,3:12,4:8");
        assert_eq!(w.len(), 4);
        assert_eq!(w[0], (1, 55.0));
    }

    #[test]
    fn parse_skips_garbage_entries() {
        let w = parse_rank_weights("1:55,nope,3:-2,4:8");
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn draw_zero_picks_the_top_rank() {
        // StepRng at 0 always draws 0.0, which lands on the heaviest
        // leading entry — rank 1.
        let mut rng = StepRng::new(0, 0);
        let picked = pick_focus_users(&ranked(), &parse_rank_weights("1:55,2:25,3:12"), 1, &mut rng);
        assert_eq!(picked, vec![("u1".to_string(), "alice".to_string())]);
    }

    #[test]
    fn selection_is_distinct() {
        let mut rng = rand::thread_rng();
        let picked = pick_focus_users(&ranked(), &parse_rank_weights("1:55,2:25,3:12"), 3, &mut rng);
        let mut ids: Vec<&String> = picked.iter().map(|(id, _)| id).collect();
        ids.dedup();
        assert_eq!(ids.len(), picked.len());
    }

    #[test]
    fn empty_weights_fall_back_to_uniform() {
        let mut rng = rand::thread_rng();
        let picked = pick_focus_users(&ranked(), &[], 2, &mut rng);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn ranks_beyond_the_weight_table_get_zero() {
        // Only rank 1 is weighted, so a single pick exhausts the pool.
        let mut rng = rand::thread_rng();
        let picked = pick_focus_users(&ranked(), &parse_rank_weights("1:100"), 3, &mut rng);
        assert_eq!(picked.len(), 1);
    }
}
