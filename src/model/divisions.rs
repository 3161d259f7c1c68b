use crate::model::constants::MIN_RANKED_EVIDENCE;

pub const RANK_DIVISIONS: [&str; 14] = [
    "Cardboard",
    "Wood",
    "Wood+",
    "Bronze",
    "Bronze+",
    "Silver",
    "Silver+",
    "Gold",
    "Gold+",
    "Platinum",
    "Platinum+",
    "Diamond",
    "Diamond+",
    "Rhythm Incarnate",
];

pub const UNRANKED: &str = "Unranked";
pub const THE_ONE: &str = "The One";

/// Maps a percentile standing (fraction of same-ruleset entities with a
/// lower display rating, in `[0, 1]`) to a division label.
///
/// The cutoff curve compresses more divisions at the low end so that
/// climbing out of them feels faster: `1 - (cos(p^0.8 * pi) / 2 + 0.5)`.
pub fn division_label(percentile: f64, evidence_count: i32) -> &'static str {
    if evidence_count < MIN_RANKED_EVIDENCE || percentile <= 0.0 {
        return UNRANKED;
    }
    if percentile == 1.0 {
        return THE_ONE;
    }

    for (i, label) in RANK_DIVISIONS.iter().enumerate() {
        let position = (i + 1) as f64 / RANK_DIVISIONS.len() as f64;
        let cutoff = 1.0 - ((position.powf(0.8) * std::f64::consts::PI).cos() / 2.0 + 0.5);
        if percentile < cutoff {
            return label;
        }
    }

    // Floating point slack near percentile 1.0
    RANK_DIVISIONS[RANK_DIVISIONS.len() - 1]
}

/// Orders labels so promotion/demotion direction can be reported.
pub fn division_index(label: &str) -> i32 {
    if label == UNRANKED {
        return -1;
    }
    if label == THE_ONE {
        return RANK_DIVISIONS.len() as i32;
    }
    RANK_DIVISIONS
        .iter()
        .position(|d| *d == label)
        .map(|i| i as i32)
        .unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unranked_below_minimum_evidence() {
        assert_eq!(division_label(0.9, 4), UNRANKED);
        assert_ne!(division_label(0.9, 5), UNRANKED);
    }

    #[test]
    fn test_the_one_at_top_percentile() {
        assert_eq!(division_label(1.0, 100), THE_ONE);
    }

    #[test]
    fn test_curve_is_monotonic() {
        let mut last = -1;
        for step in 1..100 {
            let p = step as f64 / 100.0;
            let idx = division_index(division_label(p, 50));
            assert!(idx >= last, "division went down as percentile rose at p={p}");
            last = idx;
        }
    }

    #[test]
    fn test_low_divisions_are_wider_than_linear() {
        // Half the playerbase should still be well inside the lower
        // half of the ladder.
        let idx = division_index(division_label(0.5, 50));
        assert!(idx < (RANK_DIVISIONS.len() / 2) as i32);
    }

    #[test]
    fn test_ordering_helpers() {
        assert_eq!(division_index(UNRANKED), -1);
        assert_eq!(division_index("Cardboard"), 0);
        assert_eq!(division_index("Rhythm Incarnate"), 13);
        assert_eq!(division_index(THE_ONE), 14);
        assert!(division_index("Gold") > division_index("Silver+"));
    }
}
