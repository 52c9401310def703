//! Fair-value estimation: confidence scoring over a (gift, tier) sales
//! history. The median/mean/counts themselves live in `db::fair_value`;
//! this module owns the confidence formula so it can be unit-tested in
//! isolation and reused by the rare-at-floor detector.

/// Confidence that a fair-value estimate is reliable, in `[0.0, 1.0]`.
///
/// `base` rewards sample size (0.1 per sale, capped at 1.0), `recency`
/// rewards sales in the last 7 days (capped at +0.3), and `staleness`
/// penalizes estimates whose most recent sale is more than 14 days old
/// (up to -0.4). Mirrors the reference scanner's confidence function.
pub fn confidence(total_count: i64, recent_count: i64, days_since_last: Option<i64>) -> f64 {
    if total_count == 0 {
        return 0.0;
    }

    let base = (total_count as f64 / 10.0).min(1.0);
    let recency_boost = (recent_count as f64 / 3.0).min(0.3);
    let staleness_penalty = match days_since_last {
        Some(d) if d > 14 => ((d - 14) as f64 / 16.0).min(0.4),
        _ => 0.0,
    };

    (base + recency_boost - staleness_penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sales_has_zero_confidence() {
        assert_eq!(confidence(0, 0, None), 0.0);
    }

    #[test]
    fn more_sales_never_decreases_confidence_all_else_equal() {
        let low = confidence(2, 0, Some(5));
        let high = confidence(8, 0, Some(5));
        assert!(high >= low);
    }

    #[test]
    fn recent_sales_boost_confidence() {
        let base = confidence(5, 0, Some(5));
        let boosted = confidence(5, 3, Some(5));
        assert!(boosted > base);
    }

    #[test]
    fn staleness_reduces_confidence() {
        let fresh = confidence(5, 0, Some(5));
        let stale = confidence(5, 0, Some(30));
        assert!(stale < fresh);
    }

    #[test]
    fn confidence_is_always_bounded() {
        for total in [0, 1, 10, 100] {
            for recent in [0, 1, 3, 50] {
                for days in [None, Some(0), Some(14), Some(15), Some(1000)] {
                    let c = confidence(total, recent, days);
                    assert!((0.0..=1.0).contains(&c), "out of bounds: {c}");
                }
            }
        }
    }
}
