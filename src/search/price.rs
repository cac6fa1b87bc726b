//! Budget-ceiling expansion.
//!
//! Inventory is sparse per price point, so "at most X" as a hard upper
//! bound returns only the bottom of the market. A lone ceiling becomes a
//! floor at 70% of it instead, and the ceiling itself is not forwarded.

const LONG_TERM_LOWER: i64 = 2_000;
const LONG_TERM_UPPER: i64 = 25_000;

/// Returns `(lower, upper)` bounds for the store query. First matching
/// rule wins:
/// - both given: passed through unchanged;
/// - ceiling only: `lower = round(ceiling * 0.7)`, no upper;
/// - floor only: passed through, no upper;
/// - neither, long-term wording: fixed daily-rate band;
/// - neither: no price constraint.
pub fn derive_bounds(
    ceiling: Option<i64>,
    floor: Option<i64>,
    long_term: bool,
) -> (Option<i64>, Option<i64>) {
    match (ceiling, floor) {
        (Some(c), Some(f)) => (Some(f), Some(c)),
        (Some(c), None) => (Some((c as f64 * 0.7).round() as i64), None),
        (None, Some(f)) => (Some(f), None),
        (None, None) if long_term => {
            (Some(LONG_TERM_LOWER), Some(LONG_TERM_UPPER))
        }
        (None, None) => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_ceiling_becomes_a_floor() {
        assert_eq!(derive_bounds(Some(1000), None, false), (Some(700), None));
    }

    #[test]
    fn explicit_range_is_trusted() {
        assert_eq!(
            derive_bounds(Some(1000), Some(800), false),
            (Some(800), Some(1000))
        );
    }

    #[test]
    fn lone_floor_passes_through() {
        assert_eq!(derive_bounds(None, Some(500), false), (Some(500), None));
    }

    #[test]
    fn long_term_gets_a_default_band() {
        assert_eq!(
            derive_bounds(None, None, true),
            (Some(2_000), Some(25_000))
        );
        assert_eq!(derive_bounds(None, None, false), (None, None));
    }

    #[test]
    fn long_term_hint_yields_to_explicit_numbers() {
        assert_eq!(derive_bounds(Some(1000), None, true), (Some(700), None));
    }
}
