use chrono::{DateTime, Utc};

use crate::models::SourceLink;

/// Ordering inputs for canonical selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalKey {
    pub rank: i64,
    pub fetched_at: DateTime<Utc>,
    pub raw_post_id: i64,
}

impl From<&SourceLink> for CanonicalKey {
    fn from(link: &SourceLink) -> Self {
        Self {
            rank: link.priority_rank,
            fetched_at: link.fetched_at,
            raw_post_id: link.raw_post_id,
        }
    }
}

/// Index of the canonical contributor: best priority rank, then earliest
/// fetch, then lowest raw post id. The result does not depend on input order.
pub fn canonical_index(keys: &[CanonicalKey]) -> Option<usize> {
    keys.iter()
        .enumerate()
        .min_by_key(|(_, k)| (k.rank, k.fetched_at, k.raw_post_id))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(rank: i64, minute: u32, id: i64) -> CanonicalKey {
        CanonicalKey {
            rank,
            fetched_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap(),
            raw_post_id: id,
        }
    }

    #[test]
    fn priority_wins_over_fetch_time() {
        let keys = [key(1, 0, 1), key(0, 30, 2)];
        assert_eq!(canonical_index(&keys), Some(1));
    }

    #[test]
    fn ties_break_on_earliest_fetch_then_id() {
        assert_eq!(canonical_index(&[key(0, 30, 1), key(0, 10, 2)]), Some(1));
        assert_eq!(canonical_index(&[key(0, 10, 9), key(0, 10, 3)]), Some(1));
    }

    #[test]
    fn order_invariant() {
        let forward = [key(2, 0, 1), key(0, 5, 2), key(0, 5, 3)];
        let mut reversed = forward;
        reversed.reverse();
        let a = forward[canonical_index(&forward).unwrap()];
        let b = reversed[canonical_index(&reversed).unwrap()];
        assert_eq!(a, b);
        assert_eq!(canonical_index(&[]), None);
    }
}
