//! The merge rule (`spec.md` §4.3, §5, §8): cached snapshots and freshly
//! fetched points are merged into a date-keyed map; on collision, the
//! fresher fetch wins. Commutative on non-overlapping dates, right-biased
//! on overlaps.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use history_core::Snapshot;

/// Merges `cached` with `fresh`, returning the result sorted ascending by
/// date. Where both sets have a snapshot for the same date, the one from
/// `fresh` wins.
#[must_use]
pub fn merge_snapshots(cached: Vec<Snapshot>, fresh: Vec<Snapshot>) -> Vec<Snapshot> {
    let mut by_date: BTreeMap<NaiveDate, Snapshot> =
        cached.into_iter().map(|s| (s.snapshot_date, s)).collect();
    for s in fresh {
        by_date.insert(s.snapshot_date, s);
    }
    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_core::CountTuple;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snap(date_: NaiveDate, n: u64) -> Snapshot {
        Snapshot::new(1, date_, CountTuple { issues_created_before: n, ..Default::default() })
    }

    #[test]
    fn non_overlapping_merge_is_commutative() {
        let a = vec![snap(date(2024, 1, 1), 1)];
        let b = vec![snap(date(2024, 1, 2), 2)];
        let ab = merge_snapshots(a.clone(), b.clone());
        let ba = merge_snapshots(b, a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn overlap_is_right_biased() {
        let cached = vec![snap(date(2024, 1, 1), 1)];
        let fresh = vec![snap(date(2024, 1, 1), 99)];
        let merged = merge_snapshots(cached, fresh);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].counts.issues_created_before, 99);
    }

    #[test]
    fn result_is_sorted_ascending() {
        let cached = vec![snap(date(2024, 1, 5), 5), snap(date(2024, 1, 1), 1)];
        let fresh = vec![snap(date(2024, 1, 3), 3)];
        let merged = merge_snapshots(cached, fresh);
        let dates: Vec<_> = merged.iter().map(|s| s.snapshot_date).collect();
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 3), date(2024, 1, 5)]);
    }
}
