//! Shared data model for the repository activity history engine.
//!
//! These types are the vocabulary every other crate in the workspace speaks:
//! `history-upstream` returns [`CountTuple`]s keyed by date, `history-db`
//! persists [`Snapshot`]s, and `history-service` merges and returns them to
//! collaborators.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(owner, name)` pair identifying a public repository.
///
/// Identity is case-insensitive: `Rust-Lang/rust` and `rust-lang/RUST` refer
/// to the same repository and share the same [`canonical_key`](Self::canonical_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// The lowercase `owner/name` string used as the cache/lock key.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        format!("{}/{}", self.owner.to_lowercase(), self.name.to_lowercase())
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The five non-decreasing "count at date" components tracked per probe.
///
/// Every field is the count of items whose relevant timestamp is strictly
/// before the probe date — an upstream `before:<d>` search. Because the
/// predicate is exclusive of `d`, and items are never deleted upstream,
/// each component is non-decreasing as the probe date advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountTuple {
    pub issues_created_before: u64,
    pub issues_closed_before: u64,
    pub prs_created_before: u64,
    pub prs_closed_before: u64,
    pub prs_merged_before: u64,
}

impl CountTuple {
    /// Net active issues at this probe date: created minus closed.
    ///
    /// Can go negative only when a cache repair is in flight (see
    /// `spec.md` §3); callers render it as `i64`.
    #[must_use]
    pub fn net_active_issues(&self) -> i64 {
        self.issues_created_before as i64 - self.issues_closed_before as i64
    }

    /// Net open pull requests at this probe date: created minus closed
    /// (closed includes merged, since a merge closes the PR upstream).
    #[must_use]
    pub fn net_active_prs(&self) -> i64 {
        self.prs_created_before as i64 - self.prs_closed_before as i64
    }

    /// Componentwise absolute delta against another tuple.
    #[must_use]
    pub fn abs_delta(&self, other: &Self) -> [u64; 5] {
        [
            self.issues_created_before.abs_diff(other.issues_created_before),
            self.issues_closed_before.abs_diff(other.issues_closed_before),
            self.prs_created_before.abs_diff(other.prs_created_before),
            self.prs_closed_before.abs_diff(other.prs_closed_before),
            self.prs_merged_before.abs_diff(other.prs_merged_before),
        ]
    }

    /// The maximum componentwise delta against another tuple — the metric
    /// `should_subdivide` uses to decide whether a segment needs another
    /// probe in the middle.
    #[must_use]
    pub fn max_component_delta(&self, other: &Self) -> u64 {
        self.abs_delta(other).into_iter().max().unwrap_or(0)
    }
}

/// A single persisted `(repository, date, counts)` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub repository_id: i64,
    pub snapshot_date: NaiveDate,
    pub counts: CountTuple,
}

impl Snapshot {
    #[must_use]
    pub fn new(repository_id: i64, snapshot_date: NaiveDate, counts: CountTuple) -> Self {
        Self {
            repository_id,
            snapshot_date,
            counts,
        }
    }

    #[must_use]
    pub fn net_active(&self) -> i64 {
        self.counts.net_active_issues()
    }

    #[must_use]
    pub fn net_active_prs(&self) -> i64 {
        self.counts.net_active_prs()
    }
}

/// Repository metadata returned by the upstream `RepositoryInfo` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub created_at: NaiveDate,
    pub total_issues: u64,
    pub total_prs: u64,
}

/// Repository identity row as persisted by the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub created_at: NaiveDate,
    pub last_synced_at: Option<chrono::NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_is_lowercase() {
        let r = RepositoryRef::new("Rust-Lang", "RUST");
        assert_eq!(r.canonical_key(), "rust-lang/rust");
    }

    #[test]
    fn max_component_delta_picks_largest() {
        let a = CountTuple {
            issues_created_before: 10,
            issues_closed_before: 5,
            prs_created_before: 3,
            prs_closed_before: 1,
            prs_merged_before: 1,
        };
        let b = CountTuple {
            issues_created_before: 12,
            issues_closed_before: 5,
            prs_created_before: 3,
            prs_closed_before: 1,
            prs_merged_before: 40,
        };
        assert_eq!(a.max_component_delta(&b), 39);
    }

    #[test]
    fn net_active_can_reflect_more_closed_than_created() {
        let c = CountTuple {
            issues_created_before: 2,
            issues_closed_before: 5,
            ..Default::default()
        };
        assert_eq!(c.net_active_issues(), -3);
    }
}
