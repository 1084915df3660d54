//! Aliased GraphQL query construction for `CountsAt` probes.
//!
//! A single `CountsAt` call folds every `(date, predicate)` pair into one
//! composite document as a uniquely aliased `search` sub-query, so the whole
//! batch round-trips in one HTTP request. Aliases are derived deterministically
//! from the ISO date and predicate tag so the response decodes without
//! positional ambiguity (`spec.md` §4.1).

use chrono::NaiveDate;
use history_core::CountTuple;
use std::collections::HashMap;

/// The five count predicates tracked per probe date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    IssuesCreated,
    IssuesClosed,
    PrsCreated,
    PrsClosed,
    PrsMerged,
}

impl Predicate {
    const ALL: [Self; 5] = [
        Self::IssuesCreated,
        Self::IssuesClosed,
        Self::PrsCreated,
        Self::PrsClosed,
        Self::PrsMerged,
    ];

    /// The short tag used in generated alias names.
    fn tag(self) -> &'static str {
        match self {
            Self::IssuesCreated => "ic",
            Self::IssuesClosed => "ix",
            Self::PrsCreated => "pc",
            Self::PrsClosed => "px",
            Self::PrsMerged => "pm",
        }
    }

    /// The GitHub search qualifiers for this predicate (`spec.md` §6).
    fn search_filter(self, owner: &str, name: &str, date: NaiveDate) -> String {
        let d = date.format("%Y-%m-%d");
        match self {
            Self::IssuesCreated => format!("repo:{owner}/{name} is:issue created:{d}"),
            Self::IssuesClosed => format!("repo:{owner}/{name} is:issue is:closed closed:{d}"),
            Self::PrsCreated => format!("repo:{owner}/{name} is:pr created:{d}"),
            Self::PrsClosed => format!("repo:{owner}/{name} is:pr is:closed closed:{d}"),
            Self::PrsMerged => format!("repo:{owner}/{name} is:pr is:merged merged:{d}"),
        }
    }

    fn search_type(self) -> &'static str {
        match self {
            Self::IssuesCreated | Self::IssuesClosed => "ISSUE",
            Self::PrsCreated | Self::PrsClosed | Self::PrsMerged => "ISSUE",
        }
    }
}

/// Escapes a string for interpolation into a GraphQL string literal: backslash
/// and double quote are escaped, every other byte passes through unchanged
/// (`spec.md` §4.1).
#[must_use]
pub fn escape_graphql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// The alias assigned to a given `(date, predicate)` pair.
///
/// `d` prefix keeps the identifier from starting with a digit; dashes in the
/// ISO date are stripped since GraphQL aliases allow only `[_A-Za-z0-9]`.
#[must_use]
pub fn alias_for(date: NaiveDate, predicate: Predicate) -> String {
    format!("d{}_{}", date.format("%Y%m%d"), predicate.tag())
}

/// Builds the composite `CountsAt` query body for a set of probe dates.
///
/// Returns `None` for an empty `dates` slice — callers must special-case the
/// empty-batch rule (`spec.md` §4.1) themselves rather than issue a query.
#[must_use]
pub fn build_counts_query(owner: &str, name: &str, dates: &[NaiveDate]) -> Option<String> {
    if dates.is_empty() {
        return None;
    }

    let mut body = String::from("query HistoryCounts {\n");
    for &date in dates {
        for predicate in Predicate::ALL {
            let alias = alias_for(date, predicate);
            let filter = escape_graphql_string(&predicate.search_filter(owner, name, date));
            body.push_str(&format!(
                "  {alias}: search(query: \"{filter}\", type: {}, first: 0) {{ issueCount }}\n",
                predicate.search_type()
            ));
        }
    }
    body.push('}');
    Some(body)
}

/// Builds the `RepositoryInfo` query for a single repository.
#[must_use]
pub fn build_repository_info_query(owner: &str, name: &str) -> String {
    let owner = escape_graphql_string(owner);
    let name = escape_graphql_string(name);
    format!(
        "query RepositoryInfo {{ repository(owner: \"{owner}\", name: \"{name}\") {{ createdAt issues {{ totalCount }} pullRequests {{ totalCount }} }} }}"
    )
}

/// The `rateLimit` observability query.
#[must_use]
pub fn build_rate_limit_query() -> &'static str {
    "query RateLimit { rateLimit { remaining resetAt } }"
}

/// Extracts `{date -> CountTuple}` from a parsed `CountsAt` response body,
/// keeping only dates that were actually requested.
#[must_use]
pub fn parse_counts_response(
    data: &serde_json::Value,
    requested: &[NaiveDate],
) -> HashMap<NaiveDate, CountTuple> {
    let mut out = HashMap::with_capacity(requested.len());
    for &date in requested {
        let mut counts = CountTuple::default();
        let mut any = false;
        for predicate in Predicate::ALL {
            let alias = alias_for(date, predicate);
            let Some(n) = data
                .get(&alias)
                .and_then(|v| v.get("issueCount"))
                .and_then(serde_json::Value::as_u64)
            else {
                continue;
            };
            any = true;
            match predicate {
                Predicate::IssuesCreated => counts.issues_created_before = n,
                Predicate::IssuesClosed => counts.issues_closed_before = n,
                Predicate::PrsCreated => counts.prs_created_before = n,
                Predicate::PrsClosed => counts.prs_closed_before = n,
                Predicate::PrsMerged => counts.prs_merged_before = n,
            }
        }
        if any {
            out.insert(date, counts);
        }
    }
    out
}
