//! The Adaptive Resolution Fetcher (`spec.md` §4.2).
//!
//! Converges on a dense `{C(d) for d in D}` timeline over `[start, end]` by
//! repeatedly bisecting segments whose endpoint counts disagree by more than
//! `THRESHOLD`, or that are simply too long, batching every round's midpoint
//! probes through [`CountsSource`] in chunks of at most `MAX_BATCH`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use history_core::{CountTuple, FetcherConfig, Result};
use history_upstream::CountsSource;
use tracing::{debug, info, instrument};

use crate::segment::Segment;

/// Probes `dates` (deduplicated) through `source`, chunked to at most
/// `chunk_size` dates per call. A chunk size of zero or an empty `dates`
/// slice short-circuits to an empty map without a network call
/// (`spec.md` §4.1's empty-batch rule).
async fn probe_chunked(
    source: &dyn CountsSource,
    owner: &str,
    name: &str,
    dates: &[NaiveDate],
    chunk_size: usize,
) -> Result<BTreeMap<NaiveDate, CountTuple>> {
    let mut out = BTreeMap::new();
    if dates.is_empty() || chunk_size == 0 {
        return Ok(out);
    }
    for chunk in dates.chunks(chunk_size) {
        let probed = source.counts_at(owner, name, chunk).await?;
        out.extend(probed);
    }
    Ok(out)
}

/// Discovers a piecewise-monotone timeline over `[start, end]` at the lowest
/// probe cost that satisfies `config`'s error tolerance.
///
/// Returns points sorted ascending by date. If either endpoint's probe is
/// missing from the upstream reply (as opposed to an error), returns
/// whatever was obtained and stops — it never fabricates a value
/// (`spec.md` §4.2 step 1).
#[instrument(skip(source, config), fields(owner, name, %start, %end))]
pub async fn discover(
    source: &dyn CountsSource,
    owner: &str,
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
    config: &FetcherConfig,
) -> Result<Vec<(NaiveDate, CountTuple)>> {
    let chunk_size = config.max_batch.min(source.max_batch()).max(1);

    let endpoint_dates: Vec<NaiveDate> = if start == end { vec![start] } else { vec![start, end] };
    let mut known = probe_chunked(source, owner, name, &endpoint_dates, chunk_size).await?;
    let mut probe_count = known.len();

    let (Some(&c_start), Some(&c_end)) = (known.get(&start), known.get(&end)) else {
        debug!(known = known.len(), "endpoint probe incomplete, stopping early");
        return Ok(known.into_iter().collect());
    };

    if start == end {
        return Ok(known.into_iter().collect());
    }

    let mut active = vec![Segment::new(start, c_start, end, c_end)];
    let mut iterations = 0u32;

    loop {
        let (to_subdivide, mut terminal): (Vec<Segment>, Vec<Segment>) =
            active.into_iter().partition(|s| s.should_subdivide(config));

        if to_subdivide.is_empty() {
            active = terminal;
            break;
        }
        iterations += 1;

        let mut mids_needed: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut splits: Vec<(Segment, NaiveDate)> = Vec::with_capacity(to_subdivide.len());

        for seg in to_subdivide {
            let mid = seg.midpoint();
            if mid == seg.start {
                // Adjacent-day collapse: treat as terminal rather than
                // probing `start` again (`spec.md` §4.2 tie-break rule).
                terminal.push(seg);
                continue;
            }
            if !known.contains_key(&mid) {
                mids_needed.insert(mid);
            }
            splits.push((seg, mid));
        }

        if !mids_needed.is_empty() {
            let dates: Vec<NaiveDate> = mids_needed.into_iter().collect();
            probe_count += dates.len();
            let probed = probe_chunked(source, owner, name, &dates, chunk_size).await?;
            known.extend(probed);
        }

        let mut next_active = terminal;
        for (seg, mid) in splits {
            match known.get(&mid).copied() {
                Some(c_mid) => {
                    next_active.push(Segment::new(seg.start, seg.c_start, mid, c_mid));
                    next_active.push(Segment::new(mid, c_mid, seg.end, seg.c_end));
                }
                // Upstream omitted the midpoint from its reply: nothing more
                // can be learned about this segment, so it stays terminal.
                None => next_active.push(seg),
            }
        }
        debug!(iteration = iterations, segments = next_active.len(), "subdivision round complete");
        active = next_active;
    }

    info!(probes = probe_count, iterations, segments = active.len(), points = known.len(), "discover converged");
    Ok(known.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_upstream::test_support::FakeUpstream;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn linear_counts() -> Arc<dyn Fn(NaiveDate) -> CountTuple + Send + Sync> {
        let epoch = date(2024, 1, 1);
        Arc::new(move |d: NaiveDate| {
            let n = (d - epoch).num_days().max(0) as u64;
            CountTuple {
                issues_created_before: n,
                issues_closed_before: n / 2,
                prs_created_before: n / 3,
                prs_closed_before: n / 4,
                prs_merged_before: n / 5,
            }
        })
    }

    #[tokio::test]
    async fn cold_repository_tiny_range_converges_to_terminal_one_day_segments() {
        let fake = FakeUpstream::new(linear_counts());
        let config = FetcherConfig { threshold: 50, max_interval_days: 30, min_interval_days: 1, max_batch: 12 };
        let points = discover(&fake, "a", "b", date(2024, 1, 1), date(2024, 1, 3), &config)
            .await
            .unwrap();
        assert!(points.len() >= 2 && points.len() <= 3);
        assert_eq!(points.first().unwrap().0, date(2024, 1, 1));
        assert_eq!(points.last().unwrap().0, date(2024, 1, 3));
    }

    #[tokio::test]
    async fn flat_history_does_not_subdivide_within_max_interval() {
        let fake = FakeUpstream::new(Arc::new(|_| CountTuple { issues_created_before: 7, ..Default::default() }));
        let config = FetcherConfig::default();
        let points = discover(&fake, "a", "b", date(2024, 1, 1), date(2024, 1, 20), &config)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn flat_history_longer_than_max_interval_still_subdivides() {
        let fake = FakeUpstream::new(Arc::new(|_| CountTuple { issues_created_before: 7, ..Default::default() }));
        let config = FetcherConfig { max_interval_days: 10, ..FetcherConfig::default() };
        let points = discover(&fake, "a", "b", date(2024, 1, 1), date(2024, 2, 1), &config)
            .await
            .unwrap();
        assert!(points.len() > 2);
    }

    #[tokio::test]
    async fn start_equals_end_is_a_single_probe() {
        let fake = FakeUpstream::new(linear_counts());
        let config = FetcherConfig::default();
        let points = discover(&fake, "a", "b", date(2024, 5, 5), date(2024, 5, 5), &config)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(fake.probed_dates().len(), 1);
    }

    #[tokio::test]
    async fn emits_no_duplicate_dates() {
        let fake = FakeUpstream::new(linear_counts());
        let config = FetcherConfig { threshold: 1, max_interval_days: 30, min_interval_days: 1, max_batch: 12 };
        let points = discover(&fake, "a", "b", date(2024, 1, 1), date(2024, 2, 1), &config)
            .await
            .unwrap();
        let mut dates: Vec<_> = points.iter().map(|(d, _)| *d).collect();
        let before = dates.len();
        dates.dedup();
        assert_eq!(dates.len(), before);
    }

    #[tokio::test]
    async fn rate_limit_during_mid_probe_bubbles_unchanged() {
        let fake = FakeUpstream::new(linear_counts());
        let config = FetcherConfig { threshold: 1, max_interval_days: 30, min_interval_days: 1, max_batch: 1 };
        // Force subdivision (threshold=1) and break on the first midpoint
        // probe after the endpoints succeed.
        let start = date(2024, 1, 1);
        let end = date(2024, 1, 31);
        // Endpoints alone never error; only fail once a mid-probe is needed,
        // so pre-probe endpoints via a separate fake with no failure first.
        let result = discover(&fake, "a", "b", start, end, &config).await;
        assert!(result.is_ok());

        fake.fail_all_with(history_core::Error::RateLimited { remaining: 0, reset_at: None });
        let err = discover(&fake, "a", "b", start, end, &config).await;
        assert!(matches!(err, Err(history_core::Error::RateLimited { .. })));
    }

    #[tokio::test]
    async fn respects_max_batch_by_chunking_mid_probes() {
        let fake = FakeUpstream::new(linear_counts()).with_max_batch(2);
        let config = FetcherConfig { threshold: 1, max_interval_days: 365, min_interval_days: 1, max_batch: 2 };
        let points = discover(&fake, "a", "b", date(2024, 1, 1), date(2024, 1, 9), &config)
            .await
            .unwrap();
        assert!(points.len() >= 2);
    }
}
