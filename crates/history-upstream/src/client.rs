//! The GraphQL batch client (`spec.md` §4.1).
//!
//! Talks to a single upstream POST endpoint taking `{"query": "..."}` with a
//! bearer token. Never retries — retry is a policy decision left to the
//! caller (the fetcher, or whatever wraps it).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;
use history_core::{CountTuple, Counter, Error, RepositoryInfo, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::query::{build_counts_query, build_rate_limit_query, build_repository_info_query, parse_counts_response};

/// Default ceiling on probe dates per `CountsAt` call (`spec.md` §4.2).
pub const DEFAULT_MAX_BATCH: usize = 12;

/// Observability snapshot returned by [`UpstreamClient::rate_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: i64,
    pub reset_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    extensions: Option<Value>,
}

/// A GraphQL batch client for the upstream repository activity API.
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    max_batch: usize,
    requests_sent: Counter,
    last_rate_limit: Mutex<Option<RateLimit>>,
}

impl UpstreamClient {
    /// Builds a client against `endpoint`, authenticating with `token` as a
    /// bearer credential.
    pub fn new(endpoint: reqwest::Url, token: &str, max_batch: usize) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Transport(format!("invalid token header: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            max_batch,
            requests_sent: Counter::new(),
            last_rate_limit: Mutex::new(None),
        })
    }

    /// Total number of upstream HTTP requests sent by this client so far.
    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load()
    }

    #[must_use]
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// The most recently observed rate-limit snapshot, if any call has
    /// completed yet. Lets a caller fail fast before spending a round trip
    /// it already knows is doomed.
    #[must_use]
    pub fn last_rate_limit(&self) -> Option<RateLimit> {
        *self.last_rate_limit.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record_rate_limit(&self, rl: RateLimit) {
        *self
            .last_rate_limit
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(rl);
    }

    #[instrument(skip(self), fields(owner, name))]
    pub async fn repository_info(&self, owner: &str, name: &str) -> Result<RepositoryInfo> {
        let query = build_repository_info_query(owner, name);
        let data = self.execute(&query).await?;

        let repo = data
            .get("repository")
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::NotFound(format!("{owner}/{name}")))?;

        let created_at = repo
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.date_naive())
            .ok_or_else(|| Error::Protocol("missing or invalid createdAt".into()))?;
        let total_issues = repo
            .get("issues")
            .and_then(|v| v.get("totalCount"))
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Protocol("missing issues.totalCount".into()))?;
        let total_prs = repo
            .get("pullRequests")
            .and_then(|v| v.get("totalCount"))
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Protocol("missing pullRequests.totalCount".into()))?;

        Ok(RepositoryInfo {
            created_at,
            total_issues,
            total_prs,
        })
    }

    /// `len(dates) <= max_batch`; a larger input is a programmer error.
    #[instrument(skip(self, dates), fields(owner, name, n = dates.len()))]
    pub async fn counts_at(
        &self,
        owner: &str,
        name: &str,
        dates: &[NaiveDate],
    ) -> Result<HashMap<NaiveDate, CountTuple>> {
        if dates.len() > self.max_batch {
            return Err(Error::BatchTooLarge {
                len: dates.len(),
                max: self.max_batch,
            });
        }
        let Some(query) = build_counts_query(owner, name, dates) else {
            return Ok(HashMap::new());
        };

        let data = self.execute(&query).await?;
        Ok(parse_counts_response(&data, dates))
    }

    #[instrument(skip(self))]
    pub async fn rate_limit(&self) -> Result<RateLimit> {
        let data = self.execute(build_rate_limit_query()).await?;
        let node = data
            .get("rateLimit")
            .ok_or_else(|| Error::Protocol("missing rateLimit".into()))?;
        let remaining = node
            .get("remaining")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Protocol("missing rateLimit.remaining".into()))?;
        let reset_at = node
            .get("resetAt")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp());
        let rl = RateLimit { remaining, reset_at };
        self.record_rate_limit(rl);
        Ok(rl)
    }

    async fn execute(&self, query: &str) -> Result<Value> {
        self.requests_sent.inc();
        debug!(query_len = query.len(), "sending upstream GraphQL request");

        let body = serde_json::json!({ "query": query });
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Transport(format!("HTTP {}", resp.status())));
        }

        let parsed: GraphQlResponse = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid JSON body: {e}")))?;

        if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
            if let Some(rate_limited) = errors.iter().find(|e| e.kind.as_deref() == Some("RATE_LIMITED")) {
                let remaining = rate_limited
                    .extensions
                    .as_ref()
                    .and_then(|ext| ext.get("remaining"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let reset_at = rate_limited
                    .extensions
                    .as_ref()
                    .and_then(|ext| ext.get("resetAt"))
                    .and_then(Value::as_i64);
                warn!(remaining, ?reset_at, "upstream rate limit hit");
                self.record_rate_limit(RateLimit { remaining, reset_at });
                return Err(Error::RateLimited { remaining, reset_at });
            }
            let joined = errors.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; ");
            return Err(Error::Protocol(joined));
        }

        parsed.data.ok_or_else(|| Error::Protocol("response had neither data nor errors".into()))
    }
}
