//! Incremental best-candidate tracking and run statistics

use crate::proxy::cache::WorkingCache;
use crate::proxy::models::{Candidate, ProbeResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Summary compiled once a run ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    pub total: usize,
    pub tested: usize,
    pub active: usize,
    pub failed: usize,
    /// `active / tested * 100`, 0 when nothing was tested
    pub success_rate: f64,
    pub best_connect_ms: u64,
    pub avg_connect_ms: u64,
    pub best_http_ms: u64,
    pub avg_http_ms: u64,
    pub best_candidate: Option<Candidate>,
}

#[derive(Debug, Clone)]
struct Best {
    candidate: Candidate,
    http_time_ms: u64,
    tcp_connect_ms: u64,
}

impl Best {
    /// Lower forwarding time wins, connect time breaks ties
    fn is_beaten_by(&self, result: &ProbeResult) -> bool {
        result.http_time_ms < self.http_time_ms
            || (result.http_time_ms == self.http_time_ms
                && result.tcp_connect_ms < self.tcp_connect_ms)
    }
}

/// Folds results as they arrive; correct at any point of a run
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    best: Option<Best>,
    tested: usize,
    active: usize,
    connect_sum: u64,
    connect_min: Option<u64>,
    http_sum: u64,
    http_min: Option<u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result in. Returns `true` when it became the new best.
    pub fn observe(&mut self, result: &ProbeResult) -> bool {
        self.tested += 1;
        if !result.is_active() {
            return false;
        }

        self.active += 1;
        self.connect_sum += result.tcp_connect_ms;
        self.http_sum += result.http_time_ms;
        self.connect_min = Some(
            self.connect_min
                .map_or(result.tcp_connect_ms, |m| m.min(result.tcp_connect_ms)),
        );
        self.http_min = Some(
            self.http_min
                .map_or(result.http_time_ms, |m| m.min(result.http_time_ms)),
        );

        let replace = match &self.best {
            None => true,
            Some(best) => best.is_beaten_by(result),
        };
        if replace {
            self.best = Some(Best {
                candidate: result.candidate.clone(),
                http_time_ms: result.http_time_ms,
                tcp_connect_ms: result.tcp_connect_ms,
            });
        }
        replace
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref().map(|b| &b.candidate)
    }

    pub fn tested(&self) -> usize {
        self.tested
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Compile statistics for a run over `total` candidates
    pub fn finish(&self, total: usize) -> FinalStats {
        let active = self.active as u64;
        let avg = |sum: u64| if active == 0 { 0 } else { sum / active };
        let success_rate = if self.tested == 0 {
            0.0
        } else {
            self.active as f64 / self.tested as f64 * 100.0
        };

        FinalStats {
            total,
            tested: self.tested,
            active: self.active,
            failed: self.tested - self.active,
            success_rate,
            best_connect_ms: self.connect_min.unwrap_or(0),
            avg_connect_ms: avg(self.connect_sum),
            best_http_ms: self.http_min.unwrap_or(0),
            avg_http_ms: avg(self.http_sum),
            best_candidate: self.best().cloned(),
        }
    }
}

/// Ordering for result listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Ping,
    #[default]
    HttpTime,
    Status,
    Candidate,
    Country,
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ping" => Ok(SortKey::Ping),
            "http" | "http-time" | "http_time" => Ok(SortKey::HttpTime),
            "status" => Ok(SortKey::Status),
            "proxy" | "candidate" => Ok(SortKey::Candidate),
            "country" => Ok(SortKey::Country),
            _ => Err(anyhow::anyhow!(
                "Invalid sort key: {}. Use: ping, http, status, proxy, country",
                s
            )),
        }
    }
}

/// Results sorted by `key`; stable, so ties keep completion order
pub fn sorted_results(results: &[ProbeResult], key: SortKey) -> Vec<ProbeResult> {
    let mut sorted = results.to_vec();
    match key {
        SortKey::Ping => sorted.sort_by_key(|r| r.tcp_connect_ms),
        SortKey::HttpTime => sorted.sort_by_key(|r| r.http_time_ms),
        SortKey::Status => sorted.sort_by_key(|r| r.status.to_string()),
        SortKey::Candidate => sorted.sort_by_key(|r| r.candidate.to_string()),
        SortKey::Country => sorted.sort_by(|a, b| a.country.cmp(&b.country)),
    }
    sorted
}

/// Criteria for narrowing a result listing; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub active_only: bool,
    pub max_ping: Option<u64>,
    pub max_http_time: Option<u64>,
    /// Case-insensitive country name
    pub country: Option<String>,
}

impl ResultFilter {
    pub fn matches(&self, result: &ProbeResult) -> bool {
        if self.active_only && !result.is_active() {
            return false;
        }
        if self.max_ping.is_some_and(|max| result.tcp_connect_ms > max) {
            return false;
        }
        if self.max_http_time.is_some_and(|max| result.http_time_ms > max) {
            return false;
        }
        if let Some(country) = &self.country {
            if !result.country.eq_ignore_ascii_case(country) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, results: &[ProbeResult]) -> Vec<ProbeResult> {
        results.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

/// Best active result, or the first cached candidate when none is active
pub fn smart_best(results: &[ProbeResult], cache: &WorkingCache) -> Option<Candidate> {
    let mut aggregator = Aggregator::new();
    for result in results {
        aggregator.observe(result);
    }
    if let Some(best) = aggregator.best() {
        return Some(best.clone());
    }

    match cache.first_entry() {
        Ok(entry) => entry,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read working cache");
            None
        }
    }
}
