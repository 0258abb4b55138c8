//! Candidate and probe result data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel latency recorded when a stage never completed
pub const UNREACHABLE_MS: u64 = 9999;

/// A normalized relay endpoint in `host:port` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Candidate {
    host: String,
    port: u16,
}

impl Candidate {
    /// Build a candidate, rejecting an empty host or port 0
    pub fn new(host: impl Into<String>, port: u16) -> Option<Self> {
        let host = host.into();
        if host.is_empty() || port == 0 {
            return None;
        }
        Some(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Proxy URL used when forwarding requests through this candidate
    pub fn forward_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<Candidate> for String {
    fn from(candidate: Candidate) -> Self {
        candidate.to_string()
    }
}

impl TryFrom<String> for Candidate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        crate::proxy::parser::ProxyParser::normalize(&value)
            .ok_or_else(|| format!("invalid candidate: {}", value))
    }
}

/// Terminal state of one probe pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Active,
    Failed,
    /// Never produced; kept as an alias of `Failed`
    Timeout,
    Error,
}

impl ProbeStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ProbeStatus::Active)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProbeStatus::Failed | ProbeStatus::Timeout)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Active => write!(f, "Active"),
            ProbeStatus::Failed => write!(f, "Failed"),
            ProbeStatus::Timeout => write!(f, "Timeout"),
            ProbeStatus::Error => write!(f, "Error"),
        }
    }
}

/// How much a forwarding relay discloses about the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AnonymityLevel {
    Elite,
    Anonymous,
    Transparent,
    #[default]
    Unknown,
}

impl fmt::Display for AnonymityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnonymityLevel::Elite => write!(f, "Elite"),
            AnonymityLevel::Anonymous => write!(f, "Anonymous"),
            AnonymityLevel::Transparent => write!(f, "Transparent"),
            AnonymityLevel::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Outcome of probing a single candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub candidate: Candidate,
    pub tcp_connect_ms: u64,
    pub http_time_ms: u64,
    pub status: ProbeStatus,
    pub country: String,
    pub country_code: String,
    pub anonymity: AnonymityLevel,
    pub isp: String,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    fn with_status(candidate: Candidate, tcp_connect_ms: u64, http_time_ms: u64, status: ProbeStatus) -> Self {
        Self {
            candidate,
            tcp_connect_ms,
            http_time_ms,
            status,
            country: "Unknown".to_string(),
            country_code: "XX".to_string(),
            anonymity: AnonymityLevel::Unknown,
            isp: "Unknown".to_string(),
            observed_at: Utc::now(),
        }
    }

    /// Forwarding succeeded; enrichment fields keep their defaults
    pub fn active(candidate: Candidate, tcp_connect_ms: u64, http_time_ms: u64) -> Self {
        Self::with_status(candidate, tcp_connect_ms, http_time_ms, ProbeStatus::Active)
    }

    /// TCP stage failed, nothing else ran
    pub fn unreachable(candidate: Candidate) -> Self {
        Self::with_status(candidate, UNREACHABLE_MS, UNREACHABLE_MS, ProbeStatus::Failed)
    }

    /// Reachable, but no test URL could be fetched through it
    pub fn no_forward(candidate: Candidate, tcp_connect_ms: u64) -> Self {
        Self::with_status(candidate, tcp_connect_ms, UNREACHABLE_MS, ProbeStatus::Failed)
    }

    pub fn error(candidate: Candidate) -> Self {
        Self::with_status(candidate, UNREACHABLE_MS, UNREACHABLE_MS, ProbeStatus::Error)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s: &str) -> Candidate {
        crate::proxy::parser::ProxyParser::normalize(s).unwrap()
    }

    #[test]
    fn test_candidate_rejects_empty_host_and_zero_port() {
        assert!(Candidate::new("", 8080).is_none());
        assert!(Candidate::new("10.0.0.1", 0).is_none());
        assert!(Candidate::new("10.0.0.1", 65535).is_some());
    }

    #[test]
    fn test_candidate_display_and_forward_url() {
        let c = Candidate::new("127.0.0.1", 3128).unwrap();
        assert_eq!(c.to_string(), "127.0.0.1:3128");
        assert_eq!(c.forward_url(), "http://127.0.0.1:3128");
    }

    #[test]
    fn test_candidate_serializes_as_string() {
        let c = candidate("1.2.3.4:8080");
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"1.2.3.4:8080\"");

        let back: Candidate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
        assert!(serde_json::from_str::<Candidate>("\"nope\"").is_err());
    }

    #[test]
    fn test_probe_result_constructors() {
        let c = candidate("1.2.3.4:8080");

        let r = ProbeResult::unreachable(c.clone());
        assert_eq!(r.status, ProbeStatus::Failed);
        assert_eq!(r.tcp_connect_ms, UNREACHABLE_MS);
        assert_eq!(r.http_time_ms, UNREACHABLE_MS);

        let r = ProbeResult::no_forward(c.clone(), 42);
        assert_eq!(r.status, ProbeStatus::Failed);
        assert_eq!(r.tcp_connect_ms, 42);
        assert_eq!(r.http_time_ms, UNREACHABLE_MS);

        let r = ProbeResult::active(c.clone(), 10, 200);
        assert!(r.is_active());
        assert_eq!(r.country, "Unknown");
        assert_eq!(r.country_code, "XX");
        assert_eq!(r.isp, "Unknown");
        assert_eq!(r.anonymity, AnonymityLevel::Unknown);

        let r = ProbeResult::error(c);
        assert_eq!(r.status, ProbeStatus::Error);
        assert!(!r.is_active());
    }

    #[test]
    fn test_timeout_is_failed_alias() {
        assert!(ProbeStatus::Timeout.is_failed());
        assert!(ProbeStatus::Failed.is_failed());
        assert!(!ProbeStatus::Error.is_failed());
        assert!(!ProbeStatus::Active.is_failed());
    }
}
