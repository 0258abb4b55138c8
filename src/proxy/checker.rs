//! Probe pipeline for a single candidate
//!
//! Stages run in order and short-circuit:
//! 1. TCP connect under a fixed timeout
//! 2. GET each plain-HTTP test URL through the candidate
//! 3. HTTPS test URLs, only if stage 2 failed and HTTPS testing is on
//! 4. Geo/ISP lookup and anonymity check, only for active candidates
//!
//! Fast active candidates are handed to the incremental persister.

use crate::config::Settings;
use crate::error::ProbeError;
use crate::proxy::geo::{GeoLookup, IpApiLookup, MmdbLookup, LOOKUP_TIMEOUT};
use crate::proxy::models::{AnonymityLevel, Candidate, ProbeResult};
use crate::proxy::persister::PersisterHandle;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// Timeout for the raw TCP reachability stage
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Active candidates faster than this are persisted eagerly
pub const FRESHNESS_THRESHOLD_MS: u64 = 3000;

/// User agent sent on forwarding probes
const PROBE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Response headers that reveal a forwarding relay
const DISCLOSURE_HEADERS: [&str; 3] = ["via", "x-forwarded-for", "forwarded"];

/// Anything that can turn a candidate into a result
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, candidate: &Candidate) -> ProbeResult;
}

/// Classify a relay from the headers a reflector returned through it.
///
/// Only two levels are distinguishable from headers: a relay that leaks
/// forwarding headers is `Transparent`, every other relay is `Anonymous`.
pub fn classify_anonymity(headers: &HeaderMap) -> AnonymityLevel {
    if DISCLOSURE_HEADERS.iter().any(|name| headers.contains_key(*name)) {
        AnonymityLevel::Transparent
    } else {
        AnonymityLevel::Anonymous
    }
}

/// Real network prober
pub struct RelayProber {
    settings: Settings,
    geo: Arc<dyn GeoLookup>,
    persister: Option<PersisterHandle>,
    tcp_timeout: Duration,
}

impl RelayProber {
    /// Build a prober whose geo lookups go through `client`.
    ///
    /// `client` is the run-wide pooled client; it is not used for forwarding.
    pub fn new(settings: Settings, client: Client) -> Self {
        let geo: Arc<dyn GeoLookup> = match settings.mmdb_path.as_ref() {
            Some(path) => match MmdbLookup::from_path(path) {
                Ok(lookup) => Arc::new(lookup),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot open MMDB, using HTTP geo lookup");
                    Arc::new(IpApiLookup::new(client, settings.geo_endpoint.clone()))
                }
            },
            None => Arc::new(IpApiLookup::new(client, settings.geo_endpoint.clone())),
        };

        Self {
            settings,
            geo,
            persister: None,
            tcp_timeout: TCP_CONNECT_TIMEOUT,
        }
    }

    /// Replace the geo backend
    pub fn with_geo_lookup(mut self, geo: Arc<dyn GeoLookup>) -> Self {
        self.geo = geo;
        self
    }

    /// Persist fast active candidates through `persister`
    pub fn with_persister(mut self, persister: PersisterHandle) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Override the TCP stage timeout
    pub fn with_tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = timeout;
        self
    }

    /// Shared pooled client for non-forwarded requests
    pub fn shared_client(max_workers: usize) -> Result<Client, ProbeError> {
        Ok(Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(max_workers.max(1))
            .timeout(LOOKUP_TIMEOUT)
            .build()?)
    }

    async fn run_stages(&self, candidate: &Candidate) -> Result<ProbeResult, ProbeError> {
        let Some(tcp_connect_ms) = self.tcp_stage(candidate).await else {
            return Ok(ProbeResult::unreachable(candidate.clone()));
        };

        let client = self.forwarding_client(candidate)?;

        let mut http_time_ms = self.forward_stage(&client, candidate, self.settings.http_urls()).await;
        if http_time_ms.is_none() && self.settings.test_https {
            http_time_ms = self.forward_stage(&client, candidate, self.settings.https_urls()).await;
        }
        let Some(http_time_ms) = http_time_ms else {
            return Ok(ProbeResult::no_forward(candidate.clone(), tcp_connect_ms));
        };

        let mut result = ProbeResult::active(candidate.clone(), tcp_connect_ms, http_time_ms);
        self.enrich(&client, &mut result).await;

        if http_time_ms < FRESHNESS_THRESHOLD_MS {
            if let Some(persister) = &self.persister {
                persister.submit(candidate.clone());
            }
        }

        Ok(result)
    }

    /// Elapsed connect time in ms, or `None` on any connect failure
    async fn tcp_stage(&self, candidate: &Candidate) -> Option<u64> {
        let start = Instant::now();
        let connect = TcpStream::connect((candidate.host(), candidate.port()));

        match tokio::time::timeout(self.tcp_timeout, connect).await {
            Ok(Ok(stream)) => {
                let elapsed = start.elapsed().as_millis() as u64;
                drop(stream);
                Some(elapsed)
            }
            Ok(Err(e)) => {
                debug!(%candidate, error = %e, "TCP connect failed");
                None
            }
            Err(_) => {
                debug!(%candidate, "TCP connect timed out");
                None
            }
        }
    }

    /// Client forwarding every request through `candidate`.
    ///
    /// Certificate checks are off: the relay is an untrusted hop, not the
    /// endpoint under test.
    fn forwarding_client(&self, candidate: &Candidate) -> Result<Client, ProbeError> {
        let proxy = ReqwestProxy::all(candidate.forward_url())
            .map_err(|e| ProbeError::Target(format!("{}: {}", candidate, e)))?;

        Ok(Client::builder()
            .proxy(proxy)
            .danger_accept_invalid_certs(true)
            .timeout(self.settings.request_timeout())
            .pool_max_idle_per_host(0)
            .user_agent(PROBE_USER_AGENT)
            .build()?)
    }

    /// Time of the first URL answering 200, trying each in order
    async fn forward_stage<'a>(
        &self,
        client: &Client,
        candidate: &Candidate,
        urls: impl Iterator<Item = &'a str>,
    ) -> Option<u64> {
        let timeout = self.settings.request_timeout();

        for url in urls {
            let start = Instant::now();
            match tokio::time::timeout(timeout, client.get(url).send()).await {
                Ok(Ok(response)) if response.status() == StatusCode::OK => {
                    return Some(start.elapsed().as_millis() as u64);
                }
                Ok(Ok(response)) => {
                    debug!(%candidate, url, status = %response.status(), "forwarding probe rejected");
                }
                Ok(Err(e)) => debug!(%candidate, url, error = %e, "forwarding probe failed"),
                Err(_) => debug!(%candidate, url, "forwarding probe timed out"),
            }
        }
        None
    }

    /// Best effort: failures leave the defaults in place
    async fn enrich(&self, client: &Client, result: &mut ProbeResult) {
        let host = result.candidate.host().to_string();

        match tokio::time::timeout(LOOKUP_TIMEOUT, self.geo.lookup(&host)).await {
            Ok(Ok(info)) => {
                result.country = info.country;
                result.country_code = info.country_code;
                result.isp = info.isp;
            }
            Ok(Err(e)) => debug!(candidate = %result.candidate, error = %e, "geo lookup failed"),
            Err(_) => debug!(candidate = %result.candidate, "geo lookup timed out"),
        }

        let reflector = client
            .get(&self.settings.reflector_url)
            .timeout(LOOKUP_TIMEOUT)
            .send();
        match tokio::time::timeout(LOOKUP_TIMEOUT, reflector).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                result.anonymity = classify_anonymity(response.headers());
            }
            Ok(Ok(response)) => {
                debug!(candidate = %result.candidate, status = %response.status(), "reflector rejected");
            }
            Ok(Err(e)) => debug!(candidate = %result.candidate, error = %e, "reflector failed"),
            Err(_) => debug!(candidate = %result.candidate, "reflector timed out"),
        }
    }
}

#[async_trait]
impl Probe for RelayProber {
    async fn probe(&self, candidate: &Candidate) -> ProbeResult {
        match self.run_stages(candidate).await {
            Ok(result) => result,
            Err(e) => {
                debug!(%candidate, error = %e, "probe pipeline error");
                ProbeResult::error(candidate.clone())
            }
        }
    }
}
