//! Geo/ISP enrichment for active relays
//!
//! Two backends share the [`GeoLookup`] trait: an HTTP service answering
//! ip-api.com style JSON, and an offline MaxMind MMDB database.

use crate::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for a single enrichment lookup
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Location and network owner of a relay host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub isp: String,
}

impl Default for GeoInfo {
    fn default() -> Self {
        Self {
            country: "Unknown".to_string(),
            country_code: "XX".to_string(),
            isp: "Unknown".to_string(),
        }
    }
}

/// Resolves a relay host to its location
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<GeoInfo>;
}

/// Lookup that always fails, leaving results at their defaults
pub struct NoGeoLookup;

#[async_trait]
impl GeoLookup for NoGeoLookup {
    async fn lookup(&self, _host: &str) -> Result<GeoInfo> {
        Err(anyhow!("geo lookup disabled"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    country_code: Option<String>,
    isp: Option<String>,
    message: Option<String>,
}

impl IpApiResponse {
    fn into_geo_info(self) -> Result<GeoInfo> {
        if self.status != "success" {
            return Err(anyhow!(
                "lookup failed: {}",
                self.message.unwrap_or_else(|| self.status.clone())
            ));
        }
        let defaults = GeoInfo::default();
        Ok(GeoInfo {
            country: self.country.unwrap_or(defaults.country),
            country_code: self.country_code.unwrap_or(defaults.country_code),
            isp: self.isp.unwrap_or(defaults.isp),
        })
    }
}

/// HTTP lookup against `<endpoint>/<host>`
pub struct IpApiLookup {
    client: Client,
    endpoint: String,
}

impl IpApiLookup {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, host: &str) -> Result<GeoInfo> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), host);
        let response = self
            .client
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("geo lookup HTTP status: {}", response.status()));
        }
        response.json::<IpApiResponse>().await?.into_geo_info()
    }
}

/// Offline lookup in a MaxMind City database
pub struct MmdbLookup {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MmdbLookup {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn lookup_ip(&self, ip: IpAddr) -> Result<GeoInfo> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;

        let Some(city) = city else {
            return Err(anyhow!("no record for {}", ip));
        };

        let defaults = GeoInfo::default();
        Ok(GeoInfo {
            country: city
                .country
                .names
                .english
                .map(String::from)
                .unwrap_or(defaults.country),
            country_code: city
                .country
                .iso_code
                .map(String::from)
                .unwrap_or(defaults.country_code),
            // City databases carry no ISP data
            isp: defaults.isp,
        })
    }
}

#[async_trait]
impl GeoLookup for MmdbLookup {
    async fn lookup(&self, host: &str) -> Result<GeoInfo> {
        let ip: IpAddr = host.parse()?;
        self.lookup_ip(ip)
    }
}

impl Clone for MmdbLookup {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
