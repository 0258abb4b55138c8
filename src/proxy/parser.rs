//! Candidate normalizer for turning raw input lines into `host:port` form

use crate::proxy::models::Candidate;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Hostnames and IPv4 literals; anything carrying a scheme, path or credentials fails
static HOST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("Invalid host regex"));

/// Normalizer for candidate lines
pub struct ProxyParser;

impl ProxyParser {
    /// Normalize a single candidate line
    ///
    /// Accepted shapes, tried in order:
    /// - USER:PASS@HOST:PORT
    /// - HOST:PORT:USER:PASS
    /// - HOST:PORT
    ///
    /// Credentials are dropped. Anything else yields `None`.
    pub fn normalize(line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.contains('@') {
            if let Some(candidate) = Self::parse_auth_at_format(line) {
                return Some(candidate);
            }
        }

        Self::parse_colon_format(line)
    }

    /// Parse user:pass@host:port, keeping only the endpoint
    fn parse_auth_at_format(line: &str) -> Option<Candidate> {
        let mut parts = line.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(credentials), Some(endpoint), None) if !credentials.contains('/') => {
                let (host, port) = endpoint.split_once(':')?;
                Self::parse_host_port(host, port)
            }
            _ => None,
        }
    }

    /// Parse host:port or host:port:user:pass
    fn parse_colon_format(line: &str) -> Option<Candidate> {
        let parts: Vec<&str> = line.split(':').collect();

        match parts.len() {
            2 | 4 => Self::parse_host_port(parts[0], parts[1]),
            _ => None,
        }
    }

    fn parse_host_port(host: &str, port: &str) -> Option<Candidate> {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !HOST_REGEX.is_match(host) {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Candidate::new(host, port)
    }

    /// Lines worth normalizing: trimmed, non-blank, not `#` comments
    pub fn source_lines(content: &str) -> impl Iterator<Item = &str> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
    }

    /// Normalize every line of a text blob, keeping duplicates and order
    pub fn parse_string(content: &str) -> Vec<Candidate> {
        Self::source_lines(content)
            .filter_map(Self::normalize)
            .collect()
    }

    /// Normalize every line of a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content))
    }

    /// Save candidates to a file, one per line
    pub fn save_to_file<P: AsRef<Path>>(candidates: &[Candidate], path: P) -> Result<()> {
        let mut content = candidates
            .iter()
            .map(Candidate::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        content.push('\n');

        fs::write(path, content)?;
        Ok(())
    }
}
