//! Ordered, duplicate-free working set of candidates

use crate::error::RegistryError;
use crate::proxy::cache::WorkingCache;
use crate::proxy::models::Candidate;
use crate::proxy::parser::ProxyParser;
use crate::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Candidate registry preserving first-seen order
#[derive(Debug, Clone, Default)]
pub struct CandidateRegistry {
    order: Vec<Candidate>,
    seen: HashSet<Candidate>,
}

impl CandidateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set with the normalized, deduplicated lines.
    /// Returns the resulting candidate count.
    pub fn load_from_source<'a, I>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.clear();
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(candidate) = ProxyParser::normalize(line) {
                self.insert(candidate);
            }
        }
        self.order.len()
    }

    /// Replace the set with the contents of a candidate file.
    /// A missing file leaves the registry empty.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no candidate file found");
            self.clear();
            return Ok(0);
        }
        let content = fs::read_to_string(path)?;
        let count = self.load_from_source(content.lines());
        tracing::info!(count, path = %path.display(), "loaded unique candidates");
        Ok(count)
    }

    /// Merge previously confirmed-good candidates behind the current ones.
    /// Returns how many were new.
    pub fn seed_from_cache(&mut self, cache: &WorkingCache) -> Result<usize> {
        let entries = cache.read_entries()?;
        let total = entries.len();
        let added = entries
            .into_iter()
            .filter(|candidate| self.insert(candidate.clone()))
            .count();
        tracing::info!(total, added, "seeded candidates from working cache");
        Ok(added)
    }

    /// Merge pasted text into the set without replacing it.
    /// Returns how many candidates were new.
    pub fn import_text(&mut self, text: &str) -> usize {
        ProxyParser::source_lines(text)
            .filter_map(ProxyParser::normalize)
            .filter(|candidate| self.insert(candidate.clone()))
            .count()
    }

    /// Normalize and admit a single candidate
    pub fn add_one(&mut self, raw: &str) -> std::result::Result<Candidate, RegistryError> {
        let candidate = ProxyParser::normalize(raw)
            .ok_or_else(|| RegistryError::InvalidFormat(raw.trim().to_string()))?;
        if !self.insert(candidate.clone()) {
            return Err(RegistryError::Duplicate(candidate.to_string()));
        }
        tracing::info!(%candidate, "candidate added manually");
        Ok(candidate)
    }

    /// Remove a candidate; returns whether it was present
    pub fn remove_one(&mut self, candidate: &Candidate) -> bool {
        if !self.seen.remove(candidate) {
            return false;
        }
        self.order.retain(|c| c != candidate);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    pub fn contains(&self, candidate: &Candidate) -> bool {
        self.seen.contains(candidate)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn insert(&mut self, candidate: Candidate) -> bool {
        if !self.seen.insert(candidate.clone()) {
            return false;
        }
        self.order.push(candidate);
        true
    }
}
