//! On-disk cache of confirmed-good candidates
//!
//! Plain text, one `host:port` per line. Lines starting with `#` are
//! headers or comments and are ignored on read. New entries are appended,
//! the file is never rewritten.

use crate::proxy::models::Candidate;
use crate::proxy::parser::ProxyParser;
use crate::Result;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Header written when the cache file is first created
pub const CACHE_HEADER: &str = "# Working Proxies - Auto-generated";

/// Default cache file name
pub const DEFAULT_CACHE_FILE: &str = "working_proxies_live.txt";

/// Append-mostly set of known-good candidates
#[derive(Debug, Clone)]
pub struct WorkingCache {
    path: PathBuf,
}

impl WorkingCache {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header if it does not exist yet.
    /// Returns `true` when the file was created.
    pub fn ensure_exists(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        fs::write(&self.path, format!("{}\n", CACHE_HEADER))?;
        tracing::info!(path = %self.path.display(), "created working cache file");
        Ok(true)
    }

    /// Read every valid entry in file order, without duplicates.
    /// A missing file reads as empty.
    pub fn read_entries(&self) -> Result<Vec<Candidate>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut seen = HashSet::new();
        Ok(ProxyParser::parse_string(&content)
            .into_iter()
            .filter(|candidate| seen.insert(candidate.clone()))
            .collect())
    }

    /// First entry in the file, if any
    pub fn first_entry(&self) -> Result<Option<Candidate>> {
        Ok(self.read_entries()?.into_iter().next())
    }

    /// Append `candidate` unless it is already present.
    /// Returns `true` when a line was written.
    pub fn append_if_absent(&self, candidate: &Candidate) -> Result<bool> {
        if self.read_entries()?.contains(candidate) {
            return Ok(false);
        }

        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if is_new {
            writeln!(file, "{}", CACHE_HEADER)?;
        }
        writeln!(file, "{}", candidate)?;
        file.flush()?;
        Ok(true)
    }
}
