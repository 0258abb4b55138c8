//! Typed errors for registry admission, run control and probing

/// Why a run could not be started
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("Test already in progress")]
    AlreadyRunning,

    #[error("No candidates loaded")]
    NoCandidates,

    #[error("Run driver failed: {0}")]
    Driver(String),
}

/// Why a single candidate was not admitted to the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Candidate already exists: {0}")]
    Duplicate(String),

    #[error("Invalid format: {0} (expected HOST:PORT)")]
    InvalidFormat(String),
}

/// Infrastructure failure inside a probe pipeline
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Invalid forwarding target: {0}")]
    Target(String),
}
