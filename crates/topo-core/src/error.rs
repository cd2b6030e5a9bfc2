//! Error types for topology synthesis.

use thiserror::Error;

/// Result type alias for synthesis operations.
pub type SynthResult<T> = Result<T, SynthError>;

/// A violated `TopologyParameters` invariant.
///
/// Validation stops at the first violation, so each error names exactly
/// one invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("service_name must match ^[a-z][a-z0-9-]*$ and be 1..=24 chars, got {0:?}")]
    InvalidServiceName(String),

    #[error("min_task_count must be >= 1, got {0}")]
    MinTaskCountZero(u32),

    #[error("max_task_count ({max}) must be >= min_task_count ({min})")]
    MaxBelowMin { min: u32, max: u32 },

    #[error("cpu_target_percent must be in 1..=100, got {0}")]
    CpuTargetOutOfRange(u32),

    #[error("ci_org must match ^[A-Za-z0-9_.-]+$, got {0:?}")]
    InvalidCiOrg(String),

    #[error("ci_repo must match ^[A-Za-z0-9_.-]+$, got {0:?}")]
    InvalidCiRepo(String),

    #[error("max_zones must be in 1..=6, got {0}")]
    MaxZonesOutOfRange(u8),
}

/// Errors that abort synthesis. No partial graph survives any of them.
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    #[error("duplicate logical id: {0}")]
    DuplicateResource(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("{from} references unknown resource {to}")]
    DanglingReference { from: String, to: String },

    #[error("dependency cycle through {0}")]
    DependencyCycle(String),

    #[error("address space exhausted: {blocks} /{mask} blocks do not fit in {cidr}")]
    AddressSpaceExhausted { cidr: String, mask: u8, blocks: u32 },

    #[error("invalid property on {resource}: {reason}")]
    InvalidProperty { resource: String, reason: String },

    #[error("canary isolation violated: {0}")]
    CanaryExposed(String),

    #[error("trust boundary violated: {0}")]
    TrustViolation(String),
}
