//! Error types shared by the builder and launcher pipelines.

use crate::exit;

/// Which checksum failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// Adler-32 over the index block
    Index,
    /// SHA-256 over the compressed metadata blob
    Metadata,
    /// SHA-256 prefix over stored slot bytes
    Slot(usize),
    /// The cached `package.checksum` sentinel
    CacheSentinel,
}

impl std::fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumKind::Index => write!(f, "index"),
            ChecksumKind::Metadata => write!(f, "metadata"),
            ChecksumKind::Slot(i) => write!(f, "slot {i}"),
            ChecksumKind::CacheSentinel => write!(f, "cache sentinel"),
        }
    }
}

/// Main error type for package operations.
#[derive(Debug, thiserror::Error)]
pub enum FlavorError {
    #[error("invalid magic: {0}")]
    InvalidMagic(String),

    #[error("unsupported format version 0x{0:08x}")]
    InvalidVersion(u32),

    #[error("{0} checksum mismatch: expected {1}, got {2}")]
    BadChecksum(ChecksumKind, String, String),

    #[error("integrity signature verification failed")]
    SignatureInvalid,

    #[error("package carries no integrity seal")]
    NoIntegritySeal,

    #[error("unsupported operation 0x{0:02x}")]
    UnsupportedOperation(u8),

    #[error("slot {0} extraction failed: {1}")]
    SlotExtractionFailed(usize, String),

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    DiskSpaceInsufficient { needed: u64, available: u64 },

    #[error("extraction lock held by pid {0}")]
    LockContention(u32),

    #[error("unresolved slot reference {{slot:{0}}}")]
    MissingSlotReference(usize),

    #[error("failed to spawn '{0}': {1}")]
    CommandSpawnFailed(String, String),

    #[error("invalid PE structure: {0}")]
    PeStructureInvalid(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("launch error: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlavorError {
    /// Map the error to the process exit code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlavorError::InvalidMagic(_)
            | FlavorError::InvalidVersion(_)
            | FlavorError::BadChecksum(..)
            | FlavorError::SignatureInvalid
            | FlavorError::NoIntegritySeal
            | FlavorError::UnsupportedOperation(_)
            | FlavorError::PeStructureInvalid(_) => exit::EXIT_PSPF_ERROR,
            FlavorError::SlotExtractionFailed(..)
            | FlavorError::DiskSpaceInsufficient { .. }
            | FlavorError::LockContention(_) => exit::EXIT_EXTRACTION_ERROR,
            FlavorError::MissingSlotReference(_)
            | FlavorError::CommandSpawnFailed(..)
            | FlavorError::Launch(_) => exit::EXIT_EXECUTION_ERROR,
            FlavorError::Io(_) => exit::EXIT_IO_ERROR,
            FlavorError::Json(_) | FlavorError::Build(_) => exit::EXIT_PSPF_ERROR,
        }
    }
}

impl From<anyhow::Error> for FlavorError {
    fn from(err: anyhow::Error) -> Self {
        FlavorError::PeStructureInvalid(format!("{err:#}"))
    }
}

/// Result type for package operations.
pub type Result<T> = std::result::Result<T, FlavorError>;
