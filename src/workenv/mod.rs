//! Work-environment management: the cached filesystem layout a package
//! extracts into, its locking protocol, and cache-validity bookkeeping.

pub mod cache;
pub mod lock;
pub mod paths;

pub use lock::ExtractionLock;
pub use paths::WorkenvPaths;
