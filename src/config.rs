//! Process-wide configuration resolved once at startup.
//!
//! Everything here is read from the environment exactly once and carried as
//! an immutable record; no module consults ambient mutable state afterwards.

use crate::platform::is_env_true;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Security validation levels for package integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Full checks, fail on any integrity issue
    Strict,
    /// Warn prominently on integrity issues and continue (default)
    Standard,
    /// Warnings only
    Relaxed,
    /// Only critical checks
    Minimal,
    /// Skip all verification (diagnostic only)
    None,
}

impl ValidationLevel {
    /// Parse a validation level, case insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "standard" => Some(Self::Standard),
            "relaxed" => Some(Self::Relaxed),
            "minimal" => Some(Self::Minimal),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Relaxed => "relaxed",
            Self::Minimal => "minimal",
            Self::None => "none",
        }
    }

    /// True when an integrity failure must abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Strict)
    }

    /// True when verification should run at all.
    pub fn verifies(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// How control is handed to the payload process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Replace the current process (POSIX default)
    Exec,
    /// Fork a child, forward stdio, wait
    Spawn,
}

/// Immutable runtime configuration for a launcher process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Escalation policy for integrity failures
    pub validation: ValidationLevel,
    /// exec-replace vs child-process handover
    pub exec_mode: ExecMode,
    /// `false` forces re-extraction even when the cache is valid
    pub use_cache: bool,
    /// Override for the workenv content root (`FLAVOR_WORKDIR`)
    pub workdir_override: Option<PathBuf>,
    /// How long to poll for a contended extraction lock
    pub lock_timeout: Duration,
}

impl RuntimeConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let validation = env::var("FLAVOR_VALIDATION")
            .ok()
            .and_then(|v| ValidationLevel::parse(&v))
            .unwrap_or(ValidationLevel::Standard);

        let exec_mode = match env::var("FLAVOR_EXEC_MODE") {
            Ok(v) if v.eq_ignore_ascii_case("spawn") => ExecMode::Spawn,
            _ => ExecMode::Exec,
        };

        // Caching defaults on; only an explicit false/0 disables it
        let use_cache = env::var("FLAVOR_WORKENV_CACHE")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let workdir_override = env::var_os("FLAVOR_WORKDIR").map(PathBuf::from);

        RuntimeConfig {
            validation,
            exec_mode,
            use_cache,
            workdir_override,
            lock_timeout: Duration::from_secs(60),
        }
    }

    /// True when the launcher was invoked in CLI inspection mode.
    pub fn cli_mode() -> bool {
        is_env_true("FLAVOR_LAUNCHER_CLI")
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            validation: ValidationLevel::Standard,
            exec_mode: ExecMode::Exec,
            use_cache: true,
            workdir_override: None,
            lock_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_validation_levels() {
        assert_eq!(ValidationLevel::parse("STRICT"), Some(ValidationLevel::Strict));
        assert_eq!(ValidationLevel::parse("standard"), Some(ValidationLevel::Standard));
        assert_eq!(ValidationLevel::parse("Relaxed"), Some(ValidationLevel::Relaxed));
        assert_eq!(ValidationLevel::parse("bogus"), None);
    }

    #[test]
    fn only_strict_is_fatal() {
        assert!(ValidationLevel::Strict.is_fatal());
        assert!(!ValidationLevel::Standard.is_fatal());
        assert!(!ValidationLevel::Relaxed.is_fatal());
    }

    #[test]
    fn none_skips_verification() {
        assert!(!ValidationLevel::None.verifies());
        assert!(ValidationLevel::Minimal.verifies());
    }
}
