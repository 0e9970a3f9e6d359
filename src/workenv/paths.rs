//! Path derivation for a work environment.
//!
//! Given a cache root and a package filename stem `S`, the layout is:
//!
//! ```text
//! <cache>/workenv/S/                   content root (shared, read-mostly)
//! <cache>/workenv/.S.pspf/             metadata root (hidden sibling)
//!     instance/                        persistent across runs
//!         extract/lock                 extraction lock
//!         extract/complete             completion marker
//!         package.checksum             index-checksum sentinel
//!         index.json                   parsed index sidecar
//!         log/                         launcher logs
//!     package/psp.json                 metadata document, rewritten per extraction
//!     tmp/<pid>/                       per-process scratch
//! ```

use std::path::{Path, PathBuf};

const HIDDEN_PREFIX: &str = ".";
const METADATA_SUFFIX: &str = ".pspf";

/// All paths of one work environment.
#[derive(Debug, Clone)]
pub struct WorkenvPaths {
    cache_root: PathBuf,
    name: String,
    content_override: Option<PathBuf>,
}

impl WorkenvPaths {
    /// Derive paths from a cache root and the package file path.
    pub fn new(cache_root: PathBuf, package_path: &Path) -> Self {
        let name = package_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                n.strip_suffix(".psp")
                    .or_else(|| n.strip_suffix(".pspf"))
                    .unwrap_or(n)
            })
            .unwrap_or("unknown")
            .to_string();

        WorkenvPaths {
            cache_root,
            name,
            content_override: None,
        }
    }

    /// Derive paths with an explicit content root (`FLAVOR_WORKDIR`). The
    /// metadata root stays a hidden sibling of the content directory.
    pub fn with_content_override(package_path: &Path, content_root: PathBuf) -> Self {
        let mut paths = Self::new(
            content_root
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            package_path,
        );
        paths.content_override = Some(content_root);
        paths
    }

    /// The workenv name (package filename stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content root the payload runs from.
    pub fn content(&self) -> PathBuf {
        if let Some(ref root) = self.content_override {
            return root.clone();
        }
        self.cache_root.join("workenv").join(&self.name)
    }

    /// Hidden metadata root (`.S.pspf`).
    pub fn metadata_root(&self) -> PathBuf {
        let hidden = format!("{HIDDEN_PREFIX}{}{METADATA_SUFFIX}", self.name);
        if let Some(ref root) = self.content_override {
            return root
                .parent()
                .map(|p| p.join(&hidden))
                .unwrap_or_else(|| PathBuf::from(&hidden));
        }
        self.cache_root.join("workenv").join(hidden)
    }

    /// Persistent instance directory.
    pub fn instance(&self) -> PathBuf {
        self.metadata_root().join("instance")
    }

    /// Extraction-coordination directory.
    pub fn extract_dir(&self) -> PathBuf {
        self.instance().join("extract")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.extract_dir().join("lock")
    }

    pub fn complete_file(&self) -> PathBuf {
        self.extract_dir().join("complete")
    }

    pub fn checksum_file(&self) -> PathBuf {
        self.instance().join("package.checksum")
    }

    pub fn index_sidecar(&self) -> PathBuf {
        self.instance().join("index.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.instance().join("log")
    }

    /// Package-metadata directory, rewritten on every extraction.
    pub fn package_dir(&self) -> PathBuf {
        self.metadata_root().join("package")
    }

    pub fn metadata_document(&self) -> PathBuf {
        self.package_dir().join("psp.json")
    }

    /// Root of all per-process scratch directories.
    pub fn tmp_root(&self) -> PathBuf {
        self.metadata_root().join("tmp")
    }

    /// Scratch directory owned by one process.
    pub fn tmp_for(&self, pid: u32) -> PathBuf {
        self.tmp_root().join(pid.to_string())
    }
}
