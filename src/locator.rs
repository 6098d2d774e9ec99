//! Resource Locator - Static Root Search
//!
//! Relative references are looked up under an ordered list of roots.
//! Absence is an expected outcome, so lookups return `Option`, never an error.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Bundled static directory shipped with the crate
pub const BUNDLED_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

/// Subdirectory of the temporary root receiving downloaded and decoded images
pub const DOWNLOAD_SUBDIR: &str = "downloaded";

/// The three static roots, in lookup priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRoots {
    /// User-configured static directory
    pub static_dir: Option<PathBuf>,
    /// Per-run scratch directory (resolver downloads land here)
    pub tmp_static_dir: Option<PathBuf>,
    /// Read-only bundled directory
    pub internal_static_dir: Option<PathBuf>,
}

impl StaticRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `STATIC_DIR`, `TMP_STATIC_DIR` and `INTERNAL_STATIC_DIR`.
    /// The internal root falls back to the bundled directory.
    pub fn from_env() -> Self {
        let var = |key: &str| env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        Self {
            static_dir: var("STATIC_DIR"),
            tmp_static_dir: var("TMP_STATIC_DIR"),
            internal_static_dir: var("INTERNAL_STATIC_DIR")
                .or_else(|| Some(PathBuf::from(BUNDLED_STATIC_DIR))),
        }
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    pub fn with_tmp_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_static_dir = Some(dir.into());
        self
    }

    pub fn with_internal_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.internal_static_dir = Some(dir.into());
        self
    }

    /// Directory where fetched or decoded images are written
    pub fn download_dir(&self) -> Option<PathBuf> {
        self.tmp_static_dir.as_ref().map(|d| d.join(DOWNLOAD_SUBDIR))
    }

    fn roots(&self) -> impl Iterator<Item = &Path> {
        [&self.static_dir, &self.tmp_static_dir, &self.internal_static_dir]
            .into_iter()
            .filter_map(|d| d.as_deref())
    }

    /// First root under which `item` exists as a file.
    pub fn locate(&self, item: &str) -> Option<PathBuf> {
        find_in(self.roots(), item)
    }

    /// Same as [`locate`](Self::locate) with the working directory searched first.
    /// Used for templates and record lists.
    pub fn locate_with_cwd(&self, item: &str) -> Option<PathBuf> {
        self.locate_from(env::current_dir().ok().as_deref(), item)
    }

    fn locate_from(&self, cwd: Option<&Path>, item: &str) -> Option<PathBuf> {
        find_in(cwd.into_iter().chain(self.roots()), item)
    }

    pub fn exists(&self, item: &str) -> bool {
        self.locate(item).is_some()
    }
}

fn find_in<'a>(roots: impl Iterator<Item = &'a Path>, item: &str) -> Option<PathBuf> {
    let relative = item.trim_start_matches(['/', '\\']);
    if relative.is_empty() {
        return None;
    }
    // References never climb out of a root
    if Path::new(relative).components().any(|c| c == Component::ParentDir) {
        return None;
    }
    roots
        .map(|root| root.join(relative))
        .find(|candidate| candidate.is_file())
}
