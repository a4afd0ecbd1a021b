//! Spill-file factory: hands out a stable, unique on-disk path per page
//! index, scoped to a per-process scratch directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{PetabufError, Result};

/// Disambiguates scratch directories for more than one `SpillFiles` built
/// in the same process, which only happens in the test suite (each test
/// function gets its own instance; the production binary only ever
/// creates one, so its directory name carries no such suffix).
#[cfg(test)]
static TEST_INSTANCE_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct SpillFiles {
    dir: PathBuf,
}

impl SpillFiles {
    /// Create the scratch directory for this process, named `petabuf-<pid>`.
    /// Not removed at exit: cleanup of spill files on abnormal termination
    /// is out of scope, and we don't special-case clean shutdown either,
    /// since the directory is already empty by the time every page has
    /// been freed.
    pub fn new() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("petabuf-{}", std::process::id()));
        fs::create_dir_all(&dir).map_err(PetabufError::Io)?;
        Ok(SpillFiles { dir })
    }

    /// Test-only constructor: several instances share a process under
    /// `cargo test`, so each gets a distinct directory to avoid page-index
    /// path collisions between unrelated tests.
    #[cfg(test)]
    pub(crate) fn new_for_test() -> Result<Self> {
        let instance = TEST_INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir()
            .join(format!("petabuf-test-{}-{instance}", std::process::id()));
        fs::create_dir_all(&dir).map_err(PetabufError::Io)?;
        Ok(SpillFiles { dir })
    }

    /// Path for the spill file backing page `idx`. Stable across calls.
    pub fn path_for(&self, idx: u32) -> Result<PathBuf> {
        let path = self.dir.join(idx.to_string());
        if path.as_os_str().len() > libc::PATH_MAX as usize {
            return Err(PetabufError::SpillPath { idx });
        }
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
