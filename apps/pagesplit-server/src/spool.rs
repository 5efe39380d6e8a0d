//! Per-request scratch directory for staging split pages on disk
//!
//! Pages are written as `page_0001.pdf`, `page_0002.pdf`, ... and read back in
//! order. The directory lives exactly as long as the [`Spool`], so it is gone
//! once the request finishes, whichever way it finishes.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

pub struct Spool {
    dir: TempDir,
}

impl Spool {
    pub fn create_in(root: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pagesplit-")
            .tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Created spool directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write page `index` (0-based) under its 1-based file name
    pub fn write_page(&self, index: usize, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.path().join(format!("page_{:04}.pdf", index + 1));
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Round-trip `pages` through a fresh spool under `root`
pub fn stage_pages(root: &Path, pages: &[Vec<u8>]) -> std::io::Result<Vec<Vec<u8>>> {
    let spool = Spool::create_in(root)?;

    let paths = pages
        .iter()
        .enumerate()
        .map(|(index, page)| spool.write_page(index, page))
        .collect::<std::io::Result<Vec<_>>>()?;

    paths.iter().map(fs::read).collect()
}
