//! Crash-safe file replacement.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Replace `path` with `bytes`. The data goes to a temporary file in the
/// same directory, is synced, then renamed over `path`, so readers see the
/// old contents or the new ones and never a partial write. The temporary
/// file is removed on failure.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
