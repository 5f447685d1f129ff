// ABOUTME: Crash-safe file replacement via temp file and rename.
// ABOUTME: Readers see either the old or the new contents, never a partial write.

use std::io::Write;
use std::path::Path;

/// Replace `path` with `contents`. The temp file lives in the same directory
/// so the final rename stays on one filesystem.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
