//! Atomic file persistence helpers

use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

/// Write `contents` to a temp file next to `path` and rename it over `path`, so an
/// interrupted write leaves either the old or the new file, never a truncated one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let contents = serde_json::to_vec(value).map_err(io::Error::other)?;
    write_atomic(path, &contents)
}

/// Create `path` holding an empty JSON object if it does not exist yet.
/// Returns true when the file was created.
pub fn ensure_json_object(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(b"{}")?;
    Ok(true)
}
