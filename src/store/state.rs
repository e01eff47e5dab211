//! Atomic JSON snapshot helpers.
//!
//! Snapshots are written temp-then-rename so readers never observe a
//! partial file. On Windows `rename` does not replace, so the
//! destination is unlinked first.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Write `value` to `path` atomically: serialize, write `<path>.tmp`,
/// fsync, rename over the destination.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize snapshot")?;
    atomic_write_bytes(path, json.as_bytes())
}

/// Atomic byte-level variant used for sidecars and receipts.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));

    {
        let mut file = std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create temp file: {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write temp file: {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temp file: {}", tmp.display()))?;
    }

    #[cfg(windows)]
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to unlink destination: {}", path.display()))?;
    }

    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to rename {} into place", tmp.display()))?;
    Ok(())
}

/// Best-effort read: `Ok(None)` when the file is absent, `Err` when it
/// exists but cannot be read or parsed.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt JSON in {}", path.display()))?;
    Ok(Some(value))
}
