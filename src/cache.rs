//! Process-wide string-file cache.
//!
//! Transformed sources never go back to disk; the loader adapter streams
//! them out of this map in chunks. Entries are keyed by the original path,
//! registered exactly once, and immutable afterwards. Each entry carries a
//! monotonic read cursor, so `cursor == len` is the EOF condition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::errors::{LjpError, Result};

struct StringFile {
    content: String,
    cursor: usize,
}

static FILES: Lazy<Mutex<HashMap<PathBuf, StringFile>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn with_entry<T>(path: &Path, f: impl FnOnce(&mut StringFile) -> T) -> Result<T> {
    let mut files = FILES.lock().expect("string-file cache poisoned");
    match files.get_mut(path) {
        Some(entry) => Ok(f(entry)),
        None => Err(LjpError::internal(format!(
            "file not found in string cache: {}",
            path.display()
        ))),
    }
}

/// Registers transformed content for a path. Registering the same path twice
/// is a fatal `DuplicateRegister`.
pub fn register(path: &Path, content: String) -> Result<()> {
    let mut files = FILES.lock().expect("string-file cache poisoned");
    if files.contains_key(path) {
        return Err(LjpError::DuplicateRegister {
            path: path.to_path_buf(),
        });
    }
    files.insert(path.to_path_buf(), StringFile { content, cursor: 0 });
    Ok(())
}

pub fn contains(path: &Path) -> bool {
    FILES
        .lock()
        .expect("string-file cache poisoned")
        .contains_key(path)
}

/// Returns a copy of the registered content, for `$include` inlining.
pub fn content(path: &Path) -> Option<String> {
    FILES
        .lock()
        .expect("string-file cache poisoned")
        .get(path)
        .map(|entry| entry.content.clone())
}

/// Rewinds the read cursor to the start of the entry.
pub fn reset(path: &Path) -> Result<()> {
    with_entry(path, |entry| entry.cursor = 0)
}

/// Copies up to `buf.len()` bytes at the cursor into `buf`, advances the
/// cursor, and returns the count. Zero means EOF.
pub fn read(path: &Path, buf: &mut [u8]) -> Result<usize> {
    with_entry(path, |entry| {
        let remaining = &entry.content.as_bytes()[entry.cursor..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        entry.cursor += count;
        count
    })
}

pub fn eof(path: &Path) -> Result<bool> {
    with_entry(path, |entry| entry.cursor == entry.content.len())
}

/// Drops every entry. Part of process shutdown.
pub fn clear() {
    FILES.lock().expect("string-file cache poisoned").clear();
}
