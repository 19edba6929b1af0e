//! The file transformation driver: preprocess, tokenize, rewrite, register.
//!
//! This is the single entry for turning a file on disk into a string-file
//! cache entry, used both by the loader adapter and recursively by the
//! `$include` pass. An in-flight set turns include cycles into a recoverable
//! error instead of unbounded recursion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::cache;
use crate::config;
use crate::errors::{LjpError, Result};
use crate::preprocess;
use crate::sidecar::SnippetEvaluator;
use crate::transform::Transformer;

/// What the driver did with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No sentinel on line 1; the host should read raw bytes.
    Passthrough,
    /// Transformed content is registered in the string-file cache.
    Transformed,
}

static IN_FLIGHT: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

struct FlightGuard(PathBuf);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT
            .lock()
            .expect("include in-flight set poisoned")
            .remove(&self.0);
    }
}

fn enter_flight(path: &Path) -> Result<FlightGuard> {
    let mut in_flight = IN_FLIGHT.lock().expect("include in-flight set poisoned");
    if !in_flight.insert(path.to_path_buf()) {
        return Err(LjpError::CircularInclude {
            path: path.to_path_buf(),
        });
    }
    Ok(FlightGuard(path.to_path_buf()))
}

/// Transforms one file end to end.
///
/// Reads the first line to decide anything at all needs doing, runs the
/// external preprocessor unless the sentinel line disables it, rewrites the
/// canonical text, persists artifacts under `LJP_KEEP_FILE=1`, and registers
/// the result in the string-file cache keyed by the original path.
pub fn transform_file(path: &Path, evaluator: &dyn SnippetEvaluator) -> Result<Outcome> {
    let _guard = enter_flight(path)?;

    let Some(first_line) = preprocess::read_first_line(path)? else {
        return Err(LjpError::EmptyFile {
            path: path.to_path_buf(),
        });
    };
    if !preprocess::has_sentinel(&first_line) {
        return Ok(Outcome::Passthrough);
    }

    let disabled = preprocess::preprocess_disabled(&first_line);
    let canonical = preprocess::expand(path, disabled)?;

    let cfg = config::config();
    let artifact_base = cfg.keep_file.then(|| {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed.lua".to_string());
        cfg.cache_dir.join(basename)
    });

    if let Some(base) = &artifact_base {
        std::fs::create_dir_all(&cfg.cache_dir)
            .map_err(|e| LjpError::cannot_open(&cfg.cache_dir, &e))?;
        let processed = with_suffix(base, &cfg.processed_suffix);
        std::fs::write(&processed, &canonical).map_err(|e| LjpError::cannot_open(&processed, &e))?;
        config::track_artifact(processed);
    }

    let mut transformer = Transformer::new(path.display().to_string(), &canonical, evaluator)?;
    transformer.run()?;
    let output = transformer.into_output();

    if let Some(base) = &artifact_base {
        let transformed = with_suffix(base, &cfg.transformed_suffix);
        std::fs::write(&transformed, &output)
            .map_err(|e| LjpError::cannot_open(&transformed, &e))?;
        config::track_artifact(transformed);
    }

    cache::register(path, output)?;
    Ok(Outcome::Transformed)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    base.with_file_name(name)
}
