//! Loader-side source transformer for the `--[[luajit-pro]]` dialect.
//!
//! Files opting in through the first-line sentinel are rewritten into plain
//! Lua at load time: functional-collection chains (`foreach`/`map`/`filter`
//! with `zipWithIndex` variants) become `ipairs` loops, `$comp_time` blocks
//! run in a sidecar interpreter and splice their returned code back in, and
//! `$include` inlines a module's comment-stripped source. Rewrites preserve
//! line numbers, so the host parser's diagnostics keep pointing near the
//! original code.
//!
//! The host loader drives everything through [`LoaderReader`], the
//! pull-based reader contract; the sidecar interpreter is abstracted behind
//! [`SnippetEvaluator`].

pub mod cache;
pub mod config;
pub mod errors;
pub mod loader;
pub mod pipeline;
pub mod preprocess;
pub mod searcher;
pub mod sidecar;
pub mod token;
pub mod transform;

pub use errors::{LjpError, Result};
pub use loader::LoaderReader;
pub use pipeline::{transform_file, Outcome};
pub use sidecar::SnippetEvaluator;

/// Tears down process-wide state: drops string-file cache entries and
/// removes temp artifacts plus the cache directory (kept under
/// `LJP_KEEP_FILE=1`).
pub fn shutdown() {
    cache::clear();
    config::remove_artifacts();
}
