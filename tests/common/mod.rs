#![allow(dead_code)]

//! Shared fixtures for the integration suites: a stub sidecar evaluator and
//! small file/whitespace helpers.

use std::path::{Path, PathBuf};

use ljp::SnippetEvaluator;

/// Minimal stand-in for the sidecar interpreter.
///
/// Understands exactly the two snippet shapes the transformer emits in these
/// tests: `package.searchpath` resolution for `$include` (resolved against a
/// configured root directory) and `$comp_time` bodies of the literal form
/// `return "<code>"`. Anything else is an evaluation failure, which is
/// itself useful for exercising the fatal path.
pub struct StubEvaluator {
    pub search_root: Option<PathBuf>,
}

impl StubEvaluator {
    pub fn new() -> Self {
        Self { search_root: None }
    }

    pub fn with_search_root(root: impl Into<PathBuf>) -> Self {
        Self {
            search_root: Some(root.into()),
        }
    }
}

impl SnippetEvaluator for StubEvaluator {
    fn eval_snippet(&self, _tag: &str, source: &str) -> Result<String, String> {
        let trimmed = source.trim();

        if let Some(rest) = trimmed.strip_prefix("return assert(package.searchpath(") {
            let expr = rest
                .strip_suffix(", package.path))")
                .ok_or_else(|| format!("malformed searchpath call: {trimmed}"))?;
            let name = expr.trim().trim_matches('"');
            let root = self
                .search_root
                .as_ref()
                .ok_or_else(|| "stub evaluator has no search root".to_string())?;
            return Ok(root.join(format!("{name}.lua")).display().to_string());
        }

        if let Some(rest) = trimmed.strip_prefix("return ") {
            let rest = rest.trim();
            if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
                return Ok(rest[1..rest.len() - 1].to_string());
            }
        }

        Err(format!("stub evaluator cannot run: {trimmed}"))
    }
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("fixture directory");
    }
    std::fs::write(&path, content).expect("fixture file");
    path
}

/// Collapses all whitespace runs to single spaces, for comparisons where
/// exact padding is not the point.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
