//! Preprocessor driver: sentinel detection and external `cpp -E` expansion.
//!
//! The sentinel gate and the `preprocess:` directive both live on the first
//! line of a file, so the driver only ever needs that line to decide what to
//! do. Running the C preprocessor lets users put `#define`-style macros
//! above their code; its `#` linemarker output is stripped before the text
//! becomes the canonical input to the tokenizer.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{LjpError, Result};

/// First-line marker that opts a file into transformation.
pub const SENTINEL: &str = "--[[luajit-pro]]";

/// Replacement for line 1 of every transformed file. Starts with the
/// sentinel so re-reading transformed output is a no-op, and binds the
/// locals the rewritten loops use.
pub const SENTINEL_ALIASES: &str =
    "--[[luajit-pro]] local ipairs, _tinsert = ipairs, table.insert";

static PREPROCESS_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"preprocess:\s*(\w+)").expect("directive regex"));

/// Reads the first raw line of a file. `Ok(None)` means the file is empty.
pub fn read_first_line(path: &Path) -> Result<Option<String>> {
    let file = File::open(path).map_err(|e| LjpError::cannot_open(path, &e))?;
    let mut line = String::new();
    let read = BufReader::new(file)
        .read_line(&mut line)
        .map_err(|e| LjpError::cannot_open(path, &e))?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

pub fn has_sentinel(first_line: &str) -> bool {
    first_line.contains(SENTINEL)
}

/// `--[[luajit-pro]] preprocess: false` skips the external preprocessor.
pub fn preprocess_disabled(first_line: &str) -> bool {
    PREPROCESS_DIRECTIVE
        .captures(first_line)
        .map(|c| &c[1] == "false")
        .unwrap_or(false)
}

/// Produces the canonical input text for the tokenizer.
///
/// With preprocessing disabled the file is taken verbatim. Otherwise
/// `cpp -E` expands it and every `#`-directive line of the output is
/// dropped.
pub fn expand(path: &Path, disabled: bool) -> Result<String> {
    if disabled {
        println!(
            "[luajit-pro] preprocess is disabled in file: {}",
            path.display()
        );
        return std::fs::read_to_string(path).map_err(|e| LjpError::cannot_open(path, &e));
    }

    let command = format!("cpp -E {}", path.display());
    let output = Command::new("cpp")
        .arg("-E")
        .arg(path)
        .output()
        .map_err(|e| LjpError::PreprocessFailed {
            command: command.clone(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(LjpError::PreprocessFailed {
            command,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let mut kept: String = text
        .lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    if !kept.is_empty() {
        kept.push('\n');
    }
    Ok(kept)
}
