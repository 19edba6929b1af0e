//! Contract with the sidecar interpreter that runs compile-time code.
//!
//! The sidecar is an independently initialized interpreter instance owned by
//! the host glue, never the interpreter whose load is in flight; the whole
//! surface this crate sees is [`SnippetEvaluator`]. The instance is expected
//! to persist for the process, so compile-time snippets may set globals that
//! later snippets read.
//!
//! Beyond evaluation, the sidecar is expected to provide the helper surface
//! compile-time scripts rely on:
//!
//! - the current tag exposed as the global `__code_name__`;
//! - a `print` that prefixes output with the tag;
//! - `render(template, vars)` expanding `{{key}}` placeholders;
//! - a string `strip(suffix)` helper;
//! - an `env_vars` table reading through to the process environment.

use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::config;

/// Evaluates a compile-time snippet and returns the code to splice in.
///
/// `tag` identifies the snippet for diagnostics and for the sidecar's
/// `__code_name__` global. The `Err` string is the sidecar's own failure
/// message; callers turn it into a fatal `CompTimeEvalFailed`.
pub trait SnippetEvaluator {
    fn eval_snippet(&self, tag: &str, source: &str) -> Result<String, String>;
}

/// Tag for a `$comp_time` body: `<file>/compTime/<name>:<line>`.
pub fn comp_time_tag(file: &str, name: &str, line: u32) -> String {
    format!("{file}/compTime/{name}:{line}")
}

/// Tag for an `$include` resolution: `<file>/include:<line>`.
pub fn include_tag(file: &str, line: u32) -> String {
    format!("{file}/include:{line}")
}

/// Echoes generated code to stdout when `LJP_VERBOSE_DO_STRING=1`.
pub fn echo_generated(tag: &str, code: &str) {
    if !config::config().verbose_do_string {
        return;
    }
    let mut out = StandardStream::stdout(ColorChoice::Auto);
    let tagged = out
        .set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))
        .and_then(|_| write!(out, "[comp_time] {tag}"))
        .and_then(|_| out.reset())
        .is_ok();
    if tagged {
        println!("\n{code}");
    } else {
        println!("[comp_time] {tag}\n{code}");
    }
}
