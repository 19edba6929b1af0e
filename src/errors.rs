//! Unified error type for every failure mode of the transformation pipeline.
//!
//! Most kinds are fatal by design: a rewriter that carries on past a
//! malformed construct would hand the host a silently corrupted program.
//! The only recoverable kinds are the ones an `$include` site can absorb by
//! rewriting itself into an error comment.

use std::path::PathBuf;

use miette::Diagnostic;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// All failure modes of the loader-side transformer.
#[derive(Debug, Error, Diagnostic)]
pub enum LjpError {
    #[error("cannot open {}: {reason}", path.display())]
    #[diagnostic(code(ljp::cannot_open))]
    CannotOpen { path: PathBuf, reason: String },

    #[error("file is empty: {}", path.display())]
    #[diagnostic(code(ljp::empty_file))]
    EmptyFile { path: PathBuf },

    #[error("unexpected token `{found}` at {line}:{column}")]
    #[diagnostic(code(ljp::unexpected_token))]
    UnexpectedToken {
        found: String,
        line: u32,
        column: usize,
        #[help]
        help: Option<String>,
    },

    #[error("unmatched brace: block opened at {line}:{column} is still open at end of file")]
    #[diagnostic(code(ljp::unmatched_brace))]
    UnmatchedBrace { line: u32, column: usize },

    #[error("`{construct}` block starting at line {line} has no `return`")]
    #[diagnostic(
        code(ljp::missing_return),
        help("lambda-form map/filter bodies must contain `return <expr>`")
    )]
    MissingReturn { construct: &'static str, line: u32 },

    #[error("compile-time evaluation failed for {tag}: {message}")]
    #[diagnostic(code(ljp::comp_time_eval))]
    CompTimeEvalFailed {
        tag: String,
        message: String,
        /// The snippet that failed, echoed so the user can see what ran.
        snippet: String,
    },

    #[error("duplicate cache registration for {}", path.display())]
    #[diagnostic(code(ljp::duplicate_register))]
    DuplicateRegister { path: PathBuf },

    #[error("circular include of {}", path.display())]
    #[diagnostic(code(ljp::circular_include))]
    CircularInclude { path: PathBuf },

    #[error("preprocessor invocation failed ({command}): {reason}")]
    #[diagnostic(
        code(ljp::preprocess),
        help("install a C preprocessor or add `preprocess: false` to the sentinel line")
    )]
    PreprocessFailed { command: String, reason: String },

    #[error("internal error: {message}")]
    #[diagnostic(code(ljp::internal))]
    Internal { message: String },
}

impl LjpError {
    pub fn cannot_open(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::CannotOpen {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn unexpected(found: &str, line: u32, column: usize) -> Self {
        Self::UnexpectedToken {
            found: found.to_string(),
            line,
            column,
            help: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether an `$include` site may absorb this error as an error comment
    /// instead of aborting the whole load.
    pub fn is_recoverable_include(&self) -> bool {
        matches!(
            self,
            Self::EmptyFile { .. } | Self::CannotOpen { .. } | Self::CircularInclude { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LjpError>;

/// Prints a tagged warning to stdout, magenta like the reference tool.
///
/// Falls back to plain text when the stream rejects color.
pub fn print_warning(message: &str) {
    use std::io::Write;

    let mut out = StandardStream::stdout(ColorChoice::Auto);
    let tagged = out
        .set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))
        .and_then(|_| write!(out, "[luajit-pro] [warning]"))
        .and_then(|_| out.reset())
        .is_ok();
    if tagged {
        println!(" {message}");
    } else {
        println!("[luajit-pro] [warning] {message}");
    }
}

/// Prints an error with full miette diagnostics to stderr.
pub fn print_error(error: LjpError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
