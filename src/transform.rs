//! The multi-pass, token-positional rewriter.
//!
//! One transformer instance is scoped to one file. It owns the token stream
//! and a 1-indexed line buffer; every pass mutates the buffer in place at
//! exact byte columns while the token stream stays frozen, so spans recorded
//! at scan time keep meaning something. The line count never changes: a
//! construct that spans several source lines leaves `--[[line keeper]]`
//! comments behind, and body-start lines are left-padded back to their
//! original column, so downstream parser errors still point near the user's
//! code.
//!
//! Dedup is keyed by the receiver token's (line, column) pair. A construct
//! is marked processed before its interior is descended into, and mutated at
//! most once.

use std::collections::HashSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cache;
use crate::errors::{print_warning, LjpError, Result};
use crate::pipeline;
use crate::preprocess::{SENTINEL, SENTINEL_ALIASES};
use crate::sidecar::{self, SnippetEvaluator};
use crate::token::{Token, TokenKind, Tokenizer};

/// Substituted into deleted source lines to preserve line numbering.
pub const LINE_KEEPER: &str = "--[[line keeper]]";

/// Replaces an `$include` whose target is missing, empty or cyclic.
pub const INCLUDE_ERROR: &str = "--[[include file error or empty]]";

// ============================================================================
// CHAIN CLASSIFICATION - shared by the foreach/map/filter passes
// ============================================================================

/// Syntactic shape of a `T.<keyword>{ … }` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainShape {
    /// `T.kw{ x => BODY }`
    Lambda,
    /// `T.kw{ F }` with a function reference
    Simple,
    /// `T.kw.zipWithIndex{ (x, i) => BODY }`
    KeywordZip,
    /// `T.zipWithIndex.kw{ (i, x) => BODY }`
    ZipKeyword,
}

/// Tokens participating in one chain construct.
struct ChainBindings {
    shape: ChainShape,
    /// Assignment target, present for map/filter.
    ret: Option<Token>,
    /// Receiver; its (line, column) keys deduplication.
    tbl: Token,
    /// Element binder name (`ref` for the Simple shape).
    reference: String,
    /// Index binder name (`_` unless zipWithIndex binds one).
    index: String,
    /// Function reference, Simple shape only.
    func: Option<Token>,
    body_start: Token,
    /// Stream index of the opening `{`.
    open_idx: usize,
}

/// What the brace scan re-enters on nested blocks. `foreach` descends
/// through the whole dispatcher; map and filter only through themselves.
#[derive(Debug, Clone, Copy)]
enum Descend {
    Everything,
    MapOnly,
    FilterOnly,
    Nothing,
}

pub struct Transformer<'ev> {
    file_name: String,
    lines: Vec<String>,
    tokens: Vec<Token>,
    processed: HashSet<(u32, usize)>,
    replaced: HashSet<(u32, usize)>,
    evaluator: &'ev dyn SnippetEvaluator,
}

impl<'ev> Transformer<'ev> {
    /// Builds a transformer over canonical (already preprocessed) text.
    ///
    /// Line 1 must carry the sentinel; it is replaced by the alias header
    /// that rebinds `ipairs` and `_tinsert` for the rewritten loops.
    pub fn new(
        file_name: String,
        content: &str,
        evaluator: &'ev dyn SnippetEvaluator,
    ) -> Result<Self> {
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let Some(first) = lines.first() else {
            return Err(LjpError::EmptyFile {
                path: PathBuf::from(&file_name),
            });
        };
        if !first.contains(SENTINEL) {
            return Err(LjpError::internal(format!(
                "canonical text of {file_name} lost its sentinel line"
            )));
        }
        lines[0] = SENTINEL_ALIASES.to_string();

        let tokens = Tokenizer::tokenize(content);
        Ok(Self {
            file_name,
            lines,
            tokens,
            processed: HashSet::new(),
            replaced: HashSet::new(),
            evaluator,
        })
    }

    /// Runs every pass over the whole stream, in token order.
    pub fn run(&mut self) -> Result<()> {
        self.dispatch(0)
    }

    /// Joins the line buffer back into file content, one trailing newline
    /// per line.
    pub fn into_output(self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    // ========================================================================
    // DISPATCHER
    // ========================================================================

    fn dispatch(&mut self, from: usize) -> Result<()> {
        let mut i = from;
        while let Some(token) = self.tokens.get(i) {
            match token.kind {
                TokenKind::Eof => return Ok(()),
                TokenKind::Foreach => self.run_foreach(i)?,
                TokenKind::Map => self.run_map(i)?,
                TokenKind::Filter => self.run_filter(i)?,
                TokenKind::CompTime => self.run_comp_time(i)?,
                TokenKind::Include => self.run_include(i)?,
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    // ========================================================================
    // TOKEN ACCESS
    // ========================================================================

    fn tok(&self, i: usize) -> Result<&Token> {
        self.tokens.get(i).ok_or_else(|| {
            let last = self.tokens.last().expect("token stream is never empty");
            LjpError::unexpected("<eof>", last.start_line, last.start_col)
        })
    }

    fn tok_back(&self, i: usize, offset: usize) -> Result<&Token> {
        let at = self.tok(i)?;
        match i.checked_sub(offset) {
            Some(j) => Ok(&self.tokens[j]),
            None => Err(LjpError::unexpected(&at.text, at.start_line, at.start_col)),
        }
    }

    /// Advances from `from` to the next token of `kind`; `None` at Eof.
    fn seek_kind(&self, from: usize, kind: TokenKind) -> Option<usize> {
        let mut i = from;
        loop {
            let token = self.tokens.get(i)?;
            if token.kind == TokenKind::Eof {
                return None;
            }
            if token.kind == kind {
                return Some(i);
            }
            i += 1;
        }
    }

    /// Walks a balanced `open`…`close` region starting at the opening token,
    /// descending into nested blocks per `descend`. Returns the stream index
    /// of the matching closer.
    fn scan_delimited(
        &mut self,
        open_idx: usize,
        open: &str,
        close: &str,
        descend: Descend,
    ) -> Result<usize> {
        let opener = self.tok(open_idx)?;
        if !opener.is(open) {
            return Err(LjpError::unexpected(
                &opener.text,
                opener.start_line,
                opener.start_col,
            ));
        }
        let (open_line, open_col) = opener.location();

        let mut depth = 0usize;
        let mut i = open_idx;
        loop {
            let token = self.tok(i)?;
            if token.kind == TokenKind::Eof {
                return Err(LjpError::UnmatchedBrace {
                    line: open_line,
                    column: open_col,
                });
            }
            if token.is(close) {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            } else if token.is(open) {
                depth += 1;
                match descend {
                    Descend::Everything => self.dispatch(i + 1)?,
                    Descend::MapOnly => self.run_map(i + 1)?,
                    Descend::FilterOnly => self.run_filter(i + 1)?,
                    Descend::Nothing => {}
                }
            }
            i += 1;
        }
    }

    /// Classifies the chain around the keyword at `k` and binds its tokens.
    fn classify_chain(&self, k: usize, with_ret: bool) -> Result<ChainBindings> {
        let before = self.tok_back(k, 2)?;
        let shape = match before.kind {
            TokenKind::Identifier => {
                let inside = self.tok(k + 2)?;
                if inside.kind == TokenKind::ZipWithIndex {
                    ChainShape::KeywordZip
                } else if inside.kind == TokenKind::Identifier && self.tok(k + 3)?.is("}") {
                    ChainShape::Simple
                } else {
                    ChainShape::Lambda
                }
            }
            TokenKind::ZipWithIndex => ChainShape::ZipKeyword,
            _ => {
                return Err(LjpError::unexpected(
                    &before.text,
                    before.start_line,
                    before.start_col,
                ))
            }
        };

        let (tbl, reference, index, func, body_start, open_idx) = match shape {
            ChainShape::Lambda => {
                let tbl = self.tok_back(k, 2)?.clone();
                let binder = self.tok(k + 2)?.clone();
                let body = self.tok(k + 5)?.clone();
                (tbl, binder.text, "_".to_string(), None, body, k + 1)
            }
            ChainShape::Simple => {
                let tbl = self.tok_back(k, 2)?.clone();
                let func = self.tok(k + 2)?.clone();
                (
                    tbl,
                    "ref".to_string(),
                    "_".to_string(),
                    Some(func.clone()),
                    func,
                    k + 1,
                )
            }
            ChainShape::KeywordZip => {
                let tbl = self.tok_back(k, 2)?.clone();
                let binder = self.tok(k + 5)?.clone();
                let index = self.tok(k + 7)?.clone();
                let body = self.tok(k + 11)?.clone();
                (tbl, binder.text, index.text, None, body, k + 3)
            }
            ChainShape::ZipKeyword => {
                let tbl = self.tok_back(k, 4)?.clone();
                let index = self.tok(k + 3)?.clone();
                let binder = self.tok(k + 5)?.clone();
                let body = self.tok(k + 9)?.clone();
                (tbl, binder.text, index.text, None, body, k + 1)
            }
        };

        let ret = if with_ret {
            let offset = match shape {
                ChainShape::ZipKeyword => 6,
                _ => 4,
            };
            Some(self.tok_back(k, offset)?.clone())
        } else {
            None
        };

        Ok(ChainBindings {
            shape,
            ret,
            tbl,
            reference,
            index,
            func,
            body_start,
            open_idx,
        })
    }

    /// Scans backward from the closing brace for the block's `return`.
    /// Reaching the receiver first means the body has none.
    fn find_return_before(
        &self,
        rb_idx: usize,
        tbl: &Token,
        construct: &'static str,
    ) -> Result<Token> {
        let mut i = rb_idx;
        loop {
            let token = &self.tokens[i];
            if token.kind == TokenKind::Return {
                return Ok(token.clone());
            }
            if token.idx == tbl.idx || i == 0 {
                return Err(LjpError::MissingReturn {
                    construct,
                    line: tbl.start_line,
                });
            }
            i -= 1;
        }
    }

    // ========================================================================
    // LINE BUFFER SPLICING
    // ========================================================================

    fn line_mut(&mut self, n: u32) -> &mut String {
        &mut self.lines[(n - 1) as usize]
    }

    fn set_line(&mut self, n: u32, text: impl Into<String>) {
        *self.line_mut(n) = text.into();
    }

    fn append_to_line(&mut self, n: u32, text: &str) {
        self.line_mut(n).push_str(text);
    }

    /// Replaces everything from byte `col` to the end of the line.
    fn replace_to_end(&mut self, n: u32, col: usize, text: &str) {
        let line = self.line_mut(n);
        let col = col.min(line.len());
        line.truncate(col);
        line.push_str(text);
    }

    /// Replaces the byte span `[start, end)` on line `n`.
    fn replace_cols(&mut self, n: u32, start: usize, end: usize, text: &str) {
        let line = self.line_mut(n);
        let start = start.min(line.len());
        let end = end.clamp(start, line.len());
        line.replace_range(start..end, text);
    }

    /// Keeps the prefix `[0, col)` of the head line and swaps in `text`.
    fn rewrite_head_line(&mut self, n: u32, col: usize, text: &str) {
        let line = self.line_mut(n);
        let col = col.min(line.len());
        line.truncate(col);
        line.push_str(text);
    }

    /// Line-keeper discipline for a multi-line span: intermediate lines are
    /// blanked to the keeper comment, the body-start line is left-padded
    /// back to its original column.
    fn keep_lines_until_body(&mut self, from_line: u32, body_start: &Token) {
        for i in from_line..=body_start.start_line {
            if i == body_start.start_line {
                let pad = " ".repeat(body_start.start_col);
                self.replace_cols(i, 0, body_start.start_col, &pad);
            } else {
                self.set_line(i, LINE_KEEPER);
            }
        }
    }

    /// Text between the end of `a`'s span and the start of `b`'s span, read
    /// from the current (possibly already mutated) line buffer.
    fn content_between(&self, a: &Token, b: &Token) -> String {
        if a.start_line == b.start_line {
            let line = &self.lines[(a.start_line - 1) as usize];
            let start = a.end_col.min(line.len());
            let end = b.start_col.clamp(start, line.len());
            return line[start..end].to_string();
        }
        let mut out = String::new();
        for i in a.start_line..=b.start_line {
            let line = &self.lines[(i - 1) as usize];
            if i == a.start_line {
                out.push_str(&line[a.end_col.min(line.len())..]);
            } else if i == b.start_line {
                out.push_str(&line[..b.start_col.min(line.len())]);
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        out
    }

    // ========================================================================
    // FOREACH PASS
    // ========================================================================

    fn run_foreach(&mut self, from: usize) -> Result<()> {
        let Some(k) = self.seek_kind(from, TokenKind::Foreach) else {
            return Ok(());
        };

        let b = self.classify_chain(k, false)?;
        let key = b.tbl.location();
        if self.processed.contains(&key) {
            return Ok(());
        }
        self.processed.insert(key);

        let rb_idx = self.scan_delimited(b.open_idx, "{", "}", Descend::Everything)?;
        let rb = self.tokens[rb_idx].clone();

        if self.replaced.contains(&key) {
            return Ok(());
        }
        self.replaced.insert(key);

        let head = format!(
            "for {}, {} in ipairs({}) do ",
            b.index, b.reference, b.tbl.text
        );
        self.replace_to_end(rb.start_line, rb.start_col, "end");
        if let Some(func) = &b.func {
            let call = format!("{}({}) ", func.text, b.reference);
            self.replace_cols(func.start_line, func.start_col, func.end_col, &call);
        }

        if b.tbl.start_line == b.body_start.start_line {
            self.replace_cols(
                b.tbl.start_line,
                b.tbl.start_col,
                b.body_start.start_col,
                &head,
            );
        } else {
            self.set_line(b.tbl.start_line, head);
            self.keep_lines_until_body(b.tbl.start_line + 1, &b.body_start);
        }
        Ok(())
    }

    // ========================================================================
    // MAP PASS
    // ========================================================================

    fn run_map(&mut self, from: usize) -> Result<()> {
        let Some(k) = self.seek_kind(from, TokenKind::Map) else {
            return Ok(());
        };

        let b = self.classify_chain(k, true)?;
        let key = b.tbl.location();
        if self.processed.contains(&key) {
            return Ok(());
        }
        self.processed.insert(key);

        let rb_idx = self.scan_delimited(b.open_idx, "{", "}", Descend::MapOnly)?;
        let rb = self.tokens[rb_idx].clone();
        let ret_tok = if b.shape == ChainShape::Simple {
            None
        } else {
            Some(self.find_return_before(rb_idx, &b.tbl, "map")?)
        };

        if self.replaced.contains(&key) {
            return Ok(());
        }
        self.replaced.insert(key);

        let ret = b.ret.as_ref().expect("map always binds a target");
        let head = format!(
            "{} = {{}}; for {}, {} in ipairs({}) do ",
            ret.text, b.index, b.reference, b.tbl.text
        );

        self.replace_to_end(rb.start_line, rb.start_col, ") end");
        let same_line = b.tbl.start_line == b.body_start.start_line;
        if !same_line {
            self.rewrite_head_line(b.tbl.start_line, ret.start_col, &head);
        }
        if let Some(func) = &b.func {
            let call = format!("_tinsert({}, {}({}) ", ret.text, func.text, b.reference);
            self.replace_cols(func.start_line, func.start_col, func.end_col, &call);
        } else {
            let return_tok = ret_tok.expect("non-simple map located its return");
            let insert = format!("_tinsert({},", ret.text);
            self.replace_cols(
                return_tok.start_line,
                return_tok.start_col,
                return_tok.end_col,
                &insert,
            );
        }
        if same_line {
            self.replace_cols(
                b.tbl.start_line,
                ret.start_col,
                b.body_start.start_col,
                &head,
            );
        } else {
            self.keep_lines_until_body(b.tbl.start_line + 1, &b.body_start);
        }
        Ok(())
    }

    // ========================================================================
    // FILTER PASS
    // ========================================================================

    fn run_filter(&mut self, from: usize) -> Result<()> {
        let Some(k) = self.seek_kind(from, TokenKind::Filter) else {
            return Ok(());
        };

        let b = self.classify_chain(k, true)?;
        let key = b.tbl.location();
        if self.processed.contains(&key) {
            return Ok(());
        }
        self.processed.insert(key);

        let rb_idx = self.scan_delimited(b.open_idx, "{", "}", Descend::FilterOnly)?;
        let rb = self.tokens[rb_idx].clone();
        let ret_tok = if b.shape == ChainShape::Simple {
            None
        } else {
            Some(self.find_return_before(rb_idx, &b.tbl, "filter")?)
        };

        if self.replaced.contains(&key) {
            return Ok(());
        }
        self.replaced.insert(key);

        let ret = b.ret.as_ref().expect("filter always binds a target");
        let head = format!(
            "{} = {{}}; for {}, {} in ipairs({}) do ",
            ret.text, b.index, b.reference, b.tbl.text
        );
        let same_line = b.tbl.start_line == b.body_start.start_line;

        match (&b.func, same_line) {
            (Some(func), true) => {
                self.replace_to_end(rb.start_line, rb.start_col, ") end end");
                let guard = format!(
                    "if {}({}) then _tinsert({}, {}",
                    func.text, b.reference, ret.text, b.reference
                );
                self.replace_cols(func.start_line, func.start_col, func.end_col, &guard);
                self.replace_cols(
                    b.tbl.start_line,
                    ret.start_col,
                    b.body_start.start_col,
                    &head,
                );
            }
            (None, true) => {
                let closer = format!(" then _tinsert({}, {}) end end", ret.text, b.reference);
                self.replace_to_end(rb.start_line, rb.start_col, &closer);
                let return_tok = ret_tok.expect("non-simple filter located its return");
                self.replace_cols(
                    return_tok.start_line,
                    return_tok.start_col,
                    return_tok.end_col,
                    "if",
                );
                self.replace_cols(
                    b.tbl.start_line,
                    ret.start_col,
                    b.body_start.start_col,
                    &head,
                );
            }
            (Some(func), false) => {
                self.replace_to_end(rb.start_line, rb.start_col, "end");
                self.rewrite_head_line(b.tbl.start_line, ret.start_col, &head);
                let guard = format!(
                    "if {}({}) then _tinsert({}, {}) end",
                    func.text, b.reference, ret.text, b.reference
                );
                self.replace_cols(func.start_line, func.start_col, func.end_col, &guard);
                self.keep_lines_until_body(b.tbl.start_line + 1, &b.body_start);
            }
            (None, false) => {
                let closer = format!(" then _tinsert({}, {}) end end", ret.text, b.reference);
                self.replace_cols(rb.start_line, rb.start_col, rb.end_col, &closer);
                self.rewrite_head_line(b.tbl.start_line, ret.start_col, &head);
                let return_tok = ret_tok.expect("non-simple filter located its return");
                self.replace_cols(
                    return_tok.start_line,
                    return_tok.start_col,
                    return_tok.end_col,
                    "if",
                );
                self.keep_lines_until_body(b.tbl.start_line + 1, &b.body_start);
            }
        }
        Ok(())
    }

    // ========================================================================
    // COMP_TIME PASS
    // ========================================================================

    fn run_comp_time(&mut self, from: usize) -> Result<()> {
        let Some(k) = self.seek_kind(from, TokenKind::CompTime) else {
            return Ok(());
        };
        let ct = self.tokens[k].clone();
        let key = ct.location();
        if self.processed.contains(&key) {
            return Ok(());
        }

        // Optional `(name)` between the keyword and the block.
        let mut i = k;
        let name = if self.tok(k + 1)?.is("(") {
            let name_tok = self.tok(k + 2)?.clone();
            if name_tok.kind != TokenKind::Identifier {
                return Err(LjpError::UnexpectedToken {
                    found: name_tok.text,
                    line: name_tok.start_line,
                    column: name_tok.start_col,
                    help: Some("$comp_time names must be a single identifier".to_string()),
                });
            }
            let closer = self.tok(k + 3)?;
            if !closer.is(")") {
                return Err(LjpError::unexpected(
                    &closer.text,
                    closer.start_line,
                    closer.start_col,
                ));
            }
            i = k + 3;
            name_tok.text
        } else {
            "Unknown".to_string()
        };

        i += 1;
        let rb_idx = self.scan_delimited(i, "{", "}", Descend::Nothing)?;
        let open = self.tokens[i].clone();
        let rb = self.tokens[rb_idx].clone();
        self.processed.insert(key);

        let body = self.content_between(&open, &rb);
        let tag = sidecar::comp_time_tag(&self.file_name, &name, ct.start_line);
        let code = self
            .evaluator
            .eval_snippet(&tag, &body)
            .map_err(|message| LjpError::CompTimeEvalFailed {
                tag: tag.clone(),
                message,
                snippet: body.clone(),
            })?;
        sidecar::echo_generated(&tag, &code);

        if self.replaced.contains(&key) {
            return Ok(());
        }
        self.replaced.insert(key);

        for line in ct.start_line..=rb.start_line {
            self.set_line(line, format!("{LINE_KEEPER} "));
        }
        self.set_line(ct.start_line, "--[[comp_time]] ");
        self.append_to_line(open.start_line, &code);
        Ok(())
    }

    // ========================================================================
    // INCLUDE PASS
    // ========================================================================

    fn run_include(&mut self, from: usize) -> Result<()> {
        let Some(k) = self.seek_kind(from, TokenKind::Include) else {
            return Ok(());
        };
        let inc = self.tokens[k].clone();
        let key = inc.location();
        if self.processed.contains(&key) {
            return Ok(());
        }

        let rp_idx = self.scan_delimited(k + 1, "(", ")", Descend::Nothing)?;
        let lp = self.tokens[k + 1].clone();
        let rp = self.tokens[rp_idx].clone();
        if lp.start_line != rp.start_line {
            return Err(LjpError::UnexpectedToken {
                found: rp.text,
                line: rp.start_line,
                column: rp.start_col,
                help: Some("$include(...) must open and close on one line".to_string()),
            });
        }
        self.processed.insert(key);

        let pkg_expr = self.content_between(&lp, &rp);
        let tag = sidecar::include_tag(&self.file_name, inc.start_line);
        let resolver = format!("return assert(package.searchpath({pkg_expr}, package.path))");
        let include_file = self
            .evaluator
            .eval_snippet(&tag, &resolver)
            .map_err(|message| LjpError::CompTimeEvalFailed {
                tag: tag.clone(),
                message,
                snippet: resolver.clone(),
            })?;
        let include_path = PathBuf::from(include_file.trim());

        match pipeline::transform_file(&include_path, self.evaluator) {
            Ok(_) => {}
            Err(e) if e.is_recoverable_include() => {
                print_warning(&format!(
                    "unable to include {}, check if this file is empty ({e})",
                    include_path.display()
                ));
                self.set_line(lp.start_line, INCLUDE_ERROR);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let content = match cache::content(&include_path) {
            Some(cached) => cached,
            None => std::fs::read_to_string(&include_path)
                .map_err(|e| LjpError::cannot_open(&include_path, &e))?,
        };
        if content.is_empty() {
            print_warning(&format!(
                "included file is empty: {}",
                include_path.display()
            ));
            self.set_line(lp.start_line, INCLUDE_ERROR);
            return Ok(());
        }
        let inlined = strip_comments_joined(&content);

        if self.replaced.contains(&key) {
            return Ok(());
        }
        self.replaced.insert(key);
        self.set_line(lp.start_line, inlined);
        Ok(())
    }
}

// ============================================================================
// COMMENT STRIPPING - for inlined includes
// ============================================================================

static MULTI_LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--\[\[[\s\S]*?\]\]").expect("multi-line comment regex"));
static SINGLE_LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("single-line comment regex"));

/// Strips Lua comments line by line and joins everything on single spaces,
/// producing the one-liner an `$include` collapses into.
fn strip_comments_joined(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        let no_long = MULTI_LINE_COMMENT.replace_all(line, "");
        let stripped = SINGLE_LINE_COMMENT.replace_all(&no_long, "");
        out.push_str(&stripped);
        out.push(' ');
    }
    out
}
