//! Tokenizer for the extended Lua surface.
//!
//! This is deliberately not a Lua lexer. The rewriter only needs enough
//! structure to find the extension constructs and splice the line buffer at
//! exact byte columns, so the scanner is a flat byte walker: lines are
//! 1-based, columns are 0-based byte offsets, and every token records the
//! half-open column span it occupies.

/// Kind of a scanned token.
///
/// The five reserved words and the two `$`-forms get dedicated kinds from a
/// fixed keyword table; everything else is Identifier, Number or Symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Foreach,
    Map,
    Filter,
    ZipWithIndex,
    Return,
    Number,
    Symbol,
    CompTime,
    Include,
    Eof,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Position in the token stream, assigned sequentially.
    pub idx: usize,
    pub start_line: u32,
    pub start_col: usize,
    pub end_line: u32,
    pub end_col: usize,
}

impl Token {
    /// Shorthand for punctuation comparisons during brace matching.
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn location(&self) -> (u32, usize) {
        (self.start_line, self.start_col)
    }
}

pub struct Tokenizer<'src> {
    src: &'src [u8],
    pos: usize,
    line: u32,
    col: usize,
}

impl<'src> Tokenizer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 0,
        }
    }

    /// Scans the whole input into a finite stream terminated by one Eof token.
    pub fn tokenize(source: &'src str) -> Vec<Token> {
        let mut scanner = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let mut token = scanner.next_token();
            token.idx = tokens.len();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    /// Consumes one byte, keeping (line, column) in step.
    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(byte)
    }

    fn make(&self, kind: TokenKind, text: String, start_line: u32, start_col: usize) -> Token {
        Token {
            kind,
            text,
            idx: 0,
            start_line,
            start_col,
            end_line: self.line,
            end_col: self.col,
        }
    }

    fn next_token(&mut self) -> Token {
        loop {
            while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
                self.bump();
            }

            let (start_line, start_col) = (self.line, self.col);
            let byte = match self.peek() {
                Some(b) => b,
                None => return self.make(TokenKind::Eof, String::new(), start_line, start_col),
            };

            // `--` comments vanish entirely; `--[[ … ]]` may span lines.
            if byte == b'-' && self.peek_at(1) == Some(b'-') {
                self.bump();
                self.bump();
                if self.peek() == Some(b'[') && self.peek_at(1) == Some(b'[') {
                    self.bump();
                    self.bump();
                    while let Some(b) = self.bump() {
                        if b == b']' && self.peek() == Some(b']') {
                            self.bump();
                            break;
                        }
                    }
                } else {
                    while let Some(b) = self.bump() {
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                continue;
            }

            if byte.is_ascii_digit() {
                return self.scan_while(TokenKind::Number, start_line, start_col, |b| {
                    b.is_ascii_digit()
                });
            }

            if byte.is_ascii_alphabetic() || byte == b'_' {
                let mut token = self.scan_while(TokenKind::Identifier, start_line, start_col, |b| {
                    b.is_ascii_alphanumeric() || b == b'_'
                });
                token.kind = match token.text.as_str() {
                    "foreach" => TokenKind::Foreach,
                    "map" => TokenKind::Map,
                    "filter" => TokenKind::Filter,
                    "return" => TokenKind::Return,
                    "zipWithIndex" => TokenKind::ZipWithIndex,
                    _ => TokenKind::Identifier,
                };
                return token;
            }

            if byte == b'$' {
                self.bump();
                let mut text = String::from("$");
                while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') {
                    text.push(self.bump().unwrap() as char);
                }
                let kind = match text.as_str() {
                    "$comp_time" => TokenKind::CompTime,
                    "$include" => TokenKind::Include,
                    _ => TokenKind::Symbol,
                };
                return self.make(kind, text, start_line, start_col);
            }

            // Punctuation: one byte, except the composite `==`.
            self.bump();
            let mut text = String::from(byte as char);
            if byte == b'=' && self.peek() == Some(b'=') {
                self.bump();
                text.push('=');
            }
            return self.make(TokenKind::Symbol, text, start_line, start_col);
        }
    }

    fn scan_while(
        &mut self,
        kind: TokenKind,
        start_line: u32,
        start_col: usize,
        accept: impl Fn(u8) -> bool,
    ) -> Token {
        let mut text = String::new();
        while matches!(self.peek(), Some(b) if accept(b)) {
            text.push(self.bump().unwrap() as char);
        }
        self.make(kind, text, start_line, start_col)
    }
}
