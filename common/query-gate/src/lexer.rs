//! Minimal GoogleSQL lexer
//!
//! Splits query text into byte-addressed tokens so the validator can skip
//! comments and literals and rewrite a LIMIT in place. This is not a parser:
//! it only knows enough about quoting to tell code from data.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted keyword or identifier
    Word,
    /// Backtick-quoted identifier
    QuotedIdent,
    /// String or bytes literal, any quoting style
    Literal,
    Number,
    Punct,
    Comment,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the token in the lexed input
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }

    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Comment | TokenKind::Whitespace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unterminated quoted identifier starting at offset {0}")]
    UnterminatedIdentifier(usize),

    #[error("unterminated block comment starting at offset {0}")]
    UnterminatedComment(usize),
}

/// Tokenize `sql` into a lossless token stream (concatenating every token's
/// text reproduces the input).
pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, LexError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let b = bytes[pos];

        let kind = if b.is_ascii_whitespace() {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            TokenKind::Whitespace
        } else if b == b'#' || (b == b'-' && bytes.get(pos + 1) == Some(&b'-')) {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            TokenKind::Comment
        } else if b == b'/' && bytes.get(pos + 1) == Some(&b'*') {
            match sql[pos + 2..].find("*/") {
                Some(idx) => pos += 2 + idx + 2,
                None => return Err(LexError::UnterminatedComment(start)),
            }
            TokenKind::Comment
        } else if b == b'`' {
            pos = scan_quoted(bytes, pos + 1, b'`', false)
                .ok_or(LexError::UnterminatedIdentifier(start))?;
            TokenKind::QuotedIdent
        } else if b == b'\'' || b == b'"' {
            pos = scan_literal(bytes, pos, false).ok_or(LexError::UnterminatedString(start))?;
            TokenKind::Literal
        } else if let Some(quote_at) = literal_prefix(bytes, pos) {
            let raw = bytes[pos..quote_at].iter().any(|c| c.eq_ignore_ascii_case(&b'r'));
            pos = scan_literal(bytes, quote_at, raw).ok_or(LexError::UnterminatedString(start))?;
            TokenKind::Literal
        } else if b.is_ascii_digit()
            || (b == b'.' && bytes.get(pos + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            pos = scan_number(bytes, pos);
            TokenKind::Number
        } else if b.is_ascii_alphabetic() || b == b'_' || b >= 0x80 {
            let end = scan_word(sql, pos);
            if end == pos {
                // Non-alphanumeric unicode symbol
                pos += sql[pos..].chars().next().map_or(1, char::len_utf8);
                TokenKind::Punct
            } else {
                pos = end;
                TokenKind::Word
            }
        } else {
            pos += 1;
            TokenKind::Punct
        };

        tokens.push(Token {
            kind,
            text: &sql[start..pos],
            start,
        });
    }

    Ok(tokens)
}

/// Tokens that carry meaning (no comments or whitespace)
pub fn meaningful<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t Token<'a>> {
    tokens.iter().filter(|t| !t.is_trivia()).collect()
}

/// If `pos` starts an `r`/`b`/`rb`/`br` literal prefix, return the quote offset
fn literal_prefix(bytes: &[u8], pos: usize) -> Option<usize> {
    let is_prefix = |c: u8| matches!(c.to_ascii_lowercase(), b'r' | b'b');
    let is_quote = |c: u8| c == b'\'' || c == b'"';

    let first = *bytes.get(pos)?;
    if !is_prefix(first) {
        return None;
    }
    // Prefix must not continue a previous word
    if pos > 0 && is_word_byte(bytes[pos - 1]) {
        return None;
    }
    match bytes.get(pos + 1) {
        Some(&c) if is_quote(c) => Some(pos + 1),
        Some(&c) if is_prefix(c) && !c.eq_ignore_ascii_case(&first) => {
            bytes.get(pos + 2).filter(|&&q| is_quote(q)).map(|_| pos + 2)
        }
        _ => None,
    }
}

/// Scan a single-, double- or triple-quoted literal starting at the opening
/// quote. Returns the offset just past the closing quote.
fn scan_literal(bytes: &[u8], pos: usize, raw: bool) -> Option<usize> {
    let quote = bytes[pos];
    let triple = bytes.get(pos + 1) == Some(&quote) && bytes.get(pos + 2) == Some(&quote);
    if !triple {
        return scan_quoted(bytes, pos + 1, quote, raw);
    }

    let mut i = pos + 3;
    while i < bytes.len() {
        if bytes[i] == b'\\' && !raw {
            i += 2;
            continue;
        }
        if bytes[i] == quote && bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote) {
            return Some(i + 3);
        }
        i += 1;
    }
    None
}

/// Scan until an unescaped `quote`; `i` is just past the opening quote
fn scan_quoted(bytes: &[u8], mut i: usize, quote: u8, raw: bool) -> Option<usize> {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if !raw => i += 2,
            b'\n' if quote != b'`' => return None,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    let hex = bytes[i] == b'0' && bytes.get(i + 1).is_some_and(|c| c.eq_ignore_ascii_case(&b'x'));
    while i < bytes.len() {
        let c = bytes[i];
        let exponent_sign = !hex
            && (c == b'+' || c == b'-')
            && i > 0
            && bytes[i - 1].eq_ignore_ascii_case(&b'e');
        if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' || exponent_sign {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn scan_word(sql: &str, pos: usize) -> usize {
    sql[pos..]
        .char_indices()
        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_'))
        .map(|(idx, _)| pos + idx)
        .unwrap_or(sql.len())
}

fn is_word_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}
