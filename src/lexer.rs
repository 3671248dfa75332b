use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    /// Numeric literal kept verbatim, including any type suffix.
    Number(String),
    String { value: String, quote: char },
    Boolean(bool),
    Temporal { kind: TemporalKind, value: String },
    Parameter(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    NotEq,
    Less,
    Le,
    Greater,
    Ge,
    Eof,
}

/// JDBC escape kinds for `{d '...'}`, `{t '...'}` and `{ts '...'}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalKind {
    Date,
    Time,
    Timestamp,
}

impl TemporalKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"d" | b"D" => Some(TemporalKind::Date),
            b"t" | b"T" => Some(TemporalKind::Time),
            b"ts" | b"TS" | b"Ts" | b"tS" => Some(TemporalKind::Timestamp),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            TemporalKind::Date => "d",
            TemporalKind::Time => "t",
            TemporalKind::Timestamp => "ts",
        }
    }

    fn validate(self, value: &str) -> bool {
        match self {
            TemporalKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            TemporalKind::Time => NaiveTime::parse_from_str(value, "%H:%M:%S%.f").is_ok(),
            TemporalKind::Timestamp => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok(),
        }
    }
}

impl Token {
    /// Canonical source text of a literal token, as it appears in rendered output.
    pub fn literal_text(&self) -> Option<String> {
        match self {
            Token::Number(n) => Some(n.clone()),
            Token::String { value, quote } => Some(quote_string(value, *quote)),
            Token::Boolean(b) => Some(b.to_string()),
            Token::Temporal { kind, value } => Some(format!("{{{} '{}'}}", kind.tag(), value)),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Identifier(s) if s.eq_ignore_ascii_case(keyword))
    }
}

pub fn quote_string(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out.push(quote);
    out
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(_) | Token::String { .. } | Token::Boolean(_) | Token::Temporal { .. } => {
                f.write_str(&self.literal_text().unwrap_or_default())
            }
            Token::Identifier(s) => f.write_str(s),
            Token::Parameter(p) => write!(f, ":{}", p),
            Token::Dot => f.write_str("."),
            Token::Comma => f.write_str(","),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Eq => f.write_str("="),
            Token::NotEq => f.write_str("<>"),
            Token::Less => f.write_str("<"),
            Token::Le => f.write_str("<="),
            Token::Greater => f.write_str(">"),
            Token::Ge => f.write_str(">="),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl LexError {
    fn new<M: Into<String>>(message: M, position: usize) -> Self {
        Self { message: message.into(), position }
    }
}

#[derive(Clone)]
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    last_start: usize,
    last_end: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            last_start: 0,
            last_end: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.input[start..end]).into_owned()
    }

    fn is_ident_start(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
    }

    fn is_ident_part(c: u8) -> bool {
        Self::is_ident_start(c) || c.is_ascii_digit()
    }

    fn number(&mut self, start: usize) -> Result<Token, LexError> {
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        // Only a dot followed by a digit continues the literal; `1.abc` is not a number.
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(b'0'..=b'9')) {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        // Type suffixes: L, F, D, BI, BD
        match (self.peek(), self.peek_at(1)) {
            (Some(b'b' | b'B'), Some(b'i' | b'I' | b'd' | b'D')) => self.pos += 2,
            (Some(b'l' | b'L' | b'f' | b'F' | b'd' | b'D'), _) => self.pos += 1,
            _ => {}
        }
        if matches!(self.peek(), Some(c) if Self::is_ident_part(c)) {
            return Err(LexError::new("Invalid numeric literal", start));
        }
        self.last_start = start;
        self.last_end = self.pos;
        Ok(Token::Number(self.text(start, self.pos)))
    }

    fn identifier(&mut self, start: usize) -> Token {
        while matches!(self.peek(), Some(c) if Self::is_ident_part(c)) {
            self.pos += 1;
        }
        let s = self.text(start, self.pos);
        self.last_start = start;
        self.last_end = self.pos;
        if s.eq_ignore_ascii_case("true") {
            Token::Boolean(true)
        } else if s.eq_ignore_ascii_case("false") {
            Token::Boolean(false)
        } else {
            Token::Identifier(s)
        }
    }

    fn string(&mut self, quote: u8) -> Result<Token, LexError> {
        let start = self.pos - 1;
        let mut buf: Vec<u8> = Vec::new();
        while let Some(c) = self.bump() {
            if c == quote {
                // A doubled quote is an escaped quote character.
                if self.peek() == Some(quote) {
                    self.pos += 1;
                    buf.push(quote);
                    continue;
                }
                self.last_start = start;
                self.last_end = self.pos;
                let value = String::from_utf8(buf)
                    .map_err(|_| LexError::new("Invalid UTF-8 in string literal", start))?;
                return Ok(Token::String { value, quote: quote as char });
            }
            buf.push(c);
        }
        Err(LexError::new("Unterminated string literal", start))
    }

    /// Tries `d '...'` followed by `close` after an opening `{` or `(`.
    /// Returns `Ok(None)` (and leaves the position untouched) when the input
    /// does not have the shape of a temporal literal.
    fn temporal(&mut self, open_pos: usize, close: u8) -> Result<Option<Token>, LexError> {
        let save = self.pos;
        self.skip_ws();
        let tag_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let kind = match TemporalKind::from_tag(&self.input[tag_start..self.pos]) {
            Some(kind) => kind,
            None => {
                self.pos = save;
                return Ok(None);
            }
        };
        self.skip_ws();
        if self.peek() != Some(b'\'') {
            self.pos = save;
            return Ok(None);
        }
        self.pos += 1;
        let value = match self.string(b'\'')? {
            Token::String { value, .. } => value,
            _ => unreachable!("string() only produces string tokens"),
        };
        self.skip_ws();
        if self.peek() != Some(close) {
            return Err(LexError::new("Unterminated temporal literal", open_pos));
        }
        self.pos += 1;
        if !kind.validate(&value) {
            return Err(LexError::new(format!("Invalid {} literal '{}'", kind.tag(), value), open_pos));
        }
        self.last_start = open_pos;
        self.last_end = self.pos;
        Ok(Some(Token::Temporal { kind, value }))
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_ws();
        let start = self.pos;
        let ch = match self.bump() {
            Some(c) => c,
            None => {
                self.last_start = start;
                self.last_end = start;
                return Ok(Token::Eof);
            }
        };

        let tok = match ch {
            b'0'..=b'9' => return self.number(start),
            b'.' if matches!(self.peek(), Some(b'0'..=b'9')) => return self.number(start),
            c if Self::is_ident_start(c) => return Ok(self.identifier(start)),
            b'\'' | b'"' => return self.string(ch),
            b'{' => {
                return match self.temporal(start, b'}')? {
                    Some(tok) => Ok(tok),
                    None => Err(LexError::new("Unexpected '{'", start)),
                }
            }
            b'(' => {
                if let Some(tok) = self.temporal(start, b')')? {
                    return Ok(tok);
                }
                Token::LParen
            }
            b':' => {
                let name_start = self.pos;
                while matches!(self.peek(), Some(c) if Self::is_ident_part(c)) {
                    self.pos += 1;
                }
                if name_start == self.pos {
                    return Err(LexError::new("Expected parameter name after ':'", start));
                }
                Token::Parameter(self.text(name_start, self.pos))
            }
            b'.' => Token::Dot,
            b',' => Token::Comma,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'=' => Token::Eq,
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::NotEq
                } else {
                    return Err(LexError::new("Unexpected '!'", start));
                }
            }
            b'<' => match self.peek() {
                Some(b'=') => {
                    self.pos += 1;
                    Token::Le
                }
                Some(b'>') => {
                    self.pos += 1;
                    Token::NotEq
                }
                _ => Token::Less,
            },
            b'>' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Token::Ge
                } else {
                    Token::Greater
                }
            }
            _ => return Err(LexError::new("Unexpected character", start)),
        };
        self.last_start = start;
        self.last_end = self.pos;
        Ok(tok)
    }

    pub fn last_start(&self) -> usize {
        self.last_start
    }

    pub fn last_end(&self) -> usize {
        self.last_end
    }
}

/// Lexes the whole input, pairing every token with its start offset.
/// The final element is always `Token::Eof`.
pub fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token()?;
        let done = tok == Token::Eof;
        tokens.push((tok, lexer.last_start()));
        if done {
            return Ok(tokens);
        }
    }
}
