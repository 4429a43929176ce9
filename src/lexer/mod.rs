mod stream;
mod token;

pub use stream::*;
pub use token::*;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use log::{debug, error};
use once_cell::sync::Lazy;

/// Size of each of the two input buffers, including the zero sentinel.
pub const BUFFER_SIZE: usize = 4096;
/// Bytes read per refill; the final byte of a buffer stays zero.
pub const READ_SIZE: usize = BUFFER_SIZE - 1;
/// Longest lexeme that may straddle a buffer boundary.
pub const MAX_TOKEN_SIZE: usize = 256;

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("if", TokenKind::If);
    m.insert("else", TokenKind::Else);
    m.insert("while", TokenKind::While);
    m.insert("return", TokenKind::Return);
    m.insert("asm", TokenKind::Asm);
    m
});

/// Streaming lexer over two alternating fixed-size buffers.
///
/// The reader is drained `READ_SIZE` bytes at a time; the last byte of each
/// buffer is a zero sentinel. Tokens whose match runs up to the sentinel are
/// re-matched across the boundary through a scratch area of
/// `MAX_TOKEN_SIZE` bytes.
pub struct Lexer {
    reader: Box<dyn Read>,
    buffers: [Vec<u8>; 2],
    active: usize,
    pos: usize,
    exhausted: bool,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(reader: impl Read + 'static) -> Self {
        let mut lexer = Self {
            reader: Box::new(reader),
            buffers: [vec![0; BUFFER_SIZE], vec![0; BUFFER_SIZE]],
            active: 0,
            pos: 0,
            exhausted: false,
            line: 1,
            col: 1,
        };
        lexer.fill_active();
        lexer
    }

    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    pub fn from_source(source: &str) -> Self {
        Self::new(Cursor::new(source.as_bytes().to_vec()))
    }

    fn fill_active(&mut self) {
        let buf = &mut self.buffers[self.active];
        buf.fill(0);

        let mut total = 0;
        while total < READ_SIZE {
            match self.reader.read(&mut buf[total..READ_SIZE]) {
                Ok(0) => {
                    self.exhausted = true;
                    break;
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("failed to read source: {e}");
                    self.exhausted = true;
                    break;
                }
            }
        }
    }

    /// Refill the other buffer and make it the active one.
    fn switch_buffer(&mut self) {
        debug!("buffer exhausted on line {}, switching", self.line);
        self.active ^= 1;
        self.fill_active();
        self.pos = 0;
    }

    fn cur(&self) -> u8 {
        self.buffers[self.active][self.pos]
    }

    fn rest(&self) -> &[u8] {
        &self.buffers[self.active][self.pos..]
    }

    /// Consume a lexeme of one token class, re-matching across the buffer
    /// boundary when the match runs up to the sentinel.
    fn take_class(&mut self, matcher: fn(&[u8]) -> usize) -> Vec<u8> {
        let len = matcher(self.rest());
        if self.pos + len == READ_SIZE && !self.exhausted && len < MAX_TOKEN_SIZE - 1 {
            return self.take_split(matcher, len).unwrap_or_default();
        }
        let lexeme = self.buffers[self.active][self.pos..self.pos + len].to_vec();
        self.pos += len;
        lexeme
    }

    /// Copy the partial lexeme into a scratch area, refill the other buffer,
    /// append its prefix and re-match the class pattern there. The scan
    /// position ends up `matched - partial` bytes into the new buffer.
    fn take_split(&mut self, matcher: fn(&[u8]) -> usize, partial: usize) -> Option<Vec<u8>> {
        let mut scratch = [0u8; MAX_TOKEN_SIZE];
        scratch[..partial].copy_from_slice(&self.buffers[self.active][self.pos..self.pos + partial]);

        self.switch_buffer();

        let take = (MAX_TOKEN_SIZE - 1 - partial).min(READ_SIZE);
        scratch[partial..partial + take].copy_from_slice(&self.buffers[self.active][..take]);

        let full = matcher(&scratch);
        if full < partial {
            // The class no longer matches across the boundary.
            return None;
        }
        self.pos = full - partial;
        Some(scratch[..full].to_vec())
    }

    fn eat_whitespace(&mut self) {
        loop {
            match self.cur() {
                b' ' => {
                    self.col += 1;
                    self.pos += 1;
                }
                b'\t' => {
                    self.col += 4;
                    self.pos += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.col = 1;
                    self.pos += 1;
                }
                b'\r' => self.pos += 1,
                0 if !self.exhausted => self.switch_buffer(),
                _ => return,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        loop {
            match self.cur() {
                0 if !self.exhausted => self.switch_buffer(),
                0 => return,
                b'\n' => {
                    self.line += 1;
                    self.col = 1;
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_block_comment(&mut self) {
        loop {
            match self.cur() {
                0 if !self.exhausted => self.switch_buffer(),
                0 => return,
                b'*' => {
                    self.pos += 1;
                    self.col += 1;
                    if self.cur() == 0 && !self.exhausted {
                        self.switch_buffer();
                    }
                    if self.cur() == b'/' {
                        self.pos += 1;
                        self.col += 1;
                        return;
                    }
                }
                b'\n' => {
                    self.line += 1;
                    self.col = 1;
                    self.pos += 1;
                }
                b'\t' => {
                    self.col += 4;
                    self.pos += 1;
                }
                _ => {
                    self.col += 1;
                    self.pos += 1;
                }
            }
        }
    }

    /// A `/` either opens a comment or is no token at all.
    fn lex_slash(&mut self) -> Option<Token> {
        let (line, col) = (self.line, self.col);
        self.pos += 1;
        self.col += 1;
        if self.cur() == 0 && !self.exhausted {
            self.switch_buffer();
        }
        match self.cur() {
            b'/' => {
                self.pos += 1;
                self.col += 1;
                self.skip_line_comment();
                None
            }
            b'*' => {
                self.pos += 1;
                self.col += 1;
                self.skip_block_comment();
                None
            }
            _ => Some(Token::new(TokenKind::Unknown, line, col)),
        }
    }

    fn lex_word(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let lexeme = self.take_class(ident_len);
        self.col += lexeme.len();

        let word = String::from_utf8_lossy(&lexeme).into_owned();
        let kind = KEYWORDS
            .get(word.as_str())
            .cloned()
            .unwrap_or(TokenKind::Ident(word));
        Token::new(kind, line, col)
    }

    fn lex_char_literal(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let lexeme = self.take_class(char_literal_len);
        self.col += lexeme.len();

        match decode_char_lexeme(&lexeme) {
            Some(value) => Token::new(TokenKind::IntLiteral(i32::from(value)), line, col),
            None => Token::new(TokenKind::Unknown, line, col),
        }
    }

    /// A character literal whose closing quote sits in the next buffer.
    fn lex_split_char_literal(&mut self, half: usize) -> Token {
        let (line, col) = (self.line, self.col);
        let lexeme = self.take_split(char_literal_len, half).unwrap_or_default();
        self.col += lexeme.len();

        match decode_char_lexeme(&lexeme) {
            Some(value) => Token::new(TokenKind::IntLiteral(i32::from(value)), line, col),
            None => Token::new(TokenKind::Unknown, line, col),
        }
    }

    fn lex_hex_literal(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let lexeme = self.take_class(hex_literal_len);
        self.col += lexeme.len();

        let digits = String::from_utf8_lossy(&lexeme[2..]).into_owned();
        let value = i64::from_str_radix(&digits, 16)
            .map(|v| v as i32)
            .unwrap_or(i32::MAX);
        Token::new(TokenKind::IntLiteral(value), line, col)
    }

    fn lex_decimal_literal(&mut self) -> Token {
        let (line, col) = (self.line, self.col);
        let lexeme = self.take_class(decimal_literal_len);
        self.col += lexeme.len();

        let digits = String::from_utf8_lossy(&lexeme).into_owned();
        let value = digits
            .parse::<i64>()
            .unwrap_or(i64::from(i32::MAX))
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        Token::new(TokenKind::IntLiteral(value), line, col)
    }

    fn lex_string_literal(&mut self) -> Token {
        let (line, col) = (self.line, self.col);

        let len = string_literal_len(self.rest());
        let lexeme = if len > 0 {
            self.take_class(string_literal_len)
        } else {
            // No closing quote before the sentinel; the literal either
            // continues in the next buffer or is unterminated.
            let half = half_string_literal_len(self.rest());
            if self.pos + half == READ_SIZE && !self.exhausted && half < MAX_TOKEN_SIZE - 1 {
                match self.take_split(string_literal_len, half) {
                    Some(lexeme) => lexeme,
                    None => return Token::new(TokenKind::Unknown, line, col),
                }
            } else {
                return Token::new(TokenKind::Unknown, line, col);
            }
        };
        self.col += lexeme.len();

        let contents = String::from_utf8_lossy(&lexeme[1..lexeme.len() - 1]).into_owned();
        Token::new(TokenKind::StrLiteral(contents), line, col)
    }

    /// Operators starting `= ! < >` may extend with a `=` that sits in the
    /// next buffer.
    fn lex_compound(&mut self, first: u8) -> Token {
        let (line, col) = (self.line, self.col);
        self.pos += 1;
        if self.cur() == 0 && !self.exhausted {
            self.switch_buffer();
        }

        let (kind, len) = if self.cur() == b'=' {
            self.pos += 1;
            let kind = match first {
                b'=' => TokenKind::EqualEqual,
                b'!' => TokenKind::NotEqual,
                b'<' => TokenKind::LessEqual,
                _ => TokenKind::GreaterEqual,
            };
            (kind, 2)
        } else {
            let kind = match first {
                b'=' => TokenKind::Assign,
                b'!' => TokenKind::Not,
                b'<' => TokenKind::Less,
                _ => TokenKind::Greater,
            };
            (kind, 1)
        };
        self.col += len;
        Token::new(kind, line, col)
    }

    /// Acquire the next token from the buffers.
    pub fn next_token(&mut self) -> Token {
        loop {
            let b = self.cur();

            if b == 0 {
                if self.exhausted {
                    return Token::new(TokenKind::Eof, self.line, self.col);
                }
                self.switch_buffer();
                continue;
            }

            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                self.eat_whitespace();
                continue;
            }

            if b == b'/' {
                match self.lex_slash() {
                    Some(token) => return token,
                    None => continue,
                }
            }

            if b.is_ascii_alphabetic() || b == b'_' {
                return self.lex_word();
            }

            if b == b'\'' {
                if char_literal_len(self.rest()) > 0 {
                    return self.lex_char_literal();
                }
                let half = char_literal_half_len(self.rest());
                if half > 0 && self.pos + half == READ_SIZE && !self.exhausted {
                    return self.lex_split_char_literal(half);
                }
            }

            if hex_literal_len(self.rest()) > 0 {
                return self.lex_hex_literal();
            }

            if b.is_ascii_digit() {
                return self.lex_decimal_literal();
            }

            if b == b'"' {
                return self.lex_string_literal();
            }

            let single = match b {
                b';' => Some(TokenKind::Semicolon),
                b'(' => Some(TokenKind::OpenParen),
                b')' => Some(TokenKind::ClosedParen),
                b'{' => Some(TokenKind::OpenBrace),
                b'}' => Some(TokenKind::ClosedBrace),
                b'[' => Some(TokenKind::OpenBracket),
                b']' => Some(TokenKind::ClosedBracket),
                b'+' => Some(TokenKind::Plus),
                b'-' => Some(TokenKind::Minus),
                b'&' => Some(TokenKind::Ampersand),
                b'|' => Some(TokenKind::Pipe),
                b'*' => Some(TokenKind::Star),
                _ => None,
            };
            if let Some(kind) = single {
                let token = Token::new(kind, self.line, self.col);
                self.pos += 1;
                self.col += 1;
                return token;
            }

            if matches!(b, b'=' | b'!' | b'<' | b'>') {
                return self.lex_compound(b);
            }

            let token = Token::new(TokenKind::Unknown, self.line, self.col);
            self.pos += 1;
            self.col += 1;
            return token;
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn ident_len(s: &[u8]) -> usize {
    match s.first() {
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {}
        _ => return 0,
    }
    s.iter()
        .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
        .unwrap_or(s.len())
}

/// `[1-9][0-9]*` or a single `0`.
fn decimal_literal_len(s: &[u8]) -> usize {
    match s.first() {
        Some(b'0') => 1,
        Some(c) if c.is_ascii_digit() => s
            .iter()
            .position(|c| !c.is_ascii_digit())
            .unwrap_or(s.len()),
        _ => 0,
    }
}

/// `0x[0-9A-Fa-f]+`
fn hex_literal_len(s: &[u8]) -> usize {
    if s.len() < 3 || s[0] != b'0' || s[1] != b'x' {
        return 0;
    }
    let digits = s[2..]
        .iter()
        .position(|c| !c.is_ascii_hexdigit())
        .unwrap_or(s.len() - 2);
    if digits == 0 {
        0
    } else {
        2 + digits
    }
}

/// `'c'` or `'\e'`
fn char_literal_len(s: &[u8]) -> usize {
    if s.first() != Some(&b'\'') {
        return 0;
    }
    match s.get(1) {
        Some(b'\\') => match (s.get(2), s.get(3)) {
            (Some(c), Some(b'\'')) if *c != 0 => 4,
            _ => 0,
        },
        Some(c) if *c != b'\'' && *c != 0 => {
            if s.get(2) == Some(&b'\'') {
                3
            } else {
                0
            }
        }
        _ => 0,
    }
}

/// The prefix of a character literal cut off by the sentinel.
fn char_literal_half_len(s: &[u8]) -> usize {
    if s.first() != Some(&b'\'') {
        return 0;
    }
    let mut i = 1;
    while i < 4 {
        match s.get(i) {
            Some(0) | None => return i,
            Some(_) => i += 1,
        }
    }
    0
}

fn decode_char_lexeme(lexeme: &[u8]) -> Option<u8> {
    match lexeme {
        [b'\'', b'\\', c, b'\''] => Some(decode_escape(*c)),
        [b'\'', c, b'\''] => Some(*c),
        _ => None,
    }
}

/// `"[^"]*"`, a complete string literal.
fn string_literal_len(s: &[u8]) -> usize {
    if s.first() != Some(&b'"') {
        return 0;
    }
    for (i, c) in s.iter().enumerate().skip(1) {
        match c {
            b'"' => return i + 1,
            0 => return 0,
            _ => {}
        }
    }
    0
}

/// `"[^"]*` up to the sentinel: the prefix of a literal that may continue
/// in the next buffer.
fn half_string_literal_len(s: &[u8]) -> usize {
    if s.first() != Some(&b'"') {
        return 0;
    }
    for (i, c) in s.iter().enumerate().skip(1) {
        match c {
            b'"' => return 0,
            0 => return i,
            _ => {}
        }
    }
    s.len()
}

/// Decode one character escape; unknown escapes collapse to the bare
/// character.
pub fn decode_escape(c: u8) -> u8 {
    match c {
        b'0' => 0x00,
        b'a' => 0x07,
        b'b' => 0x08,
        b'e' => 0x1b,
        b'f' => 0x0c,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'v' => 0x0b,
        _ => c,
    }
}

/// Decode every backslash escape in the raw contents of a string literal.
pub fn decode_escapes(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            out.push(decode_escape(bytes[i + 1]));
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::from_source(source);
        let mut kinds = vec![];
        loop {
            let token = lexer.next_token();
            if token.kind == TokenKind::Eof {
                return kinds;
            }
            kinds.push(token.kind);
        }
    }

    #[test]
    fn test_lex_keywords_and_identifiers() {
        assert_eq!(
            lex_all("if else while return asm iffy"),
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Return,
                TokenKind::Asm,
                TokenKind::Ident("iffy".into()),
            ]
        );
    }

    #[test]
    fn test_lex_declaration() {
        assert_eq!(
            lex_all("int foo = 42;"),
            vec![
                TokenKind::Ident("int".into()),
                TokenKind::Ident("foo".into()),
                TokenKind::Assign,
                TokenKind::IntLiteral(42),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            lex_all("+ - * & | ! = == != < > <= >="),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Ampersand,
                TokenKind::Pipe,
                TokenKind::Not,
                TokenKind::Assign,
                TokenKind::EqualEqual,
                TokenKind::NotEqual,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
            ]
        );
    }

    #[test]
    fn test_lex_numeric_literals() {
        assert_eq!(
            lex_all("0 1337 0x10 0xFF"),
            vec![
                TokenKind::IntLiteral(0),
                TokenKind::IntLiteral(1337),
                TokenKind::IntLiteral(16),
                TokenKind::IntLiteral(255),
            ]
        );
    }

    #[test]
    fn test_lex_leading_zero_splits() {
        // "([1-9][0-9]*)|0" matches the zero alone.
        assert_eq!(
            lex_all("0123"),
            vec![TokenKind::IntLiteral(0), TokenKind::IntLiteral(123)]
        );
    }

    #[test]
    fn test_lex_char_literals() {
        assert_eq!(
            lex_all(r"'a' '\n' '\e' '\0' '\\'"),
            vec![
                TokenKind::IntLiteral(97),
                TokenKind::IntLiteral(10),
                TokenKind::IntLiteral(27),
                TokenKind::IntLiteral(0),
                TokenKind::IntLiteral(92),
            ]
        );
    }

    #[test]
    fn test_lex_string_literal() {
        assert_eq!(
            lex_all("\"hello\\n\""),
            vec![TokenKind::StrLiteral("hello\\n".into())]
        );
    }

    #[test]
    fn test_lex_comments() {
        assert_eq!(
            lex_all("1 // comment\n2 /* block\ncomment */ 3"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(2),
                TokenKind::IntLiteral(3),
            ]
        );
    }

    #[test]
    fn test_lex_unknown_character() {
        assert_eq!(
            lex_all("a $ b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Unknown,
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn test_lex_lone_slash_is_unknown() {
        assert_eq!(
            lex_all("a / b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Unknown,
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let mut lexer = Lexer::from_source("if\n  x = 1;");
        assert_eq!(lexer.next_token().position(), (1, 1));
        assert_eq!(lexer.next_token().position(), (2, 3));
        assert_eq!(lexer.next_token().position(), (2, 5));
        assert_eq!(lexer.next_token().position(), (2, 7));
    }

    #[test]
    fn test_tab_counts_four_columns() {
        let mut lexer = Lexer::from_source("\tx");
        assert_eq!(lexer.next_token().position(), (1, 5));
    }

    #[test]
    fn test_identifier_straddles_buffer_boundary() {
        let mut source = " ".repeat(READ_SIZE - 3);
        source.push_str("abcdef");

        assert_eq!(lex_all(&source), vec![TokenKind::Ident("abcdef".into())]);
    }

    #[test]
    fn test_number_straddles_buffer_boundary() {
        let mut source = " ".repeat(READ_SIZE - 2);
        source.push_str("123456");

        assert_eq!(lex_all(&source), vec![TokenKind::IntLiteral(123456)]);
    }

    #[test]
    fn test_char_literal_straddles_buffer_boundary() {
        let mut source = " ".repeat(READ_SIZE - 2);
        source.push_str("'a' 1");

        assert_eq!(
            lex_all(&source),
            vec![TokenKind::IntLiteral(97), TokenKind::IntLiteral(1)]
        );
    }

    #[test]
    fn test_string_straddles_buffer_boundary() {
        let mut source = " ".repeat(READ_SIZE - 4);
        source.push_str("\"split literal\"");

        assert_eq!(
            lex_all(&source),
            vec![TokenKind::StrLiteral("split literal".into())]
        );
    }

    #[test]
    fn test_compound_operator_straddles_buffer_boundary() {
        let mut source = " ".repeat(READ_SIZE - 1);
        source.push_str("== 1");

        assert_eq!(
            lex_all(&source),
            vec![TokenKind::EqualEqual, TokenKind::IntLiteral(1)]
        );
    }

    #[test]
    fn test_token_exactly_at_buffer_end() {
        // The identifier ends on the final readable byte; the next buffer
        // starts with a delimiter.
        let mut source = " ".repeat(READ_SIZE - 3);
        source.push_str("abc;");

        assert_eq!(
            lex_all(&source),
            vec![TokenKind::Ident("abc".into()), TokenKind::Semicolon]
        );
    }

    #[test]
    fn test_unterminated_string_is_unknown() {
        assert_eq!(lex_all("\"oops"), vec![TokenKind::Unknown]);
    }

    #[test]
    fn test_decode_escapes() {
        assert_eq!(decode_escapes("ab"), b"ab".to_vec());
        assert_eq!(decode_escapes("a\\nb"), b"a\nb".to_vec());
        assert_eq!(decode_escapes("\\e[0m"), vec![0x1b, b'[', b'0', b'm']);
        assert_eq!(decode_escapes("\\q"), b"q".to_vec());
    }
}
