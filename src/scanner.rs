// File: src/scanner.rs
//
// On-demand tokenizer. The compiler pulls one token at a time; the scanner
// can also be rewound to a saved mark, which the compiler uses to
// disambiguate `{` at statement position (block or dict literal).

use ahash::RandomState;
use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Semicolon,
    Colon,
    Percent,
    Plus,
    PlusPlus,
    PlusEquals,
    Minus,
    MinusMinus,
    MinusEquals,
    Star,
    StarStar,
    StarEquals,
    Slash,
    SlashEquals,
    Amp,
    AmpEquals,
    Caret,
    CaretEquals,
    Pipe,
    PipeEquals,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Identifier,
    String,
    Number,
    Class,
    Trait,
    Use,
    Static,
    This,
    Super,
    Def,
    If,
    Else,
    And,
    Or,
    Var,
    True,
    False,
    Nil,
    For,
    While,
    Break,
    Continue,
    Return,
    With,
    Import,
    Error,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Token text. String tokens hold the raw contents without quotes;
    /// error tokens hold the message.
    pub lexeme: String,
    pub line: u32,
}

impl Token {
    pub fn synthetic(lexeme: &str) -> Token {
        Token { kind: TokenKind::Identifier, lexeme: lexeme.to_string(), line: 0 }
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind, RandomState>> = Lazy::new(|| {
    let mut map = HashMap::with_hasher(RandomState::new());
    map.insert("class", TokenKind::Class);
    map.insert("trait", TokenKind::Trait);
    map.insert("use", TokenKind::Use);
    map.insert("static", TokenKind::Static);
    map.insert("this", TokenKind::This);
    map.insert("super", TokenKind::Super);
    map.insert("def", TokenKind::Def);
    map.insert("if", TokenKind::If);
    map.insert("else", TokenKind::Else);
    map.insert("and", TokenKind::And);
    map.insert("or", TokenKind::Or);
    map.insert("var", TokenKind::Var);
    map.insert("true", TokenKind::True);
    map.insert("false", TokenKind::False);
    map.insert("nil", TokenKind::Nil);
    map.insert("for", TokenKind::For);
    map.insert("while", TokenKind::While);
    map.insert("break", TokenKind::Break);
    map.insert("continue", TokenKind::Continue);
    map.insert("return", TokenKind::Return);
    map.insert("with", TokenKind::With);
    map.insert("import", TokenKind::Import);
    map
});

/// A saved scanner position, used to rewind after speculative scanning.
#[derive(Debug, Clone, Copy)]
pub struct ScannerMark {
    current: usize,
    line: u32,
}

pub struct Scanner<'src> {
    source: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner { source: source.as_bytes(), start: 0, current: 0, line: 1 }
    }

    /// Current position, for later backtracking.
    pub fn mark(&self) -> ScannerMark {
        ScannerMark { current: self.current, line: self.line }
    }

    /// Rewinds to a saved mark; subsequent tokens are re-scanned.
    pub fn backtrack(&mut self, mark: ScannerMark) {
        self.current = mark.current;
        self.line = mark.line;
    }

    pub fn scan_token(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b'[' => self.make_token(TokenKind::LeftBracket),
            b']' => self.make_token(TokenKind::RightBracket),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b';' => self.make_token(TokenKind::Semicolon),
            b':' => self.make_token(TokenKind::Colon),
            b'%' => self.make_token(TokenKind::Percent),
            b'+' => {
                if self.matches(b'+') {
                    self.make_token(TokenKind::PlusPlus)
                } else if self.matches(b'=') {
                    self.make_token(TokenKind::PlusEquals)
                } else {
                    self.make_token(TokenKind::Plus)
                }
            }
            b'-' => {
                if self.matches(b'-') {
                    self.make_token(TokenKind::MinusMinus)
                } else if self.matches(b'=') {
                    self.make_token(TokenKind::MinusEquals)
                } else {
                    self.make_token(TokenKind::Minus)
                }
            }
            b'*' => {
                if self.matches(b'*') {
                    self.make_token(TokenKind::StarStar)
                } else if self.matches(b'=') {
                    self.make_token(TokenKind::StarEquals)
                } else {
                    self.make_token(TokenKind::Star)
                }
            }
            b'/' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::SlashEquals)
                } else {
                    self.make_token(TokenKind::Slash)
                }
            }
            b'&' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::AmpEquals)
                } else {
                    self.make_token(TokenKind::Amp)
                }
            }
            b'^' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::CaretEquals)
                } else {
                    self.make_token(TokenKind::Caret)
                }
            }
            b'|' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::PipeEquals)
                } else {
                    self.make_token(TokenKind::Pipe)
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            b'=' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::EqualEqual)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::LessEqual)
                } else {
                    self.make_token(TokenKind::Less)
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    self.make_token(TokenKind::GreaterEqual)
                } else {
                    self.make_token(TokenKind::Greater)
                }
            }
            b'"' => self.string(b'"'),
            b'\'' => self.string(b'\''),
            _ if c.is_ascii_digit() => self.number(),
            _ if c.is_ascii_alphabetic() || c == b'_' => self.identifier(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\r') | Some(b'\t') => {
                    self.current += 1;
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.current += 1;
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self, quote: u8) -> Token {
        while let Some(c) = self.peek() {
            if c == quote {
                break;
            }
            if c == b'\n' {
                self.line += 1;
            }
            // A backslash escapes the next character, whatever it is; the
            // compiler decodes the sequences it understands.
            if c == b'\\' && self.peek_next().is_some() {
                self.current += 1;
            }
            self.current += 1;
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        let contents =
            String::from_utf8_lossy(&self.source[self.start + 1..self.current]).into_owned();
        self.current += 1; // closing quote
        Token { kind: TokenKind::String, lexeme: contents, line: self.line }
    }

    fn number(&mut self) -> Token {
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.current += 1;
        }
        if self.peek() == Some(b'.') && self.peek_next().map_or(false, |c| c.is_ascii_digit()) {
            self.current += 1;
            while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                self.current += 1;
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token {
        while self.peek().map_or(false, |c| c.is_ascii_alphanumeric() || c == b'_') {
            self.current += 1;
        }
        let text = &self.source[self.start..self.current];
        let text = std::str::from_utf8(text).unwrap_or("");
        let kind = KEYWORDS.get(text).copied().unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            lexeme: String::from_utf8_lossy(&self.source[self.start..self.current]).into_owned(),
            line: self.line,
        }
    }

    fn error_token(&self, message: &str) -> Token {
        Token { kind: TokenKind::Error, lexeme: message.to_string(), line: self.line }
    }

    fn advance(&mut self) -> u8 {
        let c = self.source[self.current];
        self.current += 1;
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.current + 1).copied()
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    #[test]
    fn operators_and_compounds() {
        assert_eq!(
            kinds("+ ++ += - -- -= * ** *= / /= & &= ^ ^= | |="),
            vec![
                TokenKind::Plus,
                TokenKind::PlusPlus,
                TokenKind::PlusEquals,
                TokenKind::Minus,
                TokenKind::MinusMinus,
                TokenKind::MinusEquals,
                TokenKind::Star,
                TokenKind::StarStar,
                TokenKind::StarEquals,
                TokenKind::Slash,
                TokenKind::SlashEquals,
                TokenKind::Amp,
                TokenKind::AmpEquals,
                TokenKind::Caret,
                TokenKind::CaretEquals,
                TokenKind::Pipe,
                TokenKind::PipeEquals,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("class trait use def classy"),
            vec![
                TokenKind::Class,
                TokenKind::Trait,
                TokenKind::Use,
                TokenKind::Def,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_in_both_quote_styles() {
        let mut scanner = Scanner::new(r#""double" 'single' "esc\"aped""#);
        let a = scanner.scan_token();
        assert_eq!(a.kind, TokenKind::String);
        assert_eq!(a.lexeme, "double");
        let b = scanner.scan_token();
        assert_eq!(b.kind, TokenKind::String);
        assert_eq!(b.lexeme, "single");
        let c = scanner.scan_token();
        assert_eq!(c.kind, TokenKind::String);
        assert_eq!(c.lexeme, "esc\\\"aped");
    }

    #[test]
    fn unterminated_string_errors() {
        let mut scanner = Scanner::new("\"oops");
        assert_eq!(scanner.scan_token().kind, TokenKind::Error);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 // the rest is noise\n2"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn backtracking_rescans_tokens() {
        let mut scanner = Scanner::new("{ 1 : 2 }");
        let brace = scanner.scan_token();
        assert_eq!(brace.kind, TokenKind::LeftBrace);
        let mark = scanner.mark();
        assert_eq!(scanner.scan_token().kind, TokenKind::Number);
        assert_eq!(scanner.scan_token().kind, TokenKind::Colon);
        scanner.backtrack(mark);
        // After rewinding, the same tokens come back out.
        assert_eq!(scanner.scan_token().kind, TokenKind::Number);
        assert_eq!(scanner.scan_token().kind, TokenKind::Colon);
    }

    #[test]
    fn number_forms() {
        let mut scanner = Scanner::new("12 3.5 7.");
        assert_eq!(scanner.scan_token().lexeme, "12");
        assert_eq!(scanner.scan_token().lexeme, "3.5");
        // A trailing dot is a separate token, not part of the number.
        assert_eq!(scanner.scan_token().lexeme, "7");
        assert_eq!(scanner.scan_token().kind, TokenKind::Dot);
    }
}
