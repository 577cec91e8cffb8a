use super::{
    position::{BytePos, Span, WithSpan},
    token::{Number, StringDelimiter, Symbol, Token},
};
use crate::{
    error::{SyntaxError, SyntaxKind},
    utils,
};
use std::{iter, str::CharIndices};

/// Maximum number of characters that can be pushed back at once.
const PUSHBACK_LIMIT: usize = 4;

/// Tokenize the whole input, skipping whitespace and comments.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub fn tokenize(src: &str) -> Result<Vec<WithSpan<Token>>, SyntaxError> {
    let mut tokenizer = Tokenizer::new(src);
    let mut tokens = vec![];
    while let Some(token) = tokenizer.read_token(true)? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Scanner<'a> {
    /// Iterator over src characters.
    iter: iter::Peekable<CharIndices<'a>>,

    /// Characters returned to the stream, read back last in first out.
    pushback: Vec<(usize, char)>,

    /// Length of the source in bytes.
    len: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            iter: src.char_indices().peekable(),
            pushback: Vec::with_capacity(PUSHBACK_LIMIT),
            len: src.len(),
        }
    }

    /// Peek at the next character without consuming it.
    pub fn peek(&mut self) -> Option<char> {
        match self.pushback.last() {
            Some((_, ch)) => Some(*ch),
            None => self.iter.peek().map(|(_, ch)| *ch),
        }
    }

    /// Byte position of the next character.
    pub fn offset(&mut self) -> usize {
        match self.pushback.last() {
            Some((idx, _)) => *idx,
            None => self.iter.peek().map_or(self.len, |(idx, _)| *idx),
        }
    }

    /// Consume the next character if it matches the predicate.
    pub fn next_if(&mut self, predicate: impl Fn(char) -> bool) -> Option<(usize, char)> {
        if self.peek().is_some_and(&predicate) {
            self.next()
        } else {
            None
        }
    }

    /// Consume the next character if it is equal to the expected one.
    pub fn next_if_eq(&mut self, expected: char) -> bool {
        self.next_if(|ch| ch == expected).is_some()
    }

    /// Return a consumed character to the stream.
    pub fn push_back(&mut self, item: (usize, char)) -> Result<(), error::Kind> {
        if self.pushback.len() >= PUSHBACK_LIMIT {
            return Err(error::Kind::PushbackOverflow);
        }
        self.pushback.push(item);
        Ok(())
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = (usize, char);
    fn next(&mut self) -> Option<Self::Item> {
        let next = self.pushback.pop().or_else(|| self.iter.next());
        #[cfg(feature = "tracing")]
        tracing::trace!(?next);
        next
    }
}

/// Lazily produces tokens from source text.
///
/// A single token can be peeked without consuming it.
/// Whitespace and comments are reported as [`Token::Whitespace`] unless
/// skipped by the caller.
pub struct Tokenizer<'a> {
    src: &'a str,
    it: Scanner<'a>,

    /// Next token if already scanned.
    /// `Some(None)` marks the end of input.
    peeked: Option<Option<WithSpan<Token>>>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            it: Scanner::new(src),
            peeked: None,
        }
    }

    pub fn src(&self) -> &'a str {
        self.src
    }

    /// Position of the next unread token.
    pub fn position(&mut self) -> BytePos {
        match &self.peeked {
            Some(Some(token)) => token.span.start,
            Some(None) => BytePos(self.src.len()),
            None => BytePos(self.it.offset()),
        }
    }

    /// Next token without consuming it.
    /// `None` at the end of input.
    pub fn peek_token(&mut self, skip_ws: bool) -> Result<Option<&WithSpan<Token>>, SyntaxError> {
        loop {
            if self.peeked.is_none() {
                let token = self.scan()?;
                self.peeked = Some(token);
            }

            match &self.peeked {
                Some(Some(token)) if skip_ws && token.value == Token::Whitespace => {
                    self.peeked = None;
                }
                _ => break,
            }
        }

        Ok(self.peeked.as_ref().and_then(|token| token.as_ref()))
    }

    /// Consume the next token.
    /// `None` at the end of input.
    pub fn read_token(&mut self, skip_ws: bool) -> Result<Option<WithSpan<Token>>, SyntaxError> {
        self.peek_token(skip_ws)?;
        let token = self.peeked.take().flatten();
        if token.is_none() {
            self.peeked = Some(None);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(?token);
        Ok(token)
    }

    /// Create an error pointing into the source.
    pub fn error(&self, kind: impl Into<SyntaxKind>, span: Span) -> SyntaxError {
        SyntaxError {
            kind: kind.into(),
            span,
            position: utils::line_col(self.src, span.start),
            snippet: utils::snippet(self.src, span.start),
        }
    }

    fn scan(&mut self) -> Result<Option<WithSpan<Token>>, SyntaxError> {
        let Some((start, ch)) = self.it.next() else {
            return Ok(None);
        };

        match self.match_token(start, ch) {
            Ok(token) => {
                let end = self.it.offset();
                Ok(Some(WithSpan::new(token, start, end)))
            }
            Err(err) => Err(self.error(err.value, err.span)),
        }
    }
}

impl<'a> Tokenizer<'a> {
    fn is_ident_start(ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_ident_char(ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_'
    }

    fn next_if_else(&mut self, to_match: char, matched: Symbol, unmatched: Symbol) -> Token {
        if self.it.next_if_eq(to_match) {
            Token::Symbol(matched)
        } else {
            Token::Symbol(unmatched)
        }
    }

    fn next_while(&mut self, predicate: impl Fn(char) -> bool, out: &mut String) {
        while let Some((_, ch)) = self.it.next_if(&predicate) {
            out.push(ch);
        }
    }

    fn match_token(&mut self, start: usize, ch: char) -> Result<Token, WithSpan<error::Kind>> {
        let token = match ch {
            ch if ch.is_whitespace() => {
                self.skip_whitespace(start)?;
                Token::Whitespace
            }

            '/' if matches!(self.it.peek(), Some('/' | '*')) => {
                self.it
                    .push_back((start, ch))
                    .map_err(|kind| WithSpan::at(kind, start))?;
                self.skip_whitespace(start)?;
                Token::Whitespace
            }

            '(' => Token::Symbol(Symbol::ParenLeft),
            ')' => Token::Symbol(Symbol::ParenRight),
            '[' => Token::Symbol(Symbol::BracketLeft),
            ']' => Token::Symbol(Symbol::BracketRight),
            '{' => Token::Symbol(Symbol::BraceLeft),
            '}' => Token::Symbol(Symbol::BraceRight),
            ',' => Token::Symbol(Symbol::Comma),
            ';' => Token::Symbol(Symbol::Semicolon),
            ':' => Token::Symbol(Symbol::Colon),
            '.' => Token::Symbol(Symbol::Dot),
            '$' => Token::Symbol(Symbol::Dollar),
            '+' => Token::Symbol(Symbol::Plus),
            '-' => Token::Symbol(Symbol::Minus),
            '*' => Token::Symbol(Symbol::Star),
            '/' => Token::Symbol(Symbol::Slash),
            '%' => Token::Symbol(Symbol::Percent),
            '~' => self.next_if_else('[', Symbol::SelectAll, Symbol::Tilde),
            '^' => self.next_if_else('[', Symbol::SelectFirst, Symbol::Caret),
            '=' => self.next_if_else('=', Symbol::EqualEqual, Symbol::Equal),

            '!' => {
                if self.it.next_if_eq('=') {
                    Token::Symbol(Symbol::BangEqual)
                } else {
                    self.next_if_else('[', Symbol::Project, Symbol::Bang)
                }
            }

            '&' => {
                if self.it.next_if_eq('&') {
                    Token::Symbol(Symbol::AmpAmp)
                } else {
                    self.next_if_else('[', Symbol::SelectLast, Symbol::Amp)
                }
            }

            '|' => self.next_if_else('|', Symbol::PipePipe, Symbol::Pipe),

            '?' => {
                if self.it.next_if_eq('.') {
                    Token::Symbol(Symbol::QuestionDot)
                } else {
                    self.next_if_else(':', Symbol::Elvis, Symbol::Question)
                }
            }

            '<' => {
                if self.it.next_if_eq('=') {
                    Token::Symbol(Symbol::LessEqual)
                } else {
                    self.next_if_else('<', Symbol::Shl, Symbol::Less)
                }
            }

            '>' => {
                if self.it.next_if_eq('=') {
                    Token::Symbol(Symbol::GreaterEqual)
                } else if self.it.next_if_eq('>') {
                    self.next_if_else('>', Symbol::UShr, Symbol::Shr)
                } else {
                    Token::Symbol(Symbol::Greater)
                }
            }

            '\'' | '"' => Token::String {
                value: self.scan_quoted(start, ch)?,
                delimiter: if ch == '"' {
                    StringDelimiter::QuoteDouble
                } else {
                    StringDelimiter::QuoteSingle
                },
            },

            '\\' => Token::String {
                value: self.scan_raw(start, ch)?,
                delimiter: StringDelimiter::Raw,
            },

            '@' => Token::ClassString(self.scan_raw(start, ch)?),

            '`' => Token::TemplateString(self.scan_raw(start, ch)?),

            ch if ch.is_ascii_digit() => Token::Number(self.scan_number(start, ch)?),

            ch if Self::is_ident_start(ch) => {
                let mut name = String::from(ch);
                self.next_while(Self::is_ident_char, &mut name);
                Token::Identifier(name)
            }

            ch => {
                return Err(WithSpan::new(
                    error::Kind::UnexpectedCharacter(ch),
                    start,
                    start + ch.len_utf8(),
                ));
            }
        };

        Ok(token)
    }

    /// Consume whitespace and comments.
    fn skip_whitespace(&mut self, start: usize) -> Result<(), WithSpan<error::Kind>> {
        loop {
            match self.it.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.it.next();
                }

                Some('/') => {
                    let Some(slash) = self.it.next() else {
                        unreachable!("character was peeked");
                    };
                    if self.it.next_if_eq('/') {
                        while let Some((_, ch)) = self.it.next() {
                            if ch == '\n' {
                                break;
                            }
                        }
                    } else if self.it.next_if_eq('*') {
                        let mut closed = false;
                        while let Some((_, ch)) = self.it.next() {
                            if ch == '*' && self.it.next_if_eq('/') {
                                closed = true;
                                break;
                            }
                        }
                        if !closed {
                            return Err(WithSpan::new(
                                error::Kind::UnterminatedComment,
                                slash.0,
                                self.it.offset(),
                            ));
                        }
                    } else {
                        self.it
                            .push_back(slash)
                            .map_err(|kind| WithSpan::at(kind, start))?;
                        return Ok(());
                    }
                }

                _ => return Ok(()),
            }
        }
    }

    /// Scan the body of a quoted string, decoding escapes.
    fn scan_quoted(&mut self, start: usize, quote: char) -> Result<String, WithSpan<error::Kind>> {
        let mut value = String::new();
        loop {
            let Some((idx, ch)) = self.it.next() else {
                return Err(WithSpan::new(
                    error::Kind::UnterminatedString,
                    start,
                    self.it.offset(),
                ));
            };

            if ch == quote {
                return Ok(value);
            } else if ch != '\\' {
                value.push(ch);
                continue;
            }

            let Some((_, escape)) = self.it.next() else {
                return Err(WithSpan::new(
                    error::Kind::UnterminatedString,
                    start,
                    self.it.offset(),
                ));
            };
            match escape {
                'b' => value.push('\u{8}'),
                'f' => value.push('\u{c}'),
                'r' => value.push('\r'),
                'n' => value.push('\n'),
                't' => value.push('\t'),
                '\\' | '\'' | '"' | '/' => value.push(escape),
                '\n' => {}
                '\r' => {
                    self.it.next_if_eq('\n');
                }
                'u' => {
                    let mut hex = String::with_capacity(4);
                    for _ in 0..4 {
                        match self.it.next_if(|ch| ch.is_ascii_hexdigit()) {
                            Some((_, digit)) => hex.push(digit),
                            None => break,
                        }
                    }
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 4)
                        .and_then(char::from_u32);
                    let Some(decoded) = decoded else {
                        return Err(WithSpan::new(
                            error::Kind::InvalidEscape('u'),
                            idx,
                            self.it.offset(),
                        ));
                    };
                    value.push(decoded);
                }
                escape => {
                    return Err(WithSpan::new(
                        error::Kind::InvalidEscape(escape),
                        idx,
                        self.it.offset(),
                    ));
                }
            }
        }
    }

    /// Scan text up to the closing delimiter without escape processing.
    fn scan_raw(&mut self, start: usize, delimiter: char) -> Result<String, WithSpan<error::Kind>> {
        let mut value = String::new();
        for (_, ch) in self.it.by_ref() {
            if ch == delimiter {
                return Ok(value);
            }
            value.push(ch);
        }

        Err(WithSpan::new(
            error::Kind::UnterminatedString,
            start,
            self.it.offset(),
        ))
    }

    fn scan_number(&mut self, start: usize, first: char) -> Result<Number, WithSpan<error::Kind>> {
        let invalid = |end: usize| WithSpan::new(error::Kind::InvalidNumber, start, end);

        if first == '0' && self.it.next_if(|ch| ch == 'x' || ch == 'X').is_some() {
            let mut digits = String::new();
            self.next_while(|ch| ch.is_ascii_hexdigit(), &mut digits);
            return i64::from_str_radix(&digits, 16)
                .map(Number::Int)
                .map_err(|_| invalid(self.it.offset()));
        }

        let mut text = String::from(first);
        self.next_while(|ch| ch.is_ascii_digit(), &mut text);
        let mut float = false;

        if let Some(dot) = self.it.next_if(|ch| ch == '.') {
            if self.it.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                text.push('.');
                self.next_while(|ch| ch.is_ascii_digit(), &mut text);
                float = true;
            } else {
                // member access on an integer, e.g. `1.toString()`
                self.it
                    .push_back(dot)
                    .map_err(|kind| WithSpan::at(kind, dot.0))?;
            }
        }

        if let Some(marker) = self.it.next_if(|ch| ch == 'e' || ch == 'E') {
            let sign = self.it.next_if(|ch| ch == '+' || ch == '-');
            if self.it.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                text.push('e');
                if let Some((_, sign)) = sign {
                    text.push(sign);
                }
                self.next_while(|ch| ch.is_ascii_digit(), &mut text);
                float = true;
            } else {
                if let Some(sign) = sign {
                    self.it
                        .push_back(sign)
                        .map_err(|kind| WithSpan::at(kind, sign.0))?;
                }
                self.it
                    .push_back(marker)
                    .map_err(|kind| WithSpan::at(kind, marker.0))?;
            }
        }

        let end = self.it.offset();
        if float {
            text.parse::<f64>()
                .map(Number::Float)
                .map_err(|_| invalid(end))
        } else {
            text.parse::<i64>()
                .map(Number::Int)
                .map_err(|_| invalid(end))
        }
    }
}

pub mod error {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub enum Kind {
        /// An invalid charater was encountered.
        #[error("unexpected character `{0}`")]
        UnexpectedCharacter(char),

        /// A string was opened, but not closed before the end of the input.
        #[error("unterminated string")]
        UnterminatedString,

        /// A block comment was opened, but not closed before the end of the input.
        #[error("unterminated comment")]
        UnterminatedComment,

        /// Unknown or malformed escape sequence.
        /// e.g. `"\q"`, `"\u12"`
        #[error("invalid escape sequence `\\{0}`")]
        InvalidEscape(char),

        /// Number can not be represented.
        /// e.g. `0x`, `99999999999999999999`
        #[error("invalid number")]
        InvalidNumber,

        /// Too many characters were pushed back to the scanner.
        #[error("scanner pushback overflow")]
        PushbackOverflow,
    }

    impl Kind {
        pub fn message_key(&self) -> &'static str {
            match self {
                Self::UnexpectedCharacter(_) => "lex.unexpected_character",
                Self::UnterminatedString => "lex.unterminated_string",
                Self::UnterminatedComment => "lex.unterminated_comment",
                Self::InvalidEscape(_) => "lex.invalid_escape",
                Self::InvalidNumber => "lex.invalid_number",
                Self::PushbackOverflow => "lex.pushback_overflow",
            }
        }

        pub fn args(&self) -> Vec<String> {
            match self {
                Self::UnexpectedCharacter(ch) | Self::InvalidEscape(ch) => vec![ch.to_string()],
                _ => vec![],
            }
        }
    }
}
