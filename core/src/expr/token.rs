use std::fmt;

/// Reserved words.
/// Recognized by the parser, the tokenizer reports them as identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Keyword {
    True,
    False,
    Null,
    New,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Fn,
    And,
    Or,
    Not,
    In,
    Is,
    Like,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Band,
    Bor,
    Xor,
    Shl,
    Shr,
    Ushr,
    Bnot,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::New => "new",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::Return => "return",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Fn => "fn",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::In => "in",
            Self::Is => "is",
            Self::Like => "like",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Band => "band",
            Self::Bor => "bor",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ushr => "ushr",
            Self::Bnot => "bnot",
        }
    }

    pub fn from_str(value: impl AsRef<str>) -> Option<Self> {
        match value.as_ref() {
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            "null" => Some(Self::Null),
            "new" => Some(Self::New),
            "if" => Some(Self::If),
            "else" => Some(Self::Else),
            "while" => Some(Self::While),
            "for" => Some(Self::For),
            "return" => Some(Self::Return),
            "break" => Some(Self::Break),
            "continue" => Some(Self::Continue),
            "fn" => Some(Self::Fn),
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "not" => Some(Self::Not),
            "in" => Some(Self::In),
            "is" => Some(Self::Is),
            "like" => Some(Self::Like),
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "add" => Some(Self::Add),
            "sub" => Some(Self::Sub),
            "mul" => Some(Self::Mul),
            "div" => Some(Self::Div),
            "rem" => Some(Self::Rem),
            "band" => Some(Self::Band),
            "bor" => Some(Self::Bor),
            "xor" => Some(Self::Xor),
            "shl" => Some(Self::Shl),
            "shr" => Some(Self::Shr),
            "ushr" => Some(Self::Ushr),
            "bnot" => Some(Self::Bnot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    /// Quoted or raw string literal, already decoded.
    String {
        value: String,
        delimiter: StringDelimiter,
    },
    /// `@name@`
    ClassString(String),
    /// `` `text` ``
    TemplateString(String),
    Number(Number),
    Symbol(Symbol),
    /// Whitespace and comments.
    Whitespace,
}

impl Token {
    pub fn is_symbol(&self, symbol: Symbol) -> bool {
        matches!(self, Self::Symbol(s) if *s == symbol)
    }

    /// Identifier text, if the token is one.
    pub fn as_identifier(&self) -> Option<&str> {
        if let Self::Identifier(name) = self {
            Some(name)
        } else {
            None
        }
    }

    pub fn keyword(&self) -> Option<Keyword> {
        self.as_identifier().and_then(Keyword::from_str)
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.keyword() == Some(keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(name) => write!(f, "{name}"),
            Self::String { value, delimiter } => {
                let delimiter = delimiter.as_char();
                write!(f, "{delimiter}{value}{delimiter}")
            }
            Self::ClassString(value) => write!(f, "@{value}@"),
            Self::TemplateString(value) => write!(f, "`{value}`"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Symbol(symbol) => write!(f, "{}", symbol.as_str()),
            Self::Whitespace => write!(f, " "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StringDelimiter {
    /// `'`
    QuoteSingle,
    /// `"`
    QuoteDouble,
    /// `\`, no escape processing.
    Raw,
}

impl StringDelimiter {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '\'' => Some(Self::QuoteSingle),
            '"' => Some(Self::QuoteDouble),
            '\\' => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::QuoteSingle => '\'',
            Self::QuoteDouble => '"',
            Self::Raw => '\\',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Symbol {
    /// `(`
    ParenLeft,
    /// `)`
    ParenRight,
    /// `[`
    BracketLeft,
    /// `]`
    BracketRight,
    /// `{`
    BraceLeft,
    /// `}`
    BraceRight,
    Comma,
    Semicolon,
    Colon,
    Dot,
    /// `?.`
    QuestionDot,
    Question,
    /// `?:`
    Elvis,
    Dollar,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Less,
    LessEqual,
    /// `<<`
    Shl,
    Greater,
    GreaterEqual,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Tilde,
    /// `~[`
    SelectAll,
    /// `^[`
    SelectFirst,
    /// `&[`
    SelectLast,
    /// `![`
    Project,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParenLeft => "(",
            Self::ParenRight => ")",
            Self::BracketLeft => "[",
            Self::BracketRight => "]",
            Self::BraceLeft => "{",
            Self::BraceRight => "}",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::Dot => ".",
            Self::QuestionDot => "?.",
            Self::Question => "?",
            Self::Elvis => "?:",
            Self::Dollar => "$",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
            Self::BangEqual => "!=",
            Self::Equal => "=",
            Self::EqualEqual => "==",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Shl => "<<",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Shr => ">>",
            Self::UShr => ">>>",
            Self::Amp => "&",
            Self::AmpAmp => "&&",
            Self::Pipe => "|",
            Self::PipePipe => "||",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::SelectAll => "~[",
            Self::SelectFirst => "^[",
            Self::SelectLast => "&[",
            Self::Project => "![",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keywords_round_trip() {
        for word in ["true", "fn", "ushr", "bnot", "continue", "like"] {
            let keyword = Keyword::from_str(word).unwrap();
            assert_eq!(keyword.as_str(), word);
        }
        assert!(Keyword::from_str("True").is_none());
        assert!(Token::Identifier("else".to_string()).is_keyword(Keyword::Else));
    }
}
