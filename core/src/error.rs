use crate::expr::{
    lex,
    parse,
    position::{LineCol, Span},
};

/// Error raised while compiling or evaluating.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid source text.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// A type name could not be resolved.
    #[error("unknown type `{0}`")]
    UnresolvedType(String),

    /// No getter, setter, or field with the name.
    #[error("no property `{name}` on `{ty}`")]
    UnresolvedProperty { ty: String, name: String },

    /// No method with the name and arity.
    #[error("no method `{name}` taking {arity} argument(s) on `{ty}`")]
    UnresolvedMethod {
        ty: String,
        name: String,
        arity: usize,
    },

    /// No constructor with the arity.
    #[error("no constructor taking {arity} argument(s) on `{ty}`")]
    UnresolvedConstructor { ty: String, arity: usize },

    /// A member was accessed on `null`.
    #[error("can not access `{member}` on null")]
    NullReceiver { member: String },

    /// A host member reported a failure.
    #[error("`{member}` failed: {message}")]
    Invocation { member: String, message: String },

    /// A value could not be converted to the requested type.
    #[error("can not convert `{value}` to `{target}`")]
    Conversion { value: String, target: String },

    /// Could not evaluate operation due to invalid operands.
    #[error("{0}")]
    InvalidOperation(String),

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    /// Number overflow.
    #[error("numeric overflow")]
    Overflow,

    /// Divide by 0.
    #[error("division by zero")]
    Div0,

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// An error raised under a debug wrapper, with the call stack at the time.
    #[error("{source}\n{trace}")]
    Traced { trace: String, source: Box<Error> },
}

impl Error {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    pub fn invocation(member: impl Into<String>, message: impl ToString) -> Self {
        Self::Invocation {
            member: member.into(),
            message: message.to_string(),
        }
    }

    pub fn conversion(value: impl ToString, target: impl Into<String>) -> Self {
        Self::Conversion {
            value: value.to_string(),
            target: target.into(),
        }
    }

    /// If the error already carries a call stack.
    pub fn is_traced(&self) -> bool {
        matches!(self, Self::Traced { .. })
    }

    /// The error without any call stack.
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Traced { source, .. } => source.root_cause(),
            err => err,
        }
    }

    /// Key for a localized rendering of the message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Syntax(err) => err.kind.message_key(),
            Self::UnresolvedType(_) => "runtime.unresolved_type",
            Self::UnresolvedProperty { .. } => "runtime.unresolved_property",
            Self::UnresolvedMethod { .. } => "runtime.unresolved_method",
            Self::UnresolvedConstructor { .. } => "runtime.unresolved_constructor",
            Self::NullReceiver { .. } => "runtime.null_receiver",
            Self::Invocation { .. } => "runtime.invocation",
            Self::Conversion { .. } => "runtime.conversion",
            Self::InvalidOperation(_) => "runtime.invalid_operation",
            Self::IndexOutOfBounds { .. } => "runtime.index_out_of_bounds",
            Self::Overflow => "runtime.overflow",
            Self::Div0 => "runtime.div0",
            Self::Template(err) => match err {
                TemplateError::Unterminated(_) => "template.unterminated",
                TemplateError::Unknown(_) => "template.unknown",
                TemplateError::TooDeep(_) => "template.too_deep",
            },
            Self::Traced { source, .. } => source.message_key(),
        }
    }

    /// Positional arguments for the localized message.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Syntax(err) => {
                let mut args = err.kind.args();
                args.push(err.position.line.to_string());
                args.push(err.position.col.to_string());
                args
            }
            Self::UnresolvedType(name) => vec![name.clone()],
            Self::UnresolvedProperty { ty, name } => vec![ty.clone(), name.clone()],
            Self::UnresolvedMethod { ty, name, arity } => {
                vec![ty.clone(), name.clone(), arity.to_string()]
            }
            Self::UnresolvedConstructor { ty, arity } => vec![ty.clone(), arity.to_string()],
            Self::NullReceiver { member } => vec![member.clone()],
            Self::Invocation { member, message } => vec![member.clone(), message.clone()],
            Self::Conversion { value, target } => vec![value.clone(), target.clone()],
            Self::InvalidOperation(message) => vec![message.clone()],
            Self::IndexOutOfBounds { index, len } => vec![index.to_string(), len.to_string()],
            Self::Overflow | Self::Div0 => vec![],
            Self::Template(err) => match err {
                TemplateError::Unterminated(pos) => vec![pos.to_string()],
                TemplateError::Unknown(name) => vec![name.clone()],
                TemplateError::TooDeep(depth) => vec![depth.to_string()],
            },
            Self::Traced { source, .. } => source.args(),
        }
    }
}

/// Compile-time error with its source position.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} at {position}\n{snippet}")]
pub struct SyntaxError {
    pub kind: SyntaxKind,
    pub span: Span,
    pub position: LineCol,
    /// Source around the error with a caret under it.
    pub snippet: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyntaxKind {
    #[error(transparent)]
    Lex(#[from] lex::error::Kind),
    #[error(transparent)]
    Parse(#[from] parse::error::Kind),
}

impl SyntaxKind {
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Lex(kind) => kind.message_key(),
            Self::Parse(kind) => kind.message_key(),
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Lex(kind) => kind.args(),
            Self::Parse(kind) => kind.args(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    /// A start delimiter without a matching end delimiter.
    #[error("unterminated template expression starting at {0}")]
    Unterminated(LineCol),

    /// `@template(name)` referenced an unregistered template.
    #[error("unknown template `{0}`")]
    Unknown(String),

    /// `@template(name)` inlining went deeper than allowed.
    #[error("templates nested deeper than {0}")]
    TooDeep(usize),
}
