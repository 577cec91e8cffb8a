//! Syntax tree of compiled expressions.
//!
//! Nodes are immutable once parsed. The only interior state is the
//! member caches of nodes that resolve members dynamically.
use super::{debug::DebugContext, position::LineSpan};
use crate::{
    cache::SnapshotCache,
    types::{Constructor, Method, Property, Type, TypeId},
    value::Value,
};
use regex::Regex;
use std::{fmt, sync::Arc};

/// Resolved members of a node, keyed by the receiver's type.
pub type MemberCache<V> = SnapshotCache<MemberKey, V>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub ty: TypeId,
    pub name: String,
    pub arity: usize,
}

impl MemberKey {
    pub fn new(ty: &Type, name: impl Into<String>, arity: usize) -> Self {
        Self {
            ty: ty.id(),
            name: name.into(),
            arity,
        }
    }
}

#[derive(Debug, derive_more::From)]
pub enum Expr {
    Constant(Value),
    Variable(ExprVariable),
    Assign(ExprAssign),
    Ref(ExprRef),
    Unary(ExprUnary),
    Binary(ExprBinary),
    Ternary(ExprTernary),
    Elvis(ExprElvis),
    Track(ExprTrack),
    Select(ExprSelect),
    Project(ExprProject),
    List(ExprList),
    Map(ExprMap),
    Property(ExprProperty),
    PropertySet(ExprPropertySet),
    Index(ExprIndex),
    IndexSet(ExprIndexSet),
    Method(ExprMethod),
    New(ExprNew),
    Cast(ExprCast),
    TypeRef(ExprTypeRef),
    InstanceOf(ExprInstanceOf),
    Like(ExprLike),
    Sequence(ExprSequence),
    If(ExprIf),
    While(ExprWhile),
    For(ExprFor),
    Return(ExprReturn),
    Jump(Jump),
    Group(ExprGroup),
    Lambda(ExprLambda),
    Debug(ExprDebug),
}

impl Expr {
    /// The node without debug wrappers.
    pub fn peel(&self) -> &Expr {
        match self {
            Self::Debug(debug) => debug.inner.peel(),
            expr => expr,
        }
    }
}

/// `$name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprVariable {
    pub name: String,
    pub slot: usize,
}

/// `$name = value`
#[derive(Debug)]
pub struct ExprAssign {
    pub var: ExprVariable,
    pub value: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprRef {
    /// `$context` or `$`
    Context,
    /// `$root`
    Root,
    /// `$self`
    This,
}

#[derive(Debug)]
pub struct ExprUnary {
    pub op: OpUnary,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpUnary {
    Plus,
    Minus,
    Not,
    BitNot,
}

impl OpUnary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Not => "!",
            Self::BitNot => "~",
        }
    }
}

#[derive(Debug)]
pub struct ExprBinary {
    pub op: OpBinary,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpBinary {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Eq,
    Neq,
    BitAnd,
    Xor,
    BitOr,
    And,
    Or,
}

impl OpBinary {
    /// Binding strength, higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Mul | Self::Div | Self::Rem => 10,
            Self::Add | Self::Sub => 9,
            Self::Shl | Self::Shr | Self::UShr => 8,
            Self::Lt | Self::Lte | Self::Gt | Self::Gte | Self::In | Self::NotIn => 7,
            Self::Eq | Self::Neq => 6,
            Self::BitAnd => 5,
            Self::Xor => 4,
            Self::BitOr => 3,
            Self::And => 2,
            Self::Or => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::UShr => ">>>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::BitAnd => "&",
            Self::Xor => "^",
            Self::BitOr => "|",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl fmt::Display for OpBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `cond ? then : otherwise`
#[derive(Debug)]
pub struct ExprTernary {
    pub cond: Box<Expr>,
    pub then: Box<Expr>,
    pub otherwise: Box<Expr>,
}

/// `left ?: right`
#[derive(Debug)]
pub struct ExprElvis {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

/// `left.right` or `left?.right`.
/// `right` is evaluated with `self` bound to the value of `left`.
#[derive(Debug)]
pub struct ExprTrack {
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub null_safe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// `^[..]`
    First,
    /// `&[..]`
    Last,
    /// `~[..]`
    All,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "^[",
            Self::Last => "&[",
            Self::All => "~[",
        }
    }
}

/// Filter the elements of `self`.
#[derive(Debug)]
pub struct ExprSelect {
    pub kind: Selection,
    pub filter: Box<Expr>,
}

/// `![expr]`, map the elements of `self`.
#[derive(Debug)]
pub struct ExprProject {
    pub expr: Box<Expr>,
}

#[derive(Debug)]
pub struct ExprList {
    pub items: Vec<Expr>,
}

#[derive(Debug)]
pub struct ExprMap {
    pub entries: Vec<(Expr, Expr)>,
}

/// Where a member is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    /// On the current `self`.
    Instance,
    /// Static member of the named type.
    Static(String),
}

#[derive(Debug)]
pub struct ExprProperty {
    pub receiver: Receiver,
    pub name: String,
    /// Bare identifier, external variables are consulted first.
    pub rooted: bool,
    pub cache: MemberCache<Property>,
}

#[derive(Debug)]
pub struct ExprPropertySet {
    /// Receiver expression, `self` if `None`.
    pub target: Option<Box<Expr>>,
    pub receiver: Receiver,
    pub name: String,
    pub value: Box<Expr>,
    pub null_safe: bool,
    pub cache: MemberCache<Property>,
}

/// `[key]` on `self`.
/// Non-collection receivers are read by property name.
#[derive(Debug)]
pub struct ExprIndex {
    pub key: Box<Expr>,
    pub cache: MemberCache<Property>,
}

/// `target[key] = value`.
/// `key` is evaluated with `self` bound to the target.
#[derive(Debug)]
pub struct ExprIndexSet {
    pub target: Box<Expr>,
    pub key: Box<Expr>,
    pub value: Box<Expr>,
    pub cache: MemberCache<Property>,
}

#[derive(Debug)]
pub struct ExprMethod {
    pub receiver: Receiver,
    pub name: String,
    pub args: Vec<Expr>,
    pub cache: MemberCache<Arc<Method>>,
}

/// `new @Type@(args)`
#[derive(Debug)]
pub struct ExprNew {
    pub ty: String,
    pub args: Vec<Expr>,
    pub cache: MemberCache<Arc<Constructor>>,
}

/// `@Type@(expr)`
#[derive(Debug)]
pub struct ExprCast {
    pub ty: String,
    pub expr: Box<Expr>,
}

/// `@Type@`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprTypeRef {
    pub name: String,
}

/// `expr is ty`
#[derive(Debug)]
pub struct ExprInstanceOf {
    pub expr: Box<Expr>,
    pub ty: Box<Expr>,
}

/// `expr like pattern`
#[derive(Debug)]
pub struct ExprLike {
    pub expr: Box<Expr>,
    pub pattern: Box<Expr>,
    /// Compiled pattern, if it is a literal.
    pub regex: Option<Regex>,
}

/// Compile a pattern that must match the whole input.
pub fn full_match(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

#[derive(Debug)]
pub struct ExprSequence {
    pub exprs: Vec<Expr>,
}

#[derive(Debug)]
pub struct ExprIf {
    pub cond: Box<Expr>,
    pub then: Box<Expr>,
    pub otherwise: Option<Box<Expr>>,
}

#[derive(Debug)]
pub struct ExprWhile {
    pub cond: Box<Expr>,
    pub body: Box<Expr>,
}

/// `for($var : iterable) { body }`
#[derive(Debug)]
pub struct ExprFor {
    pub var: ExprVariable,
    pub iterable: Box<Expr>,
    pub body: Box<Expr>,
}

#[derive(Debug)]
pub struct ExprReturn {
    pub value: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    Break,
    Continue,
}

/// `(expr)`
#[derive(Debug)]
pub struct ExprGroup {
    pub expr: Box<Expr>,
}

/// `fn($a, $b) { body }`
#[derive(Debug)]
pub struct ExprLambda {
    pub params: Vec<ExprVariable>,
    pub body: Arc<Expr>,
}

/// Instrumentation around a node.
#[derive(Debug)]
pub struct ExprDebug {
    pub inner: Box<Expr>,
    pub span: LineSpan,
    pub ctx: DebugContext,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => fmt_constant(value, f),
            Self::Variable(var) => write!(f, "${}", var.name),
            Self::Assign(expr) => write!(f, "${} = {}", expr.var.name, expr.value),
            Self::Ref(ExprRef::Context) => write!(f, "$context"),
            Self::Ref(ExprRef::Root) => write!(f, "$root"),
            Self::Ref(ExprRef::This) => write!(f, "$self"),
            Self::Unary(expr) => write!(f, "({}{})", expr.op.as_str(), expr.expr),
            Self::Binary(expr) => write!(f, "({} {} {})", expr.left, expr.op, expr.right),
            Self::Ternary(expr) => {
                write!(f, "({} ? {} : {})", expr.cond, expr.then, expr.otherwise)
            }
            Self::Elvis(expr) => write!(f, "({} ?: {})", expr.left, expr.right),
            Self::Track(expr) => {
                write!(f, "{}", expr.left)?;
                match expr.right.peel() {
                    Self::Index(index) => write!(f, "[{}]", index.key),
                    right @ (Self::Select(_) | Self::Project(_)) => write!(f, "{right}"),
                    right if expr.null_safe => write!(f, "?.{right}"),
                    right => write!(f, ".{right}"),
                }
            }
            Self::Select(expr) => write!(f, "{}{}]", expr.kind.as_str(), expr.filter),
            Self::Project(expr) => write!(f, "![{}]", expr.expr),
            Self::List(expr) => {
                write!(f, "[")?;
                fmt_list(&expr.items, f)?;
                write!(f, "]")
            }
            Self::Map(expr) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in expr.entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Property(expr) => match &expr.receiver {
                Receiver::Instance => write!(f, "{}", expr.name),
                Receiver::Static(ty) => write!(f, "@{ty}@.{}", expr.name),
            },
            Self::PropertySet(expr) => {
                match (&expr.target, &expr.receiver) {
                    (_, Receiver::Static(ty)) => write!(f, "@{ty}@.")?,
                    (Some(target), _) if expr.null_safe => write!(f, "{target}?.")?,
                    (Some(target), _) => write!(f, "{target}.")?,
                    (None, Receiver::Instance) => {}
                }
                write!(f, "{} = {}", expr.name, expr.value)
            }
            Self::Index(expr) => write!(f, "$self[{}]", expr.key),
            Self::IndexSet(expr) => write!(f, "{}[{}] = {}", expr.target, expr.key, expr.value),
            Self::Method(expr) => {
                if let Receiver::Static(ty) = &expr.receiver {
                    write!(f, "@{ty}@.")?;
                }
                write!(f, "{}(", expr.name)?;
                fmt_list(&expr.args, f)?;
                write!(f, ")")
            }
            Self::New(expr) => {
                write!(f, "new @{}@(", expr.ty)?;
                fmt_list(&expr.args, f)?;
                write!(f, ")")
            }
            Self::Cast(expr) => write!(f, "@{}@({})", expr.ty, expr.expr),
            Self::TypeRef(expr) => write!(f, "@{}@", expr.name),
            Self::InstanceOf(expr) => write!(f, "({} is {})", expr.expr, expr.ty),
            Self::Like(expr) => write!(f, "({} like {})", expr.expr, expr.pattern),
            Self::Sequence(expr) => {
                for (idx, expr) in expr.exprs.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{expr}")?;
                }
                Ok(())
            }
            Self::If(expr) => {
                write!(f, "if ({}) ", expr.cond)?;
                fmt_block(&expr.then, f)?;
                if let Some(otherwise) = &expr.otherwise {
                    write!(f, " else ")?;
                    fmt_block(otherwise, f)?;
                }
                Ok(())
            }
            Self::While(expr) => {
                write!(f, "while ({}) ", expr.cond)?;
                fmt_block(&expr.body, f)
            }
            Self::For(expr) => {
                write!(f, "for (${} : {}) ", expr.var.name, expr.iterable)?;
                fmt_block(&expr.body, f)
            }
            Self::Return(expr) => match &expr.value {
                Some(value) => write!(f, "return {value}"),
                None => write!(f, "return"),
            },
            Self::Jump(Jump::Break) => write!(f, "break"),
            Self::Jump(Jump::Continue) => write!(f, "continue"),
            Self::Group(expr) => write!(f, "({})", expr.expr),
            Self::Lambda(expr) => {
                write!(f, "fn(")?;
                for (idx, param) in expr.params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "${}", param.name)?;
                }
                write!(f, ") ")?;
                fmt_block(&expr.body, f)
            }
            Self::Debug(expr) => write!(f, "{}", expr.inner),
        }
    }
}

fn fmt_constant(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::String(text) => fmt_quoted(text, f),
        Value::Char(ch) => fmt_quoted(&ch.to_string(), f),
        // Forms the parser reads back to the same value.
        Value::Float(value) if value.is_nan() => write!(f, "(0.0 / 0.0)"),
        Value::Float(value) if value.is_infinite() && *value > 0.0 => write!(f, "1e999"),
        Value::Float(value) if value.is_infinite() => write!(f, "(-1e999)"),
        value => write!(f, "{value}"),
    }
}

fn fmt_quoted(text: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "\"")?;
    for ch in text.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            ch => write!(f, "{ch}")?,
        }
    }
    write!(f, "\"")
}

fn fmt_list(items: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn fmt_block(body: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match body.peel() {
        Expr::Sequence(seq) if seq.exprs.is_empty() => write!(f, "{{}}"),
        body => write!(f, "{{ {body} }}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn int(value: i64) -> Box<Expr> {
        Box::new(Expr::Constant(Value::Int(value)))
    }

    #[test]
    fn precedence_tiers() {
        assert!(OpBinary::Mul.precedence() > OpBinary::Add.precedence());
        assert!(OpBinary::Add.precedence() > OpBinary::Shl.precedence());
        assert!(OpBinary::In.precedence() > OpBinary::Eq.precedence());
        assert!(OpBinary::BitAnd.precedence() > OpBinary::Xor.precedence());
        assert!(OpBinary::BitOr.precedence() > OpBinary::And.precedence());
        assert_eq!(OpBinary::Or.precedence(), 1);
    }

    #[test]
    fn display() {
        let expr: Expr = ExprBinary {
            op: OpBinary::Add,
            left: int(1),
            right: Box::new(
                ExprBinary {
                    op: OpBinary::Mul,
                    left: int(2),
                    right: int(3),
                }
                .into(),
            ),
        }
        .into();
        assert_eq!(expr.to_string(), "(1 + (2 * 3))");

        let expr = Expr::Constant(Value::string("a\"b\n"));
        assert_eq!(expr.to_string(), r#""a\"b\n""#);

        assert_eq!(Expr::Constant(Value::Float(f64::INFINITY)).to_string(), "1e999");
        assert_eq!(Expr::Constant(Value::Float(f64::NEG_INFINITY)).to_string(), "(-1e999)");
        assert_eq!(Expr::Constant(Value::Float(f64::NAN)).to_string(), "(0.0 / 0.0)");

        let expr: Expr = ExprTrack {
            left: Box::new(
                ExprVariable {
                    name: "list".to_string(),
                    slot: 0,
                }
                .into(),
            ),
            right: Box::new(
                ExprSelect {
                    kind: Selection::All,
                    filter: Box::new(Expr::Ref(ExprRef::This)),
                }
                .into(),
            ),
            null_safe: false,
        }
        .into();
        assert_eq!(expr.to_string(), "$list~[$self]");
    }

    #[test]
    fn full_match_anchors() {
        let regex = full_match("a|b").unwrap();
        assert!(regex.is_match("a"));
        assert!(!regex.is_match("ab"));
    }
}
