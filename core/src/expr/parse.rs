//! Recursive descent parser.
//!
//! Statements and expressions are parsed top down. Binary operators are
//! collected into a flat sequence first, then folded by precedence.
use super::{
    Compiler,
    ast::{self, Expr},
    context::ParseContext,
    lex::Tokenizer,
    position::{BytePos, LineSpan, Span, WithSpan},
    template,
    token::{Keyword, Number, Symbol, Token},
};
use crate::{Error, utils, value::Value};
use std::sync::Arc;

/// Parse a program.
/// Variables are allocated in `ctx`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
pub fn parse(src: &str, ctx: &ParseContext, compiler: &Compiler) -> Result<Expr, Error> {
    let mut parser = Parser::new(src, ctx.clone(), compiler);
    let exprs = parse_statements(&mut parser, None)?;
    if parser.peek()?.is_some() {
        return Err(parser.unexpected("end of input"));
    }
    Ok(into_sequence(exprs))
}

pub(crate) struct Parser<'a> {
    tokens: Tokenizer<'a>,
    ctx: ParseContext,
    compiler: &'a Compiler,

    /// End of the last consumed token.
    last_end: BytePos,

    /// If the last consumed token was `}`.
    last_brace: bool,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, ctx: ParseContext, compiler: &'a Compiler) -> Self {
        Self {
            tokens: Tokenizer::new(src),
            ctx,
            compiler,
            last_end: BytePos(0),
            last_brace: false,
        }
    }

    /// Next token, skipping whitespace.
    pub fn peek(&mut self) -> Result<Option<&Token>, Error> {
        Ok(self.tokens.peek_token(true)?.map(|token| &token.value))
    }

    pub fn next(&mut self) -> Result<Option<WithSpan<Token>>, Error> {
        let token = self.tokens.read_token(true)?;
        if let Some(token) = &token {
            self.last_end = token.span.end;
            self.last_brace = token.value.is_symbol(Symbol::BraceRight);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(?token);

        Ok(token)
    }

    /// Start of the next token.
    pub fn start(&mut self) -> Result<BytePos, Error> {
        self.peek()?;
        Ok(self.tokens.position())
    }

    pub fn at_symbol(&mut self, symbol: Symbol) -> Result<bool, Error> {
        Ok(self.peek()?.is_some_and(|token| token.is_symbol(symbol)))
    }

    pub fn at_keyword(&mut self, keyword: Keyword) -> Result<bool, Error> {
        Ok(self.peek()?.is_some_and(|token| token.is_keyword(keyword)))
    }

    /// Consume the symbol if it is next.
    pub fn eat_symbol(&mut self, symbol: Symbol) -> Result<bool, Error> {
        if self.at_symbol(symbol)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn eat_keyword(&mut self, keyword: Keyword) -> Result<bool, Error> {
        if self.at_keyword(keyword)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn expect_symbol(&mut self, symbol: Symbol) -> Result<(), Error> {
        if self.eat_symbol(symbol)? {
            Ok(())
        } else {
            Err(self.unexpected(format!("`{}`", symbol.as_str())))
        }
    }

    pub fn expect_identifier(&mut self) -> Result<String, Error> {
        if !matches!(self.peek()?, Some(Token::Identifier(_))) {
            return Err(self.unexpected("identifier"));
        }
        match self.next()? {
            Some(WithSpan {
                value: Token::Identifier(name),
                ..
            }) => Ok(name),
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Error for the next token not being what was expected.
    pub fn unexpected(&mut self, expected: impl Into<String>) -> Error {
        let found = match self.tokens.peek_token(true) {
            Ok(token) => token.map(|token| (token.value.to_string(), token.span)),
            Err(err) => return err.into(),
        };
        let expected = expected.into();
        match found {
            Some((found, span)) => self.error(error::Kind::UnexpectedToken { expected, found }, span),
            None => {
                let end = self.tokens.src().len();
                self.error(error::Kind::UnexpectedEndOfInput { expected }, Span::at(end))
            }
        }
    }

    /// Error for a consumed token.
    pub fn unexpected_token(&self, token: &WithSpan<Token>, expected: impl Into<String>) -> Error {
        self.error(
            error::Kind::UnexpectedToken {
                expected: expected.into(),
                found: token.value.to_string(),
            },
            token.span,
        )
    }

    pub fn error(&self, kind: error::Kind, span: Span) -> Error {
        self.tokens.error(kind, span).into()
    }

    /// Wrap the node for debugging if the compiler is debugging.
    /// The node covers `start` to the end of the last consumed token.
    pub fn wrap(&self, expr: Expr, start: BytePos) -> Expr {
        let Some(debug) = self.compiler.debug() else {
            return expr;
        };
        if matches!(expr, Expr::Debug(_)) {
            return expr;
        }

        let src = self.tokens.src();
        let end = BytePos(self.last_end.0.saturating_sub(1).max(start.0));
        ast::ExprDebug {
            inner: Box::new(expr),
            span: LineSpan::new(utils::line_col(src, start), utils::line_col(src, end)),
            ctx: debug.clone(),
        }
        .into()
    }
}

fn into_sequence(mut exprs: Vec<Expr>) -> Expr {
    if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        ast::ExprSequence { exprs }.into()
    }
}

fn at_end(parser: &mut Parser, terminator: Option<Symbol>) -> Result<bool, Error> {
    Ok(match parser.peek()? {
        None => true,
        Some(token) => terminator.is_some_and(|symbol| token.is_symbol(symbol)),
    })
}

/// Statements up to the end of input or the terminator, which is not consumed.
fn parse_statements(parser: &mut Parser, terminator: Option<Symbol>) -> Result<Vec<Expr>, Error> {
    let mut exprs = vec![];
    loop {
        while parser.eat_symbol(Symbol::Semicolon)? {}
        if at_end(parser, terminator)? {
            break;
        }

        exprs.push(parse_statement(parser)?);
        if parser.eat_symbol(Symbol::Semicolon)? {
            continue;
        }
        if at_end(parser, terminator)? {
            break;
        }
        if !parser.last_brace {
            return Err(parser.unexpected("`;`"));
        }
    }

    Ok(exprs)
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
fn parse_statement(parser: &mut Parser) -> Result<Expr, Error> {
    let start = parser.start()?;
    let keyword = parser.peek()?.and_then(Token::keyword);
    let expr = match keyword {
        Some(Keyword::Return) => {
            parser.next()?;
            let value = if at_end(parser, Some(Symbol::Semicolon))?
                || parser.at_symbol(Symbol::BraceRight)?
                || parser.at_symbol(Symbol::ParenRight)?
            {
                None
            } else {
                Some(Box::new(parse_complex(parser)?))
            };
            ast::ExprReturn { value }.into()
        }
        Some(Keyword::If) => parse_if(parser)?,
        Some(Keyword::While) => {
            parser.next()?;
            parser.expect_symbol(Symbol::ParenLeft)?;
            let cond = parse_complex(parser)?;
            parser.expect_symbol(Symbol::ParenRight)?;
            let body = parse_block(parser)?;
            ast::ExprWhile {
                cond: Box::new(cond),
                body: Box::new(body),
            }
            .into()
        }
        Some(Keyword::For) => parse_for(parser)?,
        Some(Keyword::Break) => {
            parser.next()?;
            ast::Jump::Break.into()
        }
        Some(Keyword::Continue) => {
            parser.next()?;
            ast::Jump::Continue.into()
        }
        _ => parse_complex(parser)?,
    };

    Ok(parser.wrap(expr, start))
}

fn parse_if(parser: &mut Parser) -> Result<Expr, Error> {
    parser.next()?;
    parser.expect_symbol(Symbol::ParenLeft)?;
    let cond = parse_complex(parser)?;
    parser.expect_symbol(Symbol::ParenRight)?;
    let then = parse_block(parser)?;
    let otherwise = if parser.eat_keyword(Keyword::Else)? {
        if parser.at_keyword(Keyword::If)? {
            Some(parse_if(parser)?)
        } else {
            Some(parse_block(parser)?)
        }
    } else {
        None
    };

    Ok(ast::ExprIf {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: otherwise.map(Box::new),
    }
    .into())
}

/// `for($x : expr) { .. }` or `for($x in expr) { .. }`
fn parse_for(parser: &mut Parser) -> Result<Expr, Error> {
    parser.next()?;
    parser.expect_symbol(Symbol::ParenLeft)?;
    let var = parse_variable_name(parser)?;
    if !parser.eat_symbol(Symbol::Colon)? && !parser.eat_keyword(Keyword::In)? {
        return Err(parser.unexpected("`:` or `in`"));
    }
    let iterable = parse_complex(parser)?;
    parser.expect_symbol(Symbol::ParenRight)?;
    let body = parse_block(parser)?;

    Ok(ast::ExprFor {
        var,
        iterable: Box::new(iterable),
        body: Box::new(body),
    }
    .into())
}

/// `{ statements }`
fn parse_block(parser: &mut Parser) -> Result<Expr, Error> {
    parser.expect_symbol(Symbol::BraceLeft)?;
    let exprs = parse_statements(parser, Some(Symbol::BraceRight))?;
    parser.expect_symbol(Symbol::BraceRight)?;
    Ok(ast::ExprSequence { exprs }.into())
}

/// `$name` where the name must follow the `$` directly.
fn parse_variable_name(parser: &mut Parser) -> Result<ast::ExprVariable, Error> {
    if !parser.at_symbol(Symbol::Dollar)? {
        return Err(parser.unexpected("variable"));
    }
    let Some(dollar) = parser.next()? else {
        return Err(parser.unexpected("variable"));
    };
    let Some(name) = parse_adjacent_identifier(parser, dollar.span.end)? else {
        return Err(parser.unexpected("variable name"));
    };

    let slot = parser.ctx.slot(&name);
    Ok(ast::ExprVariable { name, slot })
}

/// Consume an identifier starting exactly at `pos`.
fn parse_adjacent_identifier(parser: &mut Parser, pos: BytePos) -> Result<Option<String>, Error> {
    let adjacent = matches!(
        parser.tokens.peek_token(false)?,
        Some(WithSpan { value: Token::Identifier(_), span }) if span.start == pos
    );
    if !adjacent {
        return Ok(None);
    }

    match parser.next()? {
        Some(WithSpan {
            value: Token::Identifier(name),
            ..
        }) => Ok(Some(name)),
        _ => Ok(None),
    }
}

/// Binary group optionally followed by `? :`, `?:`, or `=`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
fn parse_complex(parser: &mut Parser) -> Result<Expr, Error> {
    let start = parser.start()?;
    let left = parse_binary_group(parser)?;

    if parser.eat_symbol(Symbol::Question)? {
        let then = parse_complex(parser)?;
        parser.expect_symbol(Symbol::Colon)?;
        let otherwise = parse_complex(parser)?;
        Ok(ast::ExprTernary {
            cond: Box::new(left),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
        .into())
    } else if parser.eat_symbol(Symbol::Elvis)? {
        let right = parse_complex(parser)?;
        Ok(ast::ExprElvis {
            left: Box::new(left),
            right: Box::new(right),
        }
        .into())
    } else if parser.eat_symbol(Symbol::Equal)? {
        let span = Span::new(start, parser.last_end);
        let value = parse_complex(parser)?;
        into_assignment(parser, left, value, span)
    } else {
        Ok(left)
    }
}

/// Turn the left side of `=` into an assignment.
fn into_assignment(parser: &Parser, target: Expr, value: Expr, span: Span) -> Result<Expr, Error> {
    let value = Box::new(value);
    match target {
        Expr::Debug(debug) => into_assignment(parser, *debug.inner, *value, span),
        Expr::Variable(var) => Ok(ast::ExprAssign { var, value }.into()),
        Expr::Property(prop) => Ok(ast::ExprPropertySet {
            target: None,
            receiver: prop.receiver,
            name: prop.name,
            value,
            null_safe: false,
            cache: Default::default(),
        }
        .into()),
        Expr::Track(track) => {
            let right = match *track.right {
                Expr::Debug(debug) => *debug.inner,
                right => right,
            };
            match right {
                Expr::Property(prop) if prop.receiver == ast::Receiver::Instance => {
                    Ok(ast::ExprPropertySet {
                        target: Some(track.left),
                        receiver: prop.receiver,
                        name: prop.name,
                        value,
                        null_safe: track.null_safe,
                        cache: Default::default(),
                    }
                    .into())
                }
                Expr::Index(index) => Ok(ast::ExprIndexSet {
                    target: track.left,
                    key: index.key,
                    value,
                    cache: Default::default(),
                }
                .into()),
                _ => Err(parser.error(error::Kind::InvalidAssignment, span)),
            }
        }
        _ => Err(parser.error(error::Kind::InvalidAssignment, span)),
    }
}

/// Binary operators as they appear in the flat sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Binary(ast::OpBinary),
    Like,
    Is,
}

impl Operator {
    fn precedence(&self) -> u8 {
        match self {
            Self::Binary(op) => op.precedence(),
            Self::Like | Self::Is => ast::OpBinary::Lt.precedence(),
        }
    }

    fn from_symbol(symbol: Symbol) -> Option<Self> {
        use ast::OpBinary;

        let op = match symbol {
            Symbol::Star => OpBinary::Mul,
            Symbol::Slash => OpBinary::Div,
            Symbol::Percent => OpBinary::Rem,
            Symbol::Plus => OpBinary::Add,
            Symbol::Minus => OpBinary::Sub,
            Symbol::Shl => OpBinary::Shl,
            Symbol::Shr => OpBinary::Shr,
            Symbol::UShr => OpBinary::UShr,
            Symbol::Less => OpBinary::Lt,
            Symbol::LessEqual => OpBinary::Lte,
            Symbol::Greater => OpBinary::Gt,
            Symbol::GreaterEqual => OpBinary::Gte,
            Symbol::EqualEqual => OpBinary::Eq,
            Symbol::BangEqual => OpBinary::Neq,
            Symbol::Amp => OpBinary::BitAnd,
            Symbol::Caret => OpBinary::Xor,
            Symbol::Pipe => OpBinary::BitOr,
            Symbol::AmpAmp => OpBinary::And,
            Symbol::PipePipe => OpBinary::Or,
            _ => return None,
        };
        Some(Self::Binary(op))
    }

    fn from_keyword(keyword: Keyword) -> Option<Self> {
        use ast::OpBinary;

        let op = match keyword {
            Keyword::Like => return Some(Self::Like),
            Keyword::Is => return Some(Self::Is),
            Keyword::And => OpBinary::And,
            Keyword::Or => OpBinary::Or,
            Keyword::In => OpBinary::In,
            Keyword::Eq => OpBinary::Eq,
            Keyword::Neq => OpBinary::Neq,
            Keyword::Lt => OpBinary::Lt,
            Keyword::Lte => OpBinary::Lte,
            Keyword::Gt => OpBinary::Gt,
            Keyword::Gte => OpBinary::Gte,
            Keyword::Add => OpBinary::Add,
            Keyword::Sub => OpBinary::Sub,
            Keyword::Mul => OpBinary::Mul,
            Keyword::Div => OpBinary::Div,
            Keyword::Rem => OpBinary::Rem,
            Keyword::Band => OpBinary::BitAnd,
            Keyword::Bor => OpBinary::BitOr,
            Keyword::Xor => OpBinary::Xor,
            Keyword::Shl => OpBinary::Shl,
            Keyword::Shr => OpBinary::Shr,
            Keyword::Ushr => OpBinary::UShr,
            _ => return None,
        };
        Some(Self::Binary(op))
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
fn parse_binary_group(parser: &mut Parser) -> Result<Expr, Error> {
    let mut operands = vec![parse_unary(parser)?];
    let mut operators = vec![];
    while let Some(op) = parse_operator(parser)? {
        operators.push(op);
        operands.push(parse_unary(parser)?);
    }

    fold(parser, operands, operators)
}

/// Consume a binary operator if one is next.
fn parse_operator(parser: &mut Parser) -> Result<Option<WithSpan<Operator>>, Error> {
    let op = match parser.peek()? {
        Some(Token::Symbol(symbol)) => Operator::from_symbol(*symbol),
        Some(Token::Identifier(name)) => match Keyword::from_str(name) {
            Some(Keyword::Not) => {
                let Some(not) = parser.next()? else {
                    return Ok(None);
                };
                if !parser.eat_keyword(Keyword::In)? {
                    return Err(parser.error(
                        error::Kind::UnknownOperator(Keyword::Not.as_str().to_string()),
                        not.span,
                    ));
                }
                let span = Span::new(not.span.start, parser.last_end);
                return Ok(Some(WithSpan {
                    value: Operator::Binary(ast::OpBinary::NotIn),
                    span,
                }));
            }
            Some(keyword) => Operator::from_keyword(keyword),
            None => {
                let name = name.clone();
                let start = parser.start()?;
                return Err(parser.error(
                    error::Kind::UnknownOperator(name.clone()),
                    Span::new(start, start + name.len()),
                ));
            }
        },
        _ => None,
    };

    let Some(op) = op else {
        return Ok(None);
    };
    let Some(token) = parser.next()? else {
        return Ok(None);
    };
    Ok(Some(WithSpan {
        value: op,
        span: token.span,
    }))
}

/// Repeatedly fold the leftmost operator of the strictly highest precedence
/// until a single operand remains.
fn fold(
    parser: &Parser,
    mut operands: Vec<Expr>,
    mut operators: Vec<WithSpan<Operator>>,
) -> Result<Expr, Error> {
    while !operators.is_empty() {
        let mut idx = 0;
        for (i, op) in operators.iter().enumerate().skip(1) {
            if op.value.precedence() > operators[idx].value.precedence() {
                idx = i;
            }
        }

        let op = operators.remove(idx);
        let right = operands.remove(idx + 1);
        let left = operands.remove(idx);
        operands.insert(idx, combine(parser, op, left, right)?);
    }

    Ok(operands.remove(0))
}

fn combine(parser: &Parser, op: WithSpan<Operator>, left: Expr, right: Expr) -> Result<Expr, Error> {
    let left = Box::new(left);
    let right = Box::new(right);
    match op.value {
        Operator::Binary(bin) => Ok(ast::ExprBinary {
            op: bin,
            left,
            right,
        }
        .into()),
        Operator::Is => Ok(ast::ExprInstanceOf {
            expr: left,
            ty: right,
        }
        .into()),
        Operator::Like => {
            let regex = match right.peel() {
                Expr::Constant(Value::String(pattern)) => {
                    let regex = ast::full_match(pattern).map_err(|err| {
                        parser.error(error::Kind::InvalidPattern(err.to_string()), op.span)
                    })?;
                    Some(regex)
                }
                _ => None,
            };
            Ok(ast::ExprLike {
                expr: left,
                pattern: right,
                regex,
            }
            .into())
        }
    }
}

fn parse_unary(parser: &mut Parser) -> Result<Expr, Error> {
    let op = match parser.peek()? {
        Some(Token::Symbol(Symbol::Plus)) => Some(ast::OpUnary::Plus),
        Some(Token::Symbol(Symbol::Minus)) => Some(ast::OpUnary::Minus),
        Some(Token::Symbol(Symbol::Bang)) => Some(ast::OpUnary::Not),
        Some(Token::Symbol(Symbol::Tilde)) => Some(ast::OpUnary::BitNot),
        Some(token) if token.is_keyword(Keyword::Not) => Some(ast::OpUnary::Not),
        Some(token) if token.is_keyword(Keyword::Bnot) => Some(ast::OpUnary::BitNot),
        _ => None,
    };

    match op {
        Some(op) => {
            parser.next()?;
            let expr = parse_unary(parser)?;
            Ok(ast::ExprUnary {
                op,
                expr: Box::new(expr),
            }
            .into())
        }
        None => parse_track(parser),
    }
}

/// A primary followed by `.`, `?.`, `[..]`, and selection or projection steps.
/// A chain may start with a step, which then applies to `self`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
fn parse_track(parser: &mut Parser) -> Result<Expr, Error> {
    let leading = matches!(
        parser.peek()?,
        Some(Token::Symbol(
            Symbol::Dot
                | Symbol::QuestionDot
                | Symbol::SelectAll
                | Symbol::SelectFirst
                | Symbol::SelectLast
                | Symbol::Project
        ))
    );
    let mut expr = if leading {
        ast::ExprRef::This.into()
    } else {
        parse_primary(parser)?
    };

    loop {
        let Some(Token::Symbol(symbol)) = parser.peek()? else {
            break;
        };
        let symbol = *symbol;
        let start = parser.start()?;
        let (right, null_safe) = match symbol {
            Symbol::Dot | Symbol::QuestionDot => {
                parser.next()?;
                (parse_member(parser)?, symbol == Symbol::QuestionDot)
            }
            Symbol::BracketLeft => {
                parser.next()?;
                let key = parse_complex(parser)?;
                parser.expect_symbol(Symbol::BracketRight)?;
                let index = ast::ExprIndex {
                    key: Box::new(key),
                    cache: Default::default(),
                };
                (index.into(), false)
            }
            Symbol::SelectAll | Symbol::SelectFirst | Symbol::SelectLast => {
                parser.next()?;
                let filter = parse_complex(parser)?;
                parser.expect_symbol(Symbol::BracketRight)?;
                let kind = match symbol {
                    Symbol::SelectFirst => ast::Selection::First,
                    Symbol::SelectLast => ast::Selection::Last,
                    _ => ast::Selection::All,
                };
                let select = ast::ExprSelect {
                    kind,
                    filter: Box::new(filter),
                };
                (select.into(), false)
            }
            Symbol::Project => {
                parser.next()?;
                let inner = parse_complex(parser)?;
                parser.expect_symbol(Symbol::BracketRight)?;
                let project = ast::ExprProject {
                    expr: Box::new(inner),
                };
                (project.into(), false)
            }
            _ => break,
        };

        expr = ast::ExprTrack {
            left: Box::new(expr),
            right: Box::new(parser.wrap(right, start)),
            null_safe,
        }
        .into();
    }

    Ok(expr)
}

/// Right hand side of `.` or `?.`.
fn parse_member(parser: &mut Parser) -> Result<Expr, Error> {
    if !matches!(parser.peek()?, Some(Token::Identifier(_))) {
        return parse_primary(parser);
    }

    let name = parser.expect_identifier()?;
    if parser.at_symbol(Symbol::ParenLeft)? {
        let args = parse_args(parser)?;
        Ok(ast::ExprMethod {
            receiver: ast::Receiver::Instance,
            name,
            args,
            cache: Default::default(),
        }
        .into())
    } else {
        Ok(ast::ExprProperty {
            receiver: ast::Receiver::Instance,
            name,
            rooted: false,
            cache: Default::default(),
        }
        .into())
    }
}

/// `(a, b, ..)`
fn parse_args(parser: &mut Parser) -> Result<Vec<Expr>, Error> {
    parser.expect_symbol(Symbol::ParenLeft)?;
    parse_items(parser, Symbol::ParenRight)
}

/// Comma separated expressions up to and including the closing symbol.
fn parse_items(parser: &mut Parser, close: Symbol) -> Result<Vec<Expr>, Error> {
    let mut items = vec![];
    if parser.eat_symbol(close)? {
        return Ok(items);
    }

    loop {
        items.push(parse_complex(parser)?);
        if parser.eat_symbol(Symbol::Comma)? {
            continue;
        }
        parser.expect_symbol(close)?;
        return Ok(items);
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
fn parse_primary(parser: &mut Parser) -> Result<Expr, Error> {
    if parser.peek()?.is_none() {
        return Err(parser.unexpected("expression"));
    }
    let Some(token) = parser.next()? else {
        return Err(parser.unexpected("expression"));
    };

    match token.value {
        Token::String { value, .. } => Ok(Expr::Constant(Value::String(value))),
        Token::Number(Number::Int(value)) => Ok(Expr::Constant(Value::Int(value))),
        Token::Number(Number::Float(value)) => Ok(Expr::Constant(Value::Float(value))),
        Token::ClassString(name) => parse_class(parser, name),
        Token::TemplateString(text) => {
            let acc = parser.ctx.unique("__out");
            let program = template::rewrite(&text, parser.compiler, &acc)?;
            let expr = parse(&program, &parser.ctx, parser.compiler)?;
            Ok(ast::ExprGroup {
                expr: Box::new(expr),
            }
            .into())
        }

        Token::Symbol(Symbol::ParenLeft) => {
            let exprs = parse_statements(parser, Some(Symbol::ParenRight))?;
            parser.expect_symbol(Symbol::ParenRight)?;
            Ok(ast::ExprGroup {
                expr: Box::new(into_sequence(exprs)),
            }
            .into())
        }
        Token::Symbol(Symbol::BracketLeft) => {
            let items = parse_items(parser, Symbol::BracketRight)?;
            Ok(ast::ExprList { items }.into())
        }
        Token::Symbol(Symbol::BraceLeft) => parse_map(parser),
        Token::Symbol(Symbol::Dollar) => {
            let Some(name) = parse_adjacent_identifier(parser, token.span.end)? else {
                return Ok(ast::ExprRef::Context.into());
            };
            Ok(match name.as_str() {
                "self" => ast::ExprRef::This.into(),
                "root" => ast::ExprRef::Root.into(),
                "context" => ast::ExprRef::Context.into(),
                _ => {
                    let slot = parser.ctx.slot(&name);
                    ast::ExprVariable { name, slot }.into()
                }
            })
        }

        Token::Identifier(ref name) => match Keyword::from_str(name) {
            Some(Keyword::True) => Ok(Expr::Constant(Value::Bool(true))),
            Some(Keyword::False) => Ok(Expr::Constant(Value::Bool(false))),
            Some(Keyword::Null) => Ok(Expr::Constant(Value::Null)),
            Some(Keyword::New) => parse_new(parser),
            Some(Keyword::Fn) => parse_lambda(parser),
            Some(_) => Err(parser.unexpected_token(&token, "expression")),
            None => {
                let name = name.clone();
                if parser.at_symbol(Symbol::ParenLeft)? {
                    let args = parse_args(parser)?;
                    Ok(ast::ExprMethod {
                        receiver: ast::Receiver::Instance,
                        name,
                        args,
                        cache: Default::default(),
                    }
                    .into())
                } else {
                    Ok(ast::ExprProperty {
                        receiver: ast::Receiver::Instance,
                        name,
                        rooted: true,
                        cache: Default::default(),
                    }
                    .into())
                }
            }
        },

        _ => Err(parser.unexpected_token(&token, "expression")),
    }
}

/// After `@Type@`: a cast, a static member, or the type itself.
fn parse_class(parser: &mut Parser, ty: String) -> Result<Expr, Error> {
    if parser.eat_symbol(Symbol::ParenLeft)? {
        let expr = parse_complex(parser)?;
        parser.expect_symbol(Symbol::ParenRight)?;
        return Ok(ast::ExprCast {
            ty,
            expr: Box::new(expr),
        }
        .into());
    }

    if parser.eat_symbol(Symbol::Dot)? {
        let name = parser.expect_identifier()?;
        let receiver = ast::Receiver::Static(ty);
        if parser.at_symbol(Symbol::ParenLeft)? {
            let args = parse_args(parser)?;
            return Ok(ast::ExprMethod {
                receiver,
                name,
                args,
                cache: Default::default(),
            }
            .into());
        }
        return Ok(ast::ExprProperty {
            receiver,
            name,
            rooted: false,
            cache: Default::default(),
        }
        .into());
    }

    Ok(ast::ExprTypeRef { name: ty }.into())
}

/// `new @Type@(args)`, after `new`.
fn parse_new(parser: &mut Parser) -> Result<Expr, Error> {
    let ty = match parser.peek()? {
        Some(Token::ClassString(_)) => match parser.next()? {
            Some(WithSpan {
                value: Token::ClassString(ty),
                ..
            }) => ty,
            _ => return Err(parser.unexpected("type")),
        },
        _ => return Err(parser.unexpected("`@Type@`")),
    };
    let args = parse_args(parser)?;

    Ok(ast::ExprNew {
        ty,
        args,
        cache: Default::default(),
    }
    .into())
}

/// `fn($a, $b) { .. }`, after `fn`.
fn parse_lambda(parser: &mut Parser) -> Result<Expr, Error> {
    parser.expect_symbol(Symbol::ParenLeft)?;
    let mut params = vec![];
    if !parser.eat_symbol(Symbol::ParenRight)? {
        loop {
            params.push(parse_variable_name(parser)?);
            if parser.eat_symbol(Symbol::Comma)? {
                continue;
            }
            parser.expect_symbol(Symbol::ParenRight)?;
            break;
        }
    }
    let body = parse_block(parser)?;

    Ok(ast::ExprLambda {
        params,
        body: Arc::new(body),
    }
    .into())
}

/// `{key: value, ..}`, after `{`.
/// A bare identifier key is taken as a string.
fn parse_map(parser: &mut Parser) -> Result<Expr, Error> {
    let mut entries = vec![];
    if parser.eat_symbol(Symbol::BraceRight)? {
        return Ok(ast::ExprMap { entries }.into());
    }

    loop {
        let key = match parse_complex(parser)? {
            Expr::Property(ast::ExprProperty {
                receiver: ast::Receiver::Instance,
                name,
                rooted: true,
                ..
            }) => Expr::Constant(Value::String(name)),
            key => key,
        };
        parser.expect_symbol(Symbol::Colon)?;
        let value = parse_complex(parser)?;
        entries.push((key, value));

        if parser.eat_symbol(Symbol::Comma)? {
            continue;
        }
        parser.expect_symbol(Symbol::BraceRight)?;
        return Ok(ast::ExprMap { entries }.into());
    }
}

pub mod error {
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub enum Kind {
        /// The input ended early.
        #[error("unexpected end of input, expected {expected}")]
        UnexpectedEndOfInput { expected: String },

        /// An unexpected kind of token was found.
        #[error("unexpected `{found}`, expected {expected}")]
        UnexpectedToken { expected: String, found: String },

        /// An identifier in operator position that is not an operator.
        #[error("unknown operator `{0}`")]
        UnknownOperator(String),

        /// The left side of `=` can not be assigned.
        #[error("invalid assignment target")]
        InvalidAssignment,

        /// A literal `like` pattern is not a valid regular expression.
        #[error("invalid pattern: {0}")]
        InvalidPattern(String),
    }

    impl Kind {
        pub fn message_key(&self) -> &'static str {
            match self {
                Self::UnexpectedEndOfInput { .. } => "parse.unexpected_end_of_input",
                Self::UnexpectedToken { .. } => "parse.unexpected_token",
                Self::UnknownOperator(_) => "parse.unknown_operator",
                Self::InvalidAssignment => "parse.invalid_assignment",
                Self::InvalidPattern(_) => "parse.invalid_pattern",
            }
        }

        pub fn args(&self) -> Vec<String> {
            match self {
                Self::UnexpectedEndOfInput { expected } => vec![expected.clone()],
                Self::UnexpectedToken { expected, found } => vec![found.clone(), expected.clone()],
                Self::UnknownOperator(op) => vec![op.clone()],
                Self::InvalidAssignment => vec![],
                Self::InvalidPattern(message) => vec![message.clone()],
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::SyntaxKind;

    fn parse_src(src: &str) -> Expr {
        parse(src, &ParseContext::new(), &Compiler::default()).unwrap()
    }

    fn parse_err(src: &str) -> error::Kind {
        let Err(Error::Syntax(err)) = parse(src, &ParseContext::new(), &Compiler::default()) else {
            panic!("expected syntax error for `{src}`");
        };
        let SyntaxKind::Parse(kind) = err.kind else {
            panic!("expected parse error for `{src}`");
        };
        kind
    }

    #[test]
    fn parse_precedence() {
        assert_eq!(parse_src("1 + 2 * 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(parse_src("(1 + 2) * 3").to_string(), "((1 + 2) * 3)");
        assert_eq!(parse_src("2 - 3 - 4").to_string(), "((2 - 3) - 4)");
        assert_eq!(
            parse_src("a || b && c == d + 1").to_string(),
            "(a || (b && (c == (d + 1))))"
        );
        assert_eq!(
            parse_src("1 | 2 ^ 3 & 4 << 1").to_string(),
            "(1 | (2 ^ (3 & (4 << 1))))"
        );
        assert_eq!(parse_src("1 add 2 mul 3").to_string(), "(1 + (2 * 3))");
        assert_eq!(parse_src("x not in $list").to_string(), "(x not in $list)");
    }

    #[test]
    fn parse_unary_test() {
        assert_eq!(parse_src("-1 + 2").to_string(), "((-1) + 2)");
        assert_eq!(parse_src("not !a").to_string(), "(!(!a))");
        let Expr::Unary(ast::ExprUnary { op, .. }) = parse_src("bnot 1") else {
            panic!("expected unary");
        };
        assert_eq!(op, ast::OpUnary::BitNot);
    }

    #[test]
    fn parse_variables() {
        let ctx = ParseContext::new();
        let expr = parse("$a = $b + $a", &ctx, &Compiler::default()).unwrap();
        let Expr::Assign(ast::ExprAssign { var, .. }) = expr else {
            panic!("expected assignment");
        };
        assert_eq!(var.slot, 0);
        assert_eq!(ctx.names(), vec!["a".to_string(), "b".to_string()]);

        assert!(matches!(parse_src("$"), Expr::Ref(ast::ExprRef::Context)));
        assert!(matches!(parse_src("$self"), Expr::Ref(ast::ExprRef::This)));
        assert!(matches!(parse_src("$root"), Expr::Ref(ast::ExprRef::Root)));
    }

    #[test]
    fn parse_track_chain() {
        assert_eq!(parse_src("a.b?.c(1)[0]").to_string(), "a.b?.c(1)[0]");
        assert_eq!(parse_src("?.length").to_string(), "$self?.length");
        assert_eq!(parse_src("~[$self > 2]").to_string(), "$self~[($self > 2)]");
        assert_eq!(
            parse_src("$list![$self * 2]^[$self > 2]").to_string(),
            "$list![($self * 2)]^[($self > 2)]"
        );

        let Expr::Track(ast::ExprTrack { right, .. }) = parse_src("a.b(1, 2)") else {
            panic!("expected track");
        };
        let Expr::Method(method) = *right else {
            panic!("expected method");
        };
        assert_eq!(method.name, "b");
        assert_eq!(method.args.len(), 2);
    }

    #[test]
    fn parse_class_forms() {
        assert!(matches!(parse_src("@int@"), Expr::TypeRef(_)));
        assert!(matches!(parse_src("@int@('1')"), Expr::Cast(_)));
        let Expr::Property(prop) = parse_src("@int@.MAX_VALUE") else {
            panic!("expected static property");
        };
        assert_eq!(prop.receiver, ast::Receiver::Static("int".to_string()));
        let Expr::Method(method) = parse_src("@int@.parse('2')") else {
            panic!("expected static method");
        };
        assert_eq!(method.receiver, ast::Receiver::Static("int".to_string()));
        let Expr::New(new) = parse_src("new @list@()") else {
            panic!("expected constructor");
        };
        assert_eq!(new.ty, "list");
        assert!(new.args.is_empty());
    }

    #[test]
    fn parse_literals() {
        assert_eq!(parse_src("[1, 'a', null]").to_string(), "[1, \"a\", null]");
        assert_eq!(parse_src("{a: 1, 'b': 2.5}").to_string(), "{\"a\": 1, \"b\": 2.5}");
        assert_eq!(parse_src("{}").to_string(), "{}");
        assert_eq!(parse_src("0x1F").to_string(), "31");
        assert_eq!(parse_src("1e3").to_string(), "1000.0");
    }

    #[test]
    fn parse_statements_test() {
        let Expr::Sequence(seq) = parse_src("$a = 1;; $b = 2;") else {
            panic!("expected sequence");
        };
        assert_eq!(seq.exprs.len(), 2);

        let expr = parse_src("if ($a) { 1 } else if ($b) { 2 } else { 3 } 4");
        assert_eq!(
            expr.to_string(),
            "if ($a) { 1 } else { if ($b) { 2 } else { 3 } }; 4"
        );

        let expr = parse_src("for ($x in $list) { if ($x == 3) { break }; continue }");
        let Expr::For(for_expr) = expr else {
            panic!("expected for");
        };
        assert_eq!(for_expr.var.name, "x");

        assert_eq!(parse_src("while (true) { return }").to_string(), "while (true) { return }");
        assert_eq!(
            parse_src("fn($a, $b) { $a + $b }").to_string(),
            "fn($a, $b) { ($a + $b) }"
        );
    }

    #[test]
    fn parse_assignment_targets() {
        assert!(matches!(parse_src("a.b = 1"), Expr::PropertySet(_)));
        assert!(matches!(parse_src("name = 1"), Expr::PropertySet(_)));
        assert!(matches!(parse_src("@T@.f = 1"), Expr::PropertySet(_)));
        assert!(matches!(parse_src("$m['k'] = 1"), Expr::IndexSet(_)));
        assert_eq!(parse_err("1 = 2"), error::Kind::InvalidAssignment);
        assert_eq!(parse_err("a.b() = 2"), error::Kind::InvalidAssignment);
    }

    #[test]
    fn parse_like_and_is() {
        let Expr::Like(like) = parse_src("name like 'a.*'") else {
            panic!("expected like");
        };
        assert!(like.regex.is_some());
        let Expr::Like(like) = parse_src("name like $pattern") else {
            panic!("expected like");
        };
        assert!(like.regex.is_none());
        assert!(matches!(parse_err("a like '('"), error::Kind::InvalidPattern(_)));
        assert!(matches!(parse_src("1 is @int@ == true"), Expr::Binary(_)));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            parse_err("(1 + 2"),
            error::Kind::UnexpectedEndOfInput {
                expected: "`)`".to_string()
            }
        );
        assert_eq!(
            parse_err("1 +"),
            error::Kind::UnexpectedEndOfInput {
                expected: "expression".to_string()
            }
        );
        assert_eq!(
            parse_err("[1 2]"),
            error::Kind::UnexpectedToken {
                expected: "`]`".to_string(),
                found: "2".to_string()
            }
        );
        assert_eq!(
            parse_err("a foo b"),
            error::Kind::UnknownOperator("foo".to_string())
        );
        assert_eq!(
            parse_err("a not b"),
            error::Kind::UnknownOperator("not".to_string())
        );
        assert_eq!(
            parse_err("1 )"),
            error::Kind::UnexpectedToken {
                expected: "`;`".to_string(),
                found: ")".to_string()
            }
        );
    }

    #[test]
    fn error_has_position() {
        let Err(Error::Syntax(err)) = parse("1 +\n  ]", &ParseContext::new(), &Compiler::default())
        else {
            panic!("expected syntax error");
        };
        assert_eq!(err.position.line, 2);
        assert_eq!(err.position.col, 3);
        assert_eq!(err.kind.message_key(), "parse.unexpected_token");
    }
}
