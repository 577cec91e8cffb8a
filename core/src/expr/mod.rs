//! Expression and template language.
//!
//! Source text is compiled once into an immutable [`Compiled`] unit
//! which can then be executed any number of times, concurrently,
//! against different roots and variables.
//!
//! # Inspiration
//! + [Crafting Interpreters](https://craftinginterpreters.com)
//! + [Lox in Rust](https://github.com/Darksecond/lox)
pub mod ast;
pub mod context;
pub mod debug;
pub mod eval;
pub mod lex;
pub mod parse;
pub mod position;
pub mod runtime;
mod template;
pub mod token;

pub use context::ParseContext;
pub use debug::{Breakpoint, BreakpointListener, DebugContext};
pub use runtime::Runtime;

use crate::{
    Error,
    service::Services,
    value::{Value, Variables},
};
use indexmap::IndexMap;
use std::sync::Arc;

/// Compiler options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Opens an expression in a template.
    pub start_delimiter: String,

    /// Closes an expression in a template.
    pub end_delimiter: String,

    /// How deep `@template(name)` may inline other templates.
    pub max_template_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            start_delimiter: "<%".to_string(),
            end_delimiter: "%>".to_string(),
            max_template_depth: 16,
        }
    }
}

/// Compiles expressions and templates.
///
/// Every unit compiled by the same compiler shares its debug context.
#[derive(Debug, Default)]
pub struct Compiler {
    options: Options,
    debug: Option<DebugContext>,
    templates: IndexMap<String, String>,
}

impl Compiler {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Instrument compiled units for breakpoints.
    pub fn with_debug(mut self, debug: DebugContext) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn debug(&self) -> Option<&DebugContext> {
        self.debug.as_ref()
    }

    /// Register a template for `@template(name)`.
    /// Replaces any template with the same name.
    pub fn register_template(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn template_source(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    /// Compile an expression program.
    pub fn expression(&self, src: impl Into<String>) -> Result<Compiled, Error> {
        self.expression_in(src, &ParseContext::new())
    }

    /// Compile an expression program, allocating variables in `ctx`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn expression_in(
        &self,
        src: impl Into<String>,
        ctx: &ParseContext,
    ) -> Result<Compiled, Error> {
        let source = src.into();
        let root = parse::parse(&source, ctx, self)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%source, slots = ctx.len(), "compiled expression");

        Ok(Compiled {
            source,
            root,
            slots: ctx.names(),
        })
    }

    /// Compile a template.
    pub fn template(&self, src: impl Into<String>) -> Result<Compiled, Error> {
        self.template_in(src, &ParseContext::new())
    }

    /// Compile a template, allocating variables in `ctx`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn template_in(&self, src: impl Into<String>, ctx: &ParseContext) -> Result<Compiled, Error> {
        let source = src.into();
        let acc = ctx.unique("__out");
        let program = template::rewrite(&source, self, &acc)?;
        let root = parse::parse(&program, ctx, self)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%source, slots = ctx.len(), "compiled template");

        Ok(Compiled {
            source,
            root,
            slots: ctx.names(),
        })
    }
}

/// Compiled expression or template.
///
/// Immutable, execute it from as many threads as needed.
#[derive(Debug)]
pub struct Compiled {
    source: String,
    root: ast::Expr,
    slots: Vec<String>,
}

impl Compiled {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &ast::Expr {
        &self.root
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Variable names by slot.
    pub fn slot_names(&self) -> &[String] {
        &self.slots
    }

    /// Execute with the default services.
    pub fn execute(&self, root: Value, variables: &Variables) -> Result<Value, Error> {
        self.execute_with(root, variables, &Services::default())
    }

    /// Execute against `root`, which is also the initial `$self`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub fn execute_with(
        &self,
        root: Value,
        variables: &Variables,
        services: &Services,
    ) -> Result<Value, Error> {
        let mut rt = Runtime::new(
            root.clone(),
            Arc::new(variables.clone()),
            &self.slots,
            services.clone(),
        );
        let value = eval::eval(&self.root, &mut rt, &root)?;
        rt.clear_flags();
        Ok(value)
    }
}

/// Compile an expression with default options.
pub fn parse_expression(src: impl Into<String>) -> Result<Compiled, Error> {
    Compiler::default().expression(src)
}

/// Compile a template with default options.
pub fn parse_template(src: impl Into<String>) -> Result<Compiled, Error> {
    Compiler::default().template(src)
}

pub fn execute(compiled: &Compiled, root: Value, variables: &Variables) -> Result<Value, Error> {
    compiled.execute(root, variables)
}

/// Compile and execute an expression.
pub fn eval(src: impl Into<String>, root: Value, variables: &Variables) -> Result<Value, Error> {
    parse_expression(src)?.execute(root, variables)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compile_units() {
        let compiled = parse_expression("$a = 1; $b = $a + $c").unwrap();
        assert_eq!(compiled.slot_names(), &["a", "b", "c"]);
        assert_eq!(compiled.source(), "$a = 1; $b = $a + $c");

        let mut variables = Variables::new();
        variables.insert("c".to_string(), Value::Int(2));
        assert_eq!(compiled.execute(Value::Null, &variables).unwrap(), Value::Int(3));

        let err = compiled.execute(Value::Null, &Variables::new()).unwrap_err();
        assert_eq!(err.to_string(), "can not apply `+` to int and null");
    }

    #[test]
    fn templates() {
        let compiled = parse_template("<% $n %> item<%# if ($n != 1) { %>s<%# } %>").unwrap();
        let mut variables = Variables::new();
        variables.insert("n".to_string(), Value::Int(1));
        assert_eq!(
            compiled.execute(Value::Null, &variables).unwrap(),
            Value::string("1 item")
        );
        variables.insert("n".to_string(), Value::Int(3));
        assert_eq!(
            compiled.execute(Value::Null, &variables).unwrap(),
            Value::string("3 items")
        );

        let compiled = parse_template("a<% null %>").unwrap();
        assert_eq!(
            compiled.execute(Value::Null, &Variables::new()).unwrap(),
            Value::string("anull")
        );
    }

    #[test]
    fn shared_parse_context() {
        let ctx = ParseContext::new();
        let compiler = Compiler::default();
        let first = compiler.expression_in("$x = 1", &ctx).unwrap();
        let second = compiler.template_in("<% $y %>", &ctx).unwrap();
        assert_eq!(first.slot_names(), &["x"]);
        assert_eq!(second.slot_names()[0], "x");
        assert!(second.slot_names().contains(&"y".to_string()));
    }

    #[test]
    fn registered_templates() {
        let mut compiler = Compiler::default();
        compiler.register_template("name", "<% $first %> <% $last %>");
        let compiled = compiler.template("Hi <%@template(name)%>!").unwrap();

        let mut variables = Variables::new();
        variables.insert("first".to_string(), Value::string("Ada"));
        variables.insert("last".to_string(), Value::string("Lovelace"));
        assert_eq!(
            compiled.execute(Value::Null, &variables).unwrap(),
            Value::string("Hi Ada Lovelace!")
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn options_defaults() {
        let options: Options = serde_json::from_str(r#"{"start_delimiter": "{{"}"#).unwrap();
        assert_eq!(options.start_delimiter, "{{");
        assert_eq!(options.end_delimiter, "%>");
        assert_eq!(options.max_template_depth, 16);
    }
}
