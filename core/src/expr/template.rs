//! Rewrites text templates into expression programs.
//!
//! Given the delimiters `<%` and `%>`,
//! + text outside the delimiters is appended to an accumulator,
//! + `<%# statement %>` is spliced in as a statement,
//! + `<%@template(name)%>` inlines the registered template `name`,
//! + `<% expr %>` appends the value of `expr`.
//!
//! The program starts by clearing the accumulator and ends with its value.
use super::Compiler;
use crate::{
    Error,
    error::TemplateError,
    utils,
};

/// Rewrite `text` into a program accumulating into the variable `acc`.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(compiler)))]
pub(crate) fn rewrite(text: &str, compiler: &Compiler, acc: &str) -> Result<String, Error> {
    let mut out = format!("${acc} = \"\";\n");
    rewrite_into(&mut out, text, compiler, acc, 0)?;
    out.push_str(&format!("${acc}"));

    #[cfg(feature = "tracing")]
    tracing::debug!(program = %out, "template rewritten");

    Ok(out)
}

fn rewrite_into(
    out: &mut String,
    text: &str,
    compiler: &Compiler,
    acc: &str,
    depth: usize,
) -> Result<(), Error> {
    let options = compiler.options();
    let start_delimiter = options.start_delimiter.as_str();
    let end_delimiter = options.end_delimiter.as_str();

    let mut rest = text;
    let mut offset = 0;
    while !rest.is_empty() {
        let Some(start) = rest.find(start_delimiter) else {
            append_text(out, acc, rest);
            break;
        };
        append_text(out, acc, &rest[..start]);

        let body_start = start + start_delimiter.len();
        let Some(len) = rest[body_start..].find(end_delimiter) else {
            let position = utils::line_col(text, offset + start);
            return Err(TemplateError::Unterminated(position).into());
        };
        let body = &rest[body_start..body_start + len];
        append_segment(out, body, compiler, acc, depth)?;

        let consumed = body_start + len + end_delimiter.len();
        rest = &rest[consumed..];
        offset += consumed;
    }

    Ok(())
}

fn append_segment(
    out: &mut String,
    body: &str,
    compiler: &Compiler,
    acc: &str,
    depth: usize,
) -> Result<(), Error> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(());
    }

    if let Some(statement) = trimmed.strip_prefix('#') {
        out.push_str(statement);
        out.push_str(";\n");
        return Ok(());
    }

    if let Some(name) = template_reference(trimmed) {
        let max_depth = compiler.options().max_template_depth;
        if depth >= max_depth {
            return Err(TemplateError::TooDeep(max_depth).into());
        }
        let Some(source) = compiler.template_source(name) else {
            return Err(TemplateError::Unknown(name.to_string()).into());
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(?name, depth, "inline template");

        return rewrite_into(out, source, compiler, acc, depth + 1);
    }

    out.push_str(&format!("${acc} = ${acc} + ({body});\n"));
    Ok(())
}

/// Name in `@template(name)`, quotes around the name are optional.
fn template_reference(segment: &str) -> Option<&str> {
    let name = segment
        .strip_prefix("@template(")?
        .strip_suffix(')')?
        .trim();
    let name = name
        .strip_prefix(['"', '\''])
        .and_then(|name| name.strip_suffix(['"', '\'']))
        .unwrap_or(name);
    Some(name)
}

fn append_text(out: &mut String, acc: &str, text: &str) {
    if text.is_empty() {
        return;
    }

    out.push_str(&format!("${acc} = ${acc} + \""));
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch => out.push(ch),
        }
    }
    out.push_str("\";\n");
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::expr::{Options, position::LineCol};

    #[test]
    fn rewrite_segments() {
        let compiler = Compiler::default();
        let program = rewrite("a\"<% 1 %>\n<%# $x = 2 %><%%>b", &compiler, "out").unwrap();
        let expected = [
            "$out = \"\";",
            "$out = $out + \"a\\\"\";",
            "$out = $out + ( 1 );",
            "$out = $out + \"\\n\";",
            " $x = 2;",
            "$out = $out + \"b\";",
            "$out",
        ]
        .join("\n");
        assert_eq!(program, expected);
    }

    #[test]
    fn rewrite_custom_delimiters() {
        let compiler = Compiler::new(Options {
            start_delimiter: "{{".to_string(),
            end_delimiter: "}}".to_string(),
            ..Default::default()
        });
        let program = rewrite("x{{ $y }}", &compiler, "o").unwrap();
        assert_eq!(program, "$o = \"\";\n$o = $o + \"x\";\n$o = $o + ( $y );\n$o");
    }

    #[test]
    fn unterminated() {
        let compiler = Compiler::default();
        let err = rewrite("ab\nc<% 1", &compiler, "out").unwrap_err();
        let Error::Template(TemplateError::Unterminated(position)) = err else {
            panic!("expected unterminated error");
        };
        assert_eq!(position, LineCol::new(2, 2));
    }

    #[test]
    fn inline_templates() {
        let mut compiler = Compiler::default();
        compiler.register_template("greet", "hi <% $name %>");
        let program = rewrite("<%@template(greet)%>!", &compiler, "out").unwrap();
        assert!(program.contains("$out = $out + \"hi \";\n$out = $out + ( $name );\n"));
        assert!(program.ends_with("$out = $out + \"!\";\n$out"));

        let err = rewrite("<%@template('missing')%>", &compiler, "out").unwrap_err();
        assert!(matches!(
            err,
            Error::Template(TemplateError::Unknown(name)) if name == "missing"
        ));

        compiler.register_template("loop", "<%@template(loop)%>");
        let err = rewrite("<%@template(loop)%>", &compiler, "out").unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::TooDeep(16))));
    }
}
