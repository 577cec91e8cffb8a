use crate::expr::position::{BytePos, LineCol};

/// Number of characters shown on each side of a position in a snippet.
const SNIPPET_RADIUS: usize = 20;

/// Convert a byte position into its line and column.
/// e.g. `"ab\ncd"` at `4` -> `2:2`.
/// Positions past the end of the source map to the end.
pub fn line_col(src: &str, pos: impl Into<BytePos>) -> LineCol {
    let pos = (*pos.into()).min(src.len());
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in src.char_indices() {
        if idx >= pos {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    LineCol::new(line, col)
}

/// Render the source around a position with a caret under it.
/// At most [`SNIPPET_RADIUS`] characters are shown on each side,
/// and line breaks in the excerpt are shown as spaces.
pub fn snippet(src: &str, pos: impl Into<BytePos>) -> String {
    let pos = (*pos.into()).min(src.len());
    let before = src[..floor_char_boundary(src, pos)]
        .chars()
        .rev()
        .take(SNIPPET_RADIUS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(flatten_whitespace)
        .collect::<String>();
    let after = src[floor_char_boundary(src, pos)..]
        .chars()
        .take(SNIPPET_RADIUS)
        .map(flatten_whitespace)
        .collect::<String>();

    let caret = " ".repeat(before.chars().count());
    format!("{before}{after}\n{caret}^")
}

/// Upper case the first character.
/// e.g. `"name"` -> `"Name"`.
pub fn capitalize(value: impl AsRef<str>) -> String {
    let mut chars = value.as_ref().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn flatten_whitespace(ch: char) -> char {
    if ch == '\n' || ch == '\r' || ch == '\t' {
        ' '
    } else {
        ch
    }
}

fn floor_char_boundary(src: &str, mut pos: usize) -> usize {
    while pos > 0 && !src.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_col_of_position() {
        let src = "ab\ncd\n\nef";
        assert_eq!(line_col(src, 0), LineCol::new(1, 1));
        assert_eq!(line_col(src, 1), LineCol::new(1, 2));
        assert_eq!(line_col(src, 3), LineCol::new(2, 1));
        assert_eq!(line_col(src, 4), LineCol::new(2, 2));
        assert_eq!(line_col(src, 6), LineCol::new(3, 1));
        assert_eq!(line_col(src, 7), LineCol::new(4, 1));
        assert_eq!(line_col(src, 100), LineCol::new(4, 3));
    }

    #[test]
    fn snippet_caret() {
        let src = "1 + * 2";
        assert_eq!(snippet(src, 4), "1 + * 2\n    ^");

        let src = "x".repeat(30) + "!" + &"y".repeat(30);
        let rendered = snippet(&src, 30);
        let (line, caret) = rendered.split_once('\n').unwrap();
        assert_eq!(line.chars().count(), 40);
        assert_eq!(caret.len(), 21);
        assert_eq!(line.chars().nth(20), Some('!'));
    }

    #[test]
    fn capitalize_name() {
        assert_eq!(capitalize("name"), "Name");
        assert_eq!(capitalize("N"), "N");
        assert_eq!(capitalize(""), "");
    }
}
