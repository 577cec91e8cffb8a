use std::fmt;

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Deref, derive_more::From,
)]
pub struct BytePos(pub usize);

impl std::ops::Add<usize> for BytePos {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Byte range `[start, end)` into the source text.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: BytePos,
    pub end: BytePos,
}

impl Span {
    pub fn new(start: impl Into<BytePos>, end: impl Into<BytePos>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Span a single position.
    pub fn at(position: impl Into<BytePos>) -> Self {
        let pos = position.into();
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WithSpan<T> {
    pub value: T,
    pub span: Span,
}

impl<T> WithSpan<T> {
    pub fn new(value: T, start: impl Into<BytePos>, end: impl Into<BytePos>) -> Self {
        Self {
            value,
            span: Span::new(start, end),
        }
    }

    /// Span a single position.
    pub fn at(value: T, pos: impl Into<BytePos>) -> Self {
        Self {
            value,
            span: Span::at(pos),
        }
    }
}

/// 1-based line and column.
/// Columns count characters, not bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

impl LineCol {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Line/column range of a node, used for breakpoint matching and traces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineSpan {
    pub start: LineCol,
    pub end: LineCol,
}

impl LineSpan {
    pub fn new(start: LineCol, end: LineCol) -> Self {
        Self { start, end }
    }

    /// If the two ranges share at least one position.
    pub fn overlaps(&self, other: &LineSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}
