use std::path::PathBuf;

use colored::Colorize;

pub mod ast;
pub mod intern;

#[derive(Debug)]
pub struct SourceFile {
    pub contents: String,
    pub origin: SourceFileOrigin,
}

impl SourceFile {
    pub fn in_memory(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            origin: SourceFileOrigin::Memory,
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// Formats a span as `origin:line:column` (1-based) for error reporting
    pub fn format_span_position(&self, span: Span) -> String {
        let (line, column) = self.line_and_column(span.start);
        format!("{}:{}:{}", self.origin, line + 1, column + 1)
    }

    /// Prints the source line containing the span with a caret marker under
    /// the offending range
    pub fn highlight_span(&self, span: Span) {
        let (line_number, column) = self.line_and_column(span.start);

        let Some(line) = self.contents.lines().nth(line_number) else {
            return;
        };

        eprintln!("    {line}");

        let width = (span.end.saturating_sub(span.start)).clamp(1, line.len() - column.min(line.len()) + 1);
        eprintln!("    {}{}", " ".repeat(column), "^".repeat(width).red());
    }

    fn line_and_column(&self, position: usize) -> (usize, usize) {
        let mut line = 0;
        let mut line_start = 0;

        for (i, c) in self.contents.char_indices() {
            if i >= position {
                break;
            }

            if c == '\n' {
                line += 1;
                line_start = i + 1;
            }
        }

        (line, position - line_start)
    }
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const ZERO: Self = Self { start: 0, end: 0 };

    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}
