//! Diagnostic collection. Analysis never aborts on the first problem: each
//! error is recorded here and the offending type or value is replaced with
//! the invalid sentinel so that one run can surface every independent error.

use colored::Colorize;

use crate::frontend::{SourceFile, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            span,
            message: message.into(),
            notes: Vec::new(),
        });
    }

    pub fn error_with_notes(
        &mut self,
        span: Span,
        message: impl Into<String>,
        notes: Vec<Note>,
    ) {
        self.diagnostics.push(Diagnostic {
            span,
            message: message.into(),
            notes,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// True when some recorded message contains `fragment`. Exists for
    /// asserting on diagnostics without fixing exact wording everywhere.
    pub fn contains(&self, fragment: &str) -> bool {
        self.diagnostics.iter().any(|d| d.message.contains(fragment))
    }

    pub fn print_all(&self, source: &SourceFile) {
        for diagnostic in &self.diagnostics {
            eprintln!(
                "{}: {} {}",
                "error".red(),
                diagnostic.message,
                format!("(at {})", source.format_span_position(diagnostic.span)).white()
            );
            source.highlight_span(diagnostic.span);

            for note in &diagnostic.notes {
                eprintln!(
                    "{}: {} {}",
                    "note".cyan(),
                    note.message,
                    format!("(at {})", source.format_span_position(note.span)).white()
                );
            }
        }
    }
}
