//! The cinder compiler middle-end: translation of a type-checked AST into a
//! verified, partially evaluated intermediate representation.
//!
//! Two passes form the core. [`middle::ir::build`] lowers the AST into an
//! unverified executable of basic blocks, and [`middle::analyze`] rewrites
//! it into a verified executable where every reachable instruction has a
//! concrete result type and, where possible, a known compile-time value.
//! The backend that turns verified IR into machine code lives elsewhere and
//! consumes [`middle::ir::Executable`] through [`middle::analyze::AnalyzedExecutable`].

pub mod diagnostics;
pub mod frontend;
pub mod index;
pub mod middle;

pub use crate::{
    diagnostics::DiagnosticSink,
    frontend::{ast, intern::InternedSymbol, SourceFile, Span},
    middle::{
        analyze::{analyze_executable, analyze_expr, AnalyzedExecutable},
        ir::{build::build_executable, Executable},
        scope::CompileUnit,
    },
};
