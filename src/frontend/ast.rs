//! The type-checked syntax tree the middle-end consumes. Parsing and name
//! pre-resolution happen upstream; nodes arrive here already carrying spans
//! and literal payloads. Types appear in expression position (a type is just
//! an expression that analyzes to a metatype value).

use std::rc::Rc;

use crate::{
    frontend::{intern::InternedSymbol, Span},
    middle::bignum::BigNum,
};

#[derive(Debug)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Rc<Self> {
        Rc::new(Self { span, kind })
    }
}

#[derive(Debug)]
pub enum ExprKind {
    /// Integer or float literal, parsed to an exact big-number payload
    NumLit(BigNum),
    BoolLit(bool),
    CharLit(char),
    /// String literal bytes; `is_c` marks a NUL-terminated C string
    StrLit { value: InternedSymbol, is_c: bool },
    NullLit,
    UndefinedLit,
    /// The `unreachable` expression
    Unreachable,
    /// A name reference: variable, function, primitive type, or import
    Symbol(InternedSymbol),
    Block(Rc<Block>),
    BinOp {
        op: BinOpKind,
        lhs: Rc<Expr>,
        rhs: Rc<Expr>,
    },
    PrefixOp {
        op: PrefixOpKind,
        operand: Rc<Expr>,
    },
    /// `lhs = rhs` or a compound `lhs op= rhs`
    Assign {
        op: Option<BinOpKind>,
        lhs: Rc<Expr>,
        rhs: Rc<Expr>,
    },
    VarDecl(Rc<VarDecl>),
    If(Rc<IfExpr>),
    While(Rc<WhileExpr>),
    For(Rc<ForExpr>),
    Switch(Rc<SwitchExpr>),
    Label(InternedSymbol),
    Goto(InternedSymbol),
    Break,
    Continue,
    Defer {
        kind: DeferKind,
        expr: Rc<Expr>,
    },
    Return {
        kind: ReturnKind,
        value: Option<Rc<Expr>>,
    },
    Call {
        callee: Rc<Expr>,
        args: Vec<Rc<Expr>>,
    },
    /// `@name(args...)`
    BuiltinCall {
        name: InternedSymbol,
        args: Vec<Rc<Expr>>,
    },
    FieldAccess {
        container: Rc<Expr>,
        field: InternedSymbol,
    },
    ArrayAccess {
        array: Rc<Expr>,
        index: Rc<Expr>,
    },
    /// `array[start...end]`; a missing end slices to the array's length
    Slice {
        array: Rc<Expr>,
        start: Rc<Expr>,
        end: Option<Rc<Expr>>,
        is_const: bool,
    },
    /// `T{a, b, c}` or `T{.x = a, .y = b}`
    ContainerInit {
        ty: Rc<Expr>,
        kind: ContainerInitKind,
    },
    /// `[N]T` as a type expression; no length means a slice `[]T`
    ArrayType {
        len: Option<Rc<Expr>>,
        child: Rc<Expr>,
        is_const: bool,
    },
    /// `&T` / `&const T` as a type expression
    PointerType {
        child: Rc<Expr>,
        is_const: bool,
    },
    /// `?T` as a type expression
    MaybeType(Rc<Expr>),
    Asm(Rc<AsmExpr>),
}

#[derive(Debug)]
pub struct Block {
    pub span: Span,
    /// The block's value is the value of the final statement, void otherwise
    pub statements: Vec<Rc<Expr>>,
}

#[derive(Debug)]
pub struct VarDecl {
    pub name: InternedSymbol,
    /// Declared with `const` rather than `var`
    pub src_is_const: bool,
    /// Declared `inline` (must be compile-time known)
    pub is_inline: bool,
    pub ty: Option<Rc<Expr>>,
    pub init: Option<Rc<Expr>>,
}

#[derive(Debug)]
pub struct IfExpr {
    pub condition: Rc<Expr>,
    pub then_body: Rc<Expr>,
    pub else_body: Option<Rc<Expr>>,
}

#[derive(Debug)]
pub struct WhileExpr {
    pub is_inline: bool,
    pub condition: Rc<Expr>,
    /// Runs on `continue` and fall-through, before re-testing the condition
    pub continue_expr: Option<Rc<Expr>>,
    pub body: Rc<Expr>,
}

#[derive(Debug)]
pub struct ForExpr {
    pub is_inline: bool,
    pub array: Rc<Expr>,
    pub value_name: InternedSymbol,
    pub index_name: Option<InternedSymbol>,
    pub body: Rc<Expr>,
}

#[derive(Debug)]
pub struct SwitchExpr {
    pub target: Rc<Expr>,
    pub prongs: Vec<SwitchProng>,
}

#[derive(Debug)]
pub struct SwitchProng {
    pub span: Span,
    /// Empty items marks the `else` prong
    pub items: Vec<SwitchItem>,
    /// `|name|` payload capture
    pub payload: Option<InternedSymbol>,
    pub body: Rc<Expr>,
}

#[derive(Debug)]
pub enum SwitchItem {
    Single(Rc<Expr>),
    /// `a...b`, both ends inclusive
    Range { start: Rc<Expr>, end: Rc<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferKind {
    /// Runs on every scope exit
    Unconditional,
    /// Runs only when the scope exits with an error return
    Error,
    /// Runs only when the scope exits returning null
    Maybe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Normal,
    /// `return %expr` — propagate the error out of an error union
    Error,
    /// `return ?expr` — propagate null out of a maybe
    Maybe,
}

#[derive(Debug)]
pub struct AsmExpr {
    pub template: InternedSymbol,
    pub is_volatile: bool,
    pub outputs: Vec<AsmOutput>,
    pub inputs: Vec<AsmInput>,
    pub clobbers: Vec<InternedSymbol>,
}

#[derive(Debug)]
pub struct AsmOutput {
    pub constraint: InternedSymbol,
    pub variable_name: InternedSymbol,
}

#[derive(Debug)]
pub struct AsmInput {
    pub constraint: InternedSymbol,
    pub expr: Rc<Expr>,
}

#[derive(Debug)]
pub enum ContainerInitKind {
    List(Vec<Rc<Expr>>),
    Fields(Vec<FieldInit>),
}

#[derive(Debug)]
pub struct FieldInit {
    pub span: Span,
    pub name: InternedSymbol,
    pub value: Rc<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOpKind {
    BoolOr,      // ||
    BoolAnd,     // &&
    CmpEq,       // ==
    CmpNeq,      // !=
    CmpLt,       // <
    CmpGt,       // >
    CmpLte,      // <=
    CmpGte,      // >=
    BitOr,       // |
    BitXor,      // ^
    BitAnd,      // &
    Shl,         // <<
    ShlWrap,     // <<%
    Shr,         // >>
    Add,         // +
    AddWrap,     // +%
    Sub,         // -
    SubWrap,     // -%
    Mul,         // *
    MulWrap,     // *%
    Div,         // /
    Mod,         // %
    ArrayCat,    // ++
    ArrayMult,   // **
    UnwrapOr,    // ??
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpClass {
    Bool,
    Comparison,
    Arithmetic,
    Array,
    Unwrap,
}

impl BinOpKind {
    pub fn class(self) -> BinOpClass {
        match self {
            Self::BoolOr | Self::BoolAnd => BinOpClass::Bool,
            Self::CmpEq
            | Self::CmpNeq
            | Self::CmpLt
            | Self::CmpGt
            | Self::CmpLte
            | Self::CmpGte => BinOpClass::Comparison,
            Self::BitOr
            | Self::BitXor
            | Self::BitAnd
            | Self::Shl
            | Self::ShlWrap
            | Self::Shr
            | Self::Add
            | Self::AddWrap
            | Self::Sub
            | Self::SubWrap
            | Self::Mul
            | Self::MulWrap
            | Self::Div
            | Self::Mod => BinOpClass::Arithmetic,
            Self::ArrayCat | Self::ArrayMult => BinOpClass::Array,
            Self::UnwrapOr => BinOpClass::Unwrap,
        }
    }

    /// Wrapping ops truncate instead of reporting overflow
    pub fn is_wrapping(self) -> bool {
        matches!(
            self,
            Self::AddWrap | Self::SubWrap | Self::MulWrap | Self::ShlWrap
        )
    }
}

impl core::fmt::Display for BinOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BoolOr => "||",
            Self::BoolAnd => "&&",
            Self::CmpEq => "==",
            Self::CmpNeq => "!=",
            Self::CmpLt => "<",
            Self::CmpGt => ">",
            Self::CmpLte => "<=",
            Self::CmpGte => ">=",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::Shl => "<<",
            Self::ShlWrap => "<<%",
            Self::Shr => ">>",
            Self::Add => "+",
            Self::AddWrap => "+%",
            Self::Sub => "-",
            Self::SubWrap => "-%",
            Self::Mul => "*",
            Self::MulWrap => "*%",
            Self::Div => "/",
            Self::Mod => "%",
            Self::ArrayCat => "++",
            Self::ArrayMult => "**",
            Self::UnwrapOr => "??",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOpKind {
    Negate,         // -
    NegateWrap,     // -%
    BoolNot,        // !
    BitNot,         // ~
    AddressOf,      // &
    ConstAddressOf, // &const
    Deref,          // *
    UnwrapMaybe,    // ??
}

impl core::fmt::Display for PrefixOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Negate => "-",
            Self::NegateWrap => "-%",
            Self::BoolNot => "!",
            Self::BitNot => "~",
            Self::AddressOf => "&",
            Self::ConstAddressOf => "&const",
            Self::Deref => "*",
            Self::UnwrapMaybe => "??",
        };
        f.write_str(s)
    }
}

/// A function signature as written in the source. The body block is stored
/// alongside in the compile unit's function table.
#[derive(Debug)]
pub struct FnProto {
    pub span: Span,
    pub name: InternedSymbol,
    pub params: Vec<ParamDecl>,
    pub return_ty: Option<Rc<Expr>>,
    pub is_inline: bool,
    pub is_var_args: bool,
}

#[derive(Debug)]
pub struct ParamDecl {
    pub span: Span,
    pub name: InternedSymbol,
    pub ty: Rc<Expr>,
}
