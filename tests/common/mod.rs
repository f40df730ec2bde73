//! Hand-rolled AST construction for middle-end tests. Everything carries a
//! zero span; the tests assert on diagnostics and verified IR, not on
//! source positions.

#![allow(dead_code)]

use std::rc::Rc;

use cinder::{
    frontend::{
        ast::{
            BinOpKind, Block, ContainerInitKind, DeferKind, Expr, ExprKind, FieldInit, FnProto,
            ForExpr, IfExpr, ParamDecl, PrefixOpKind, ReturnKind, SwitchExpr, SwitchItem,
            SwitchProng, VarDecl, WhileExpr,
        },
        intern::InternedSymbol,
        SourceFile, Span,
    },
    middle::{bignum::BigNum, scope::CompileUnit, ty::FnSig, ty::Type},
};

pub fn unit() -> CompileUnit {
    CompileUnit::new(SourceFile::in_memory(""))
}

pub fn e(kind: ExprKind) -> Rc<Expr> {
    Expr::new(Span::ZERO, kind)
}

pub fn int(value: u64) -> Rc<Expr> {
    e(ExprKind::NumLit(BigNum::from_u64(value)))
}

pub fn boolean(value: bool) -> Rc<Expr> {
    e(ExprKind::BoolLit(value))
}

pub fn sym(name: &str) -> Rc<Expr> {
    e(ExprKind::Symbol(InternedSymbol::new(name)))
}

pub fn str_lit(value: &str) -> Rc<Expr> {
    e(ExprKind::StrLit {
        value: InternedSymbol::new(value),
        is_c: false,
    })
}

pub fn block(statements: Vec<Rc<Expr>>) -> Rc<Expr> {
    e(ExprKind::Block(Rc::new(Block {
        span: Span::ZERO,
        statements,
    })))
}

pub fn decl(name: &str, is_const: bool, ty: Option<Rc<Expr>>, init: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::VarDecl(Rc::new(VarDecl {
        name: InternedSymbol::new(name),
        src_is_const: is_const,
        is_inline: false,
        ty,
        init: Some(init),
    })))
}

pub fn decl_inline(name: &str, ty: Option<Rc<Expr>>, init: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::VarDecl(Rc::new(VarDecl {
        name: InternedSymbol::new(name),
        src_is_const: false,
        is_inline: true,
        ty,
        init: Some(init),
    })))
}

pub fn if_(condition: Rc<Expr>, then_body: Rc<Expr>, else_body: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::If(Rc::new(IfExpr {
        condition,
        then_body,
        else_body: Some(else_body),
    })))
}

pub fn while_(condition: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::While(Rc::new(WhileExpr {
        is_inline: false,
        condition,
        continue_expr: None,
        body,
    })))
}

pub fn for_(value_name: &str, index_name: Option<&str>, array: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::For(Rc::new(ForExpr {
        is_inline: false,
        array,
        value_name: InternedSymbol::new(value_name),
        index_name: index_name.map(InternedSymbol::new),
        body,
    })))
}

pub fn call(callee: Rc<Expr>, args: Vec<Rc<Expr>>) -> Rc<Expr> {
    e(ExprKind::Call { callee, args })
}

pub fn cast(type_name: &str, value: Rc<Expr>) -> Rc<Expr> {
    call(sym(type_name), vec![value])
}

pub fn builtin(name: &str, args: Vec<Rc<Expr>>) -> Rc<Expr> {
    e(ExprKind::BuiltinCall {
        name: InternedSymbol::new(name),
        args,
    })
}

pub fn field(container: Rc<Expr>, name: &str) -> Rc<Expr> {
    e(ExprKind::FieldAccess {
        container,
        field: InternedSymbol::new(name),
    })
}

pub fn index(array: Rc<Expr>, i: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::ArrayAccess { array, index: i })
}

pub fn binop(op: BinOpKind, lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::BinOp { op, lhs, rhs })
}

pub fn prefix(op: PrefixOpKind, operand: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::PrefixOp { op, operand })
}

pub fn assign(lhs: Rc<Expr>, rhs: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::Assign {
        op: None,
        lhs,
        rhs,
    })
}

pub fn ret(value: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::Return {
        kind: ReturnKind::Normal,
        value: Some(value),
    })
}

pub fn defer_(kind: DeferKind, expr: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::Defer { kind, expr })
}

pub fn label(name: &str) -> Rc<Expr> {
    e(ExprKind::Label(InternedSymbol::new(name)))
}

pub fn goto(name: &str) -> Rc<Expr> {
    e(ExprKind::Goto(InternedSymbol::new(name)))
}

pub fn array_ty(len: u64, child: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::ArrayType {
        len: Some(int(len)),
        child,
        is_const: false,
    })
}

pub fn maybe_ty(child: Rc<Expr>) -> Rc<Expr> {
    e(ExprKind::MaybeType(child))
}

pub fn array_init(ty: Rc<Expr>, items: Vec<Rc<Expr>>) -> Rc<Expr> {
    e(ExprKind::ContainerInit {
        ty,
        kind: ContainerInitKind::List(items),
    })
}

pub fn fields_init(ty: Rc<Expr>, fields: Vec<(&str, Rc<Expr>)>) -> Rc<Expr> {
    e(ExprKind::ContainerInit {
        ty,
        kind: ContainerInitKind::Fields(
            fields
                .into_iter()
                .map(|(name, value)| FieldInit {
                    span: Span::ZERO,
                    name: InternedSymbol::new(name),
                    value,
                })
                .collect(),
        ),
    })
}

pub fn switch(target: Rc<Expr>, prongs: Vec<SwitchProng>) -> Rc<Expr> {
    e(ExprKind::Switch(Rc::new(SwitchExpr { target, prongs })))
}

pub fn prong_items(items: Vec<Rc<Expr>>, body: Rc<Expr>) -> SwitchProng {
    SwitchProng {
        span: Span::ZERO,
        items: items.into_iter().map(SwitchItem::Single).collect(),
        payload: None,
        body,
    }
}

pub fn prong_range(start: u64, end: u64, body: Rc<Expr>) -> SwitchProng {
    SwitchProng {
        span: Span::ZERO,
        items: vec![SwitchItem::Range {
            start: int(start),
            end: int(end),
        }],
        payload: None,
        body,
    }
}

pub fn prong_else(body: Rc<Expr>) -> SwitchProng {
    SwitchProng {
        span: Span::ZERO,
        items: Vec::new(),
        payload: None,
        body,
    }
}

/// Registers a nullary function returning `ret_ty` whose call sites analyze
/// to runtime values. The body is never inlined.
pub fn register_runtime_fn(unit: &mut CompileUnit, name: &str, ret_ty: Type) {
    let sig = FnSig {
        params: Vec::new(),
        ret: ret_ty,
        is_var_args: false,
    };
    let proto = FnProto {
        span: Span::ZERO,
        name: InternedSymbol::new(name),
        params: Vec::new(),
        return_ty: None,
        is_inline: false,
        is_var_args: false,
    };
    unit.add_fn(proto, ret(boolean(true)), sig);
}

/// Registers an inline function so call sites fold through the abstract
/// interpreter. Parameter type expressions in the proto are cosmetic; the
/// signature passed here is authoritative.
pub fn register_inline_fn(
    unit: &mut CompileUnit,
    name: &str,
    params: Vec<(&str, Type)>,
    ret_ty: Type,
    body: Rc<Expr>,
) {
    let sig = FnSig {
        params: params.iter().map(|(_, ty)| ty.clone()).collect(),
        ret: ret_ty,
        is_var_args: false,
    };
    let proto = FnProto {
        span: Span::ZERO,
        name: InternedSymbol::new(name),
        params: params
            .iter()
            .map(|(param_name, _)| ParamDecl {
                span: Span::ZERO,
                name: InternedSymbol::new(param_name),
                ty: sym("u32"),
            })
            .collect(),
        return_ty: None,
        is_inline: true,
        is_var_args: false,
    };
    unit.add_fn(proto, body, sig);
}

/// Mnemonics of every instruction in a verified executable, in arena order
pub fn mnemonics(exec: &cinder::Executable) -> Vec<&'static str> {
    exec.insts.iter().map(|inst| inst.kind.mnemonic()).collect()
}
