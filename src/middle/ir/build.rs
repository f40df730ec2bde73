//! AST → unverified IR. Each node in a scope becomes an instruction (or a
//! short sequence) appended to the current basic block. The `purpose`
//! parameter decides whether an expression yields its value or a pointer to
//! its storage; asking for an lvalue suppresses the final dereference.
//!
//! Nothing here knows result types: the builder records structure and
//! constants, and the analyzer assigns every type later.

use std::{rc::Rc, str::FromStr};

use strum::EnumString;

use crate::{
    frontend::{
        ast::{
            self, BinOpKind, Block, ContainerInitKind, DeferKind, Expr, ExprKind, PrefixOpKind,
            ReturnKind, SwitchItem,
        },
        intern::InternedSymbol,
        Span,
    },
    middle::{
        ir::{
            AsmBinding, AsmInputEntry, BlockId, Executable, FieldInitEntry, GotoFixup, InstId,
            InstKind, Instruction, LabelEntry, ReturnKnowledge, SwitchCase, UnOpKind,
        },
        scope::{CompileUnit, FnId, ScopeId, ScopeKind, VarId},
        ty::Type,
        value::{ConstPtr, StaticValue, Value},
    },
};

/// What the surrounding expression needs from a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LValPurpose {
    /// Yield the node's value
    RValue,
    /// Yield a pointer to the node's storage, for a store
    Assign,
    /// Yield a pointer to the node's storage, for `&`
    AddressOf,
}

/// Which kind of control-flow exit is leaving a scope; decides which defers
/// re-emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferExit {
    Normal,
    ErrorReturn,
    NullReturn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "camelCase")]
enum BuiltinFn {
    TypeOf,
    SizeOf,
    Import,
    CompileVar,
    Clz,
    Ctz,
    StaticEval,
    ArrayLen,
    SetFnTest,
    SetFnVisible,
    SetDebugSafety,
}

impl BuiltinFn {
    fn arity(self) -> usize {
        match self {
            Self::TypeOf
            | Self::SizeOf
            | Self::Import
            | Self::CompileVar
            | Self::Clz
            | Self::Ctz
            | Self::StaticEval
            | Self::ArrayLen => 1,
            Self::SetFnTest | Self::SetFnVisible | Self::SetDebugSafety => 2,
        }
    }
}

pub struct IrBuilder<'unit> {
    unit: &'unit mut CompileUnit,
    exec: Executable,
    current_block: BlockId,
    current_scope: ScopeId,
    break_stack: Vec<BlockId>,
    continue_stack: Vec<BlockId>,
    /// Scope each enclosing loop was entered from; bounds defer walks on
    /// break and continue
    loop_scope_stack: Vec<ScopeId>,
}

/// Builds an executable from a root expression. The expression's value
/// becomes the executable's return value.
pub fn build_executable(
    unit: &mut CompileUnit,
    root: &Rc<Expr>,
    is_inline: bool,
) -> Executable {
    let scope = unit.create_scope(None, ScopeKind::Block, Some(root.clone()));
    build_in_scope(unit, root, scope, is_inline)
}

/// Builds the executable for a function body. Parameter variables already
/// exist in the function's scope (see [`declare_params`]).
pub fn build_fn_executable(unit: &mut CompileUnit, fn_id: FnId, is_inline: bool) -> Executable {
    let scope = unit.fns[fn_id].scope;
    let body = unit.fns[fn_id].body.clone();
    build_in_scope(unit, &body, scope, is_inline)
}

/// Creates the parameter variables for a function in its body scope,
/// returning them in declaration order. Their types come pre-resolved from
/// the signature.
pub fn declare_params(unit: &mut CompileUnit, fn_id: FnId) -> Vec<VarId> {
    let scope = unit.fns[fn_id].scope;
    let params: Vec<_> = unit.fns[fn_id]
        .proto
        .params
        .iter()
        .map(|p| (p.name, p.span))
        .collect();
    let types: Vec<Type> = unit.fns[fn_id].sig.params.clone();

    params
        .iter()
        .zip(types)
        .map(|(&(name, span), ty)| {
            let var = unit.add_variable(scope, name, span, true, false);
            unit.variables[var].ty = ty;
            var
        })
        .collect()
}

fn build_in_scope(
    unit: &mut CompileUnit,
    root: &Rc<Expr>,
    scope: ScopeId,
    is_inline: bool,
) -> Executable {
    let mut exec = Executable::new(is_inline);
    let entry = exec.create_block("Entry");

    let mut builder = IrBuilder {
        unit,
        exec,
        current_block: entry,
        current_scope: scope,
        break_stack: Vec::new(),
        continue_stack: Vec::new(),
        loop_scope_stack: Vec::new(),
    };

    let result = builder.build_node(root, LValPurpose::RValue);

    if !builder.exec.is_terminated(builder.current_block) {
        builder.emit_defers(builder.current_scope, None, DeferExit::Normal);
        builder.add_inst(root.span, InstKind::Return { operand: result });
    }

    builder.resolve_gotos();
    builder.exec
}

impl<'unit> IrBuilder<'unit> {
    /* Plumbing */

    fn add_inst(&mut self, span: Span, kind: InstKind) -> InstId {
        for operand in kind.operands() {
            self.exec.ref_inst(operand);
        }
        for target in kind.branch_targets() {
            self.exec.ref_block(target);
        }

        let ty = self.unit.types.invalid();
        let debug_id = self.exec.take_debug_id();
        let id = self.exec.insts.push(Instruction {
            debug_id,
            span,
            scope: self.current_scope,
            ty,
            value: Value::runtime(),
            ref_count: 0,
            return_knowledge: ReturnKnowledge::None,
            kind,
        });
        self.exec.blocks[self.current_block].instructions.push(id);
        id
    }

    /// A constant instruction with its type known at construction time
    fn build_const(&mut self, span: Span, ty: Type, value: Value) -> InstId {
        let id = self.add_inst(span, InstKind::Const);
        self.exec.insts[id].ty = ty;
        self.exec.insts[id].value = value;
        id
    }

    fn const_void(&mut self, span: Span) -> InstId {
        let ty = self.unit.types.void();
        self.build_const(span, ty, Value::new_static(StaticValue::Struct(Vec::new())))
    }

    fn const_usize(&mut self, span: Span, value: usize) -> InstId {
        let ty = self.unit.types.usize_type();
        self.build_const(span, ty, Value::from_usize(value))
    }

    /// Error already reported; produce a poisoned constant so downstream
    /// consumers stay quiet
    fn build_invalid(&mut self, span: Span) -> InstId {
        let ty = self.unit.types.invalid();
        self.build_const(span, ty, Value::undef())
    }

    fn set_cursor(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// After an unconditional transfer the builder keeps appending into a
    /// fresh block no branch targets; the analyzer never reaches it.
    fn cursor_to_dead_block(&mut self) {
        let dead = self.exec.create_block("Dead");
        self.set_cursor(dead);
    }

    fn push_scope(&mut self, kind: ScopeKind, node: Option<Rc<Expr>>) -> ScopeId {
        let previous = self.current_scope;
        self.current_scope = self
            .unit
            .create_scope(Some(previous), kind, node);
        previous
    }

    fn should_inline(&self) -> bool {
        self.exec.is_inline
    }

    fn safety_on(&self) -> bool {
        self.unit.debug_safety_enabled(self.current_scope)
    }

    /* Defers */

    /// Walks scopes from `inner` outward (stopping before `outer`,
    /// all the way out when `None`) re-emitting the defer expressions whose
    /// kind matches the exit condition.
    fn emit_defers(&mut self, inner: ScopeId, outer: Option<ScopeId>, exit: DeferExit) {
        let mut cursor = Some(inner);

        while let Some(scope_id) = cursor {
            if Some(scope_id) == outer {
                break;
            }

            let defers = self.unit.scopes[scope_id].defers.clone();
            for entry in defers.iter().rev() {
                let runs = match entry.kind {
                    DeferKind::Unconditional => true,
                    DeferKind::Error => exit == DeferExit::ErrorReturn,
                    DeferKind::Maybe => exit == DeferExit::NullReturn,
                };
                if runs {
                    self.build_node(&entry.expr, LValPurpose::RValue);
                }
            }

            cursor = self.unit.scopes[scope_id].parent;
        }
    }

    /* Dispatch */

    fn build_node(&mut self, node: &Rc<Expr>, purpose: LValPurpose) -> InstId {
        match &node.kind {
            ExprKind::NumLit(num) => {
                let ty = if num.is_float() {
                    self.unit.types.lit_float()
                } else {
                    self.unit.types.lit_int()
                };
                let id = self.build_const(node.span, ty, Value::from_num(num.clone()));
                self.deref_if_rvalue_wanted(id, node.span, purpose, true)
            }
            ExprKind::BoolLit(value) => {
                let ty = self.unit.types.bool();
                self.build_const(node.span, ty, Value::from_bool(*value))
            }
            ExprKind::CharLit(c) => {
                let ty = self.unit.types.lit_int();
                self.build_const(node.span, ty, Value::from_u64(*c as u64))
            }
            ExprKind::StrLit { value, is_c } => self.build_str_lit(node.span, *value, *is_c),
            ExprKind::NullLit => {
                let ty = self.unit.types.null_lit();
                self.build_const(node.span, ty, Value::new_static(StaticValue::Maybe(None)))
            }
            ExprKind::UndefinedLit => {
                let ty = self.unit.types.undef_lit();
                self.build_const(node.span, ty, Value::undef())
            }
            ExprKind::Unreachable => {
                let id = self.add_inst(node.span, InstKind::Unreachable);
                self.cursor_to_dead_block();
                id
            }
            ExprKind::Symbol(name) => self.build_symbol(node.span, *name, purpose),
            ExprKind::Block(block) => self.build_block(node, block),
            ExprKind::BinOp { op, lhs, rhs } => self.build_bin_op(node, *op, lhs, rhs),
            ExprKind::PrefixOp { op, operand } => {
                self.build_prefix_op(node, *op, operand, purpose)
            }
            ExprKind::Assign { op, lhs, rhs } => self.build_assign(node, *op, lhs, rhs),
            ExprKind::VarDecl(decl) => self.build_var_decl(node, decl),
            ExprKind::If(if_expr) => self.build_if(node, if_expr),
            ExprKind::While(while_expr) => self.build_while(node, while_expr),
            ExprKind::For(for_expr) => self.build_for(node, for_expr),
            ExprKind::Switch(switch_expr) => self.build_switch(node, switch_expr),
            ExprKind::Label(name) => self.build_label(node.span, *name),
            ExprKind::Goto(name) => self.build_goto(node.span, *name),
            ExprKind::Break => self.build_break(node.span),
            ExprKind::Continue => self.build_continue(node.span),
            ExprKind::Defer { kind, expr } => {
                self.unit.scopes[self.current_scope]
                    .defers
                    .push(crate::middle::scope::DeferEntry {
                        kind: *kind,
                        expr: expr.clone(),
                    });
                self.const_void(node.span)
            }
            ExprKind::Return { kind, value } => self.build_return(node.span, *kind, value),
            ExprKind::Call { callee, args } => {
                let callee = self.build_node(callee, LValPurpose::RValue);
                let args = args
                    .iter()
                    .map(|a| self.build_node(a, LValPurpose::RValue))
                    .collect();
                self.add_inst(node.span, InstKind::Call { callee, args })
            }
            ExprKind::BuiltinCall { name, args } => self.build_builtin_call(node.span, *name, args),
            ExprKind::FieldAccess { container, field } => {
                let container_ptr = self.build_node(container, LValPurpose::AddressOf);
                let ptr = self.add_inst(
                    node.span,
                    InstKind::FieldPtr {
                        container_ptr,
                        field_name: *field,
                    },
                );
                self.deref_if_rvalue_wanted(ptr, node.span, purpose, false)
            }
            ExprKind::ArrayAccess { array, index } => {
                let array_ptr = self.build_node(array, LValPurpose::AddressOf);
                let index = self.build_node(index, LValPurpose::RValue);
                let ptr = self.add_inst(
                    node.span,
                    InstKind::ElemPtr {
                        array_ptr,
                        index,
                        safety_check_on: self.safety_on(),
                    },
                );
                self.deref_if_rvalue_wanted(ptr, node.span, purpose, false)
            }
            ExprKind::Slice {
                array,
                start,
                end,
                is_const,
            } => {
                let array_ptr = self.build_node(array, LValPurpose::AddressOf);
                let start = self.build_node(start, LValPurpose::RValue);
                let end = end
                    .as_ref()
                    .map(|e| self.build_node(e, LValPurpose::RValue));
                self.add_inst(
                    node.span,
                    InstKind::Slice {
                        array_ptr,
                        start,
                        end,
                        is_const: *is_const,
                        safety_check_on: self.safety_on(),
                    },
                )
            }
            ExprKind::ContainerInit { ty, kind } => {
                let container_type = self.build_node(ty, LValPurpose::RValue);
                match kind {
                    ContainerInitKind::List(items) => {
                        let items = items
                            .iter()
                            .map(|i| self.build_node(i, LValPurpose::RValue))
                            .collect();
                        self.add_inst(
                            node.span,
                            InstKind::ContainerInitList {
                                container_type,
                                items,
                            },
                        )
                    }
                    ContainerInitKind::Fields(fields) => {
                        let fields = fields
                            .iter()
                            .map(|f| FieldInitEntry {
                                span: f.span,
                                name: f.name,
                                value: self.build_node(&f.value, LValPurpose::RValue),
                            })
                            .collect();
                        self.add_inst(
                            node.span,
                            InstKind::ContainerInitFields {
                                container_type,
                                fields,
                            },
                        )
                    }
                }
            }
            ExprKind::ArrayType {
                len,
                child,
                is_const,
            } => {
                let child_inst = self.build_node(child, LValPurpose::RValue);
                match len {
                    Some(len) => {
                        let len = self.build_node(len, LValPurpose::RValue);
                        self.add_inst(
                            node.span,
                            InstKind::ArrayType {
                                len,
                                child: child_inst,
                            },
                        )
                    }
                    None => self.add_inst(
                        node.span,
                        InstKind::SliceType {
                            child: child_inst,
                            is_const: *is_const,
                        },
                    ),
                }
            }
            ExprKind::PointerType { child, is_const } => {
                // `&T` reuses the address-of instruction: a ref of a
                // metatype value analyzes to a pointer type
                let operand = self.build_node(child, LValPurpose::RValue);
                self.add_inst(
                    node.span,
                    InstKind::Ref {
                        operand,
                        is_const: *is_const,
                    },
                )
            }
            ExprKind::MaybeType(child) => {
                let child = self.build_node(child, LValPurpose::RValue);
                self.add_inst(node.span, InstKind::MaybeType { child })
            }
            ExprKind::Asm(asm) => self.build_asm(node.span, asm),
        }
    }

    /// Emits the final dereference for rvalue consumers of a pointer, or
    /// hands the pointer through untouched. `already_value` short-circuits
    /// for nodes that produced a value directly.
    fn deref_if_rvalue_wanted(
        &mut self,
        id: InstId,
        span: Span,
        purpose: LValPurpose,
        already_value: bool,
    ) -> InstId {
        match purpose {
            LValPurpose::RValue if already_value => id,
            LValPurpose::RValue => self.add_inst(span, InstKind::LoadPtr { ptr: id }),
            LValPurpose::Assign | LValPurpose::AddressOf if already_value => {
                // taking the address of a temporary pins it
                self.add_inst(
                    span,
                    InstKind::Ref {
                        operand: id,
                        is_const: false,
                    },
                )
            }
            LValPurpose::Assign | LValPurpose::AddressOf => id,
        }
    }

    /* Leaves */

    fn build_str_lit(&mut self, span: Span, value: InternedSymbol, is_c: bool) -> InstId {
        let u8_ty = self.unit.types.int_type(8, false);
        let mut elements: Vec<Value> = value
            .value()
            .bytes()
            .map(|b| Value::from_u64(b as u64))
            .collect();

        if is_c {
            elements.push(Value::from_u64(0));
            let base = Value::new_static(StaticValue::Array(elements));
            let ptr = ConstPtr {
                base: Box::new(base),
                index: Some(0),
                is_c_str: true,
            };
            let ty = self.unit.types.pointer_to(u8_ty, true);
            self.build_const(span, ty, Value::new_static(StaticValue::Ptr(ptr)))
        } else {
            let len = elements.len();
            let ty = self.unit.types.array_of(u8_ty, len);
            self.build_const(span, ty, Value::new_static(StaticValue::Array(elements)))
        }
    }

    fn build_symbol(
        &mut self,
        span: Span,
        name: InternedSymbol,
        purpose: LValPurpose,
    ) -> InstId {
        if name.value() == "this" {
            let ty = self.unit.types.intern(crate::middle::ty::TypeKind::Block);
            return self.build_const(
                span,
                ty,
                Value::new_static(StaticValue::Scope(self.current_scope)),
            );
        }

        if let Some(var) = self.unit.find_variable(self.current_scope, name) {
            self.unit.variables[var].ref_count += 1;
            let ptr = self.add_inst(span, InstKind::VarPtr { var });
            return self.deref_if_rvalue_wanted(ptr, span, purpose, false);
        }

        if let Some(ty) = self.unit.types.primitive(name) {
            let metatype = self.unit.types.metatype();
            return self.build_const(span, metatype, Value::from_type(ty));
        }

        if let Some(fn_id) = self.unit.find_fn(name) {
            let fn_ty = self.unit.fns[fn_id].ty.clone();
            return self.build_const(span, fn_ty, Value::new_static(StaticValue::Fn(fn_id)));
        }

        self.unit
            .sink
            .error(span, format!("use of undeclared identifier '{name}'"));
        self.build_invalid(span)
    }

    fn build_block(&mut self, node: &Rc<Expr>, block: &Block) -> InstId {
        let previous = self.push_scope(ScopeKind::Block, Some(node.clone()));

        let mut result = None;
        for statement in &block.statements {
            result = Some(self.build_node(statement, LValPurpose::RValue));
        }

        // fall-through runs this scope's unconditional defers
        if !self.exec.is_terminated(self.current_block) {
            self.emit_defers(self.current_scope, Some(previous), DeferExit::Normal);
        }

        self.current_scope = previous;
        result.unwrap_or_else(|| self.const_void(node.span))
    }

    /* Operators */

    fn build_bin_op(
        &mut self,
        node: &Rc<Expr>,
        op: BinOpKind,
        lhs: &Rc<Expr>,
        rhs: &Rc<Expr>,
    ) -> InstId {
        // comparisons against `null` probe the maybe directly
        if matches!(op, BinOpKind::CmpEq | BinOpKind::CmpNeq) {
            let null_on_rhs = matches!(rhs.kind, ExprKind::NullLit);
            let null_on_lhs = matches!(lhs.kind, ExprKind::NullLit);

            if null_on_rhs || null_on_lhs {
                let operand = if null_on_rhs { lhs } else { rhs };
                let operand = self.build_node(operand, LValPurpose::RValue);
                let test = self.add_inst(node.span, InstKind::TestNull { operand });

                return if op == BinOpKind::CmpEq {
                    test
                } else {
                    self.add_inst(
                        node.span,
                        InstKind::UnOp {
                            op: UnOpKind::BoolNot,
                            operand: test,
                        },
                    )
                };
            }
        }

        if op == BinOpKind::UnwrapOr {
            return self.build_unwrap_or(node, lhs, rhs);
        }

        let lhs = self.build_node(lhs, LValPurpose::RValue);
        let rhs = self.build_node(rhs, LValPurpose::RValue);
        self.add_inst(node.span, InstKind::BinOp { op, lhs, rhs })
    }

    /// `a ?? b`: test for null, unwrap on the non-null path, evaluate the
    /// default otherwise, join in a phi
    fn build_unwrap_or(&mut self, node: &Rc<Expr>, lhs: &Rc<Expr>, rhs: &Rc<Expr>) -> InstId {
        let maybe_val = self.build_node(lhs, LValPurpose::RValue);
        let is_null = self.add_inst(node.span, InstKind::TestNull { operand: maybe_val });

        let ok_block = self.exec.create_block("UnwrapOk");
        let null_block = self.exec.create_block("UnwrapNull");
        let end_block = self.exec.create_block("UnwrapEnd");

        self.add_inst(
            node.span,
            InstKind::CondBr {
                condition: is_null,
                then_block: null_block,
                else_block: ok_block,
                is_inline: self.should_inline(),
            },
        );

        self.set_cursor(ok_block);
        // guarded by the null test, so no safety check
        let unwrapped = self.add_inst(
            node.span,
            InstKind::UnwrapMaybe {
                operand: maybe_val,
                safety_check_on: false,
            },
        );
        self.add_inst(
            node.span,
            InstKind::Br {
                dest: end_block,
                is_inline: self.should_inline(),
            },
        );
        let ok_end = self.current_block;

        self.set_cursor(null_block);
        let default_value = self.build_node(rhs, LValPurpose::RValue);
        self.add_inst(
            node.span,
            InstKind::Br {
                dest: end_block,
                is_inline: self.should_inline(),
            },
        );
        let null_end = self.current_block;

        self.set_cursor(end_block);
        self.add_inst(
            node.span,
            InstKind::Phi {
                incoming_blocks: vec![ok_end, null_end],
                incoming_values: vec![unwrapped, default_value],
            },
        )
    }

    fn build_prefix_op(
        &mut self,
        node: &Rc<Expr>,
        op: PrefixOpKind,
        operand: &Rc<Expr>,
        purpose: LValPurpose,
    ) -> InstId {
        match op {
            PrefixOpKind::Negate => self.build_un_op(node, UnOpKind::Negate, operand),
            PrefixOpKind::NegateWrap => self.build_un_op(node, UnOpKind::NegateWrap, operand),
            PrefixOpKind::BoolNot => self.build_un_op(node, UnOpKind::BoolNot, operand),
            PrefixOpKind::BitNot => self.build_un_op(node, UnOpKind::BitNot, operand),
            PrefixOpKind::AddressOf | PrefixOpKind::ConstAddressOf => {
                let is_const = op == PrefixOpKind::ConstAddressOf;
                match &operand.kind {
                    // lvalues give their storage address directly
                    ExprKind::Symbol(_)
                    | ExprKind::FieldAccess { .. }
                    | ExprKind::ArrayAccess { .. } => {
                        let ptr = self.build_node(operand, LValPurpose::AddressOf);
                        // a mutable address escaping a binding ends its
                        // compile-time life
                        if !is_const {
                            if let Some(var) = self.root_var_of(ptr) {
                                if !self.unit.variables[var].src_is_const {
                                    self.unit.variables[var].gen_is_const = false;
                                }
                            }
                        }
                        ptr
                    }
                    _ => {
                        let operand = self.build_node(operand, LValPurpose::RValue);
                        self.add_inst(node.span, InstKind::Ref { operand, is_const })
                    }
                }
            }
            PrefixOpKind::Deref => {
                let ptr = self.build_node(operand, LValPurpose::RValue);
                self.deref_if_rvalue_wanted(ptr, node.span, purpose, false)
            }
            PrefixOpKind::UnwrapMaybe => {
                let operand = self.build_node(operand, LValPurpose::RValue);
                self.add_inst(
                    node.span,
                    InstKind::UnwrapMaybe {
                        operand,
                        safety_check_on: self.safety_on(),
                    },
                )
            }
        }
    }

    fn build_un_op(&mut self, node: &Rc<Expr>, op: UnOpKind, operand: &Rc<Expr>) -> InstId {
        let operand = self.build_node(operand, LValPurpose::RValue);
        self.add_inst(node.span, InstKind::UnOp { op, operand })
    }

    /// Follows a pointer-producing instruction chain back to the variable
    /// whose storage it addresses, if any
    fn root_var_of(&self, mut id: InstId) -> Option<VarId> {
        loop {
            match &self.exec.insts[id].kind {
                InstKind::VarPtr { var } => return Some(*var),
                InstKind::FieldPtr { container_ptr, .. } => id = *container_ptr,
                InstKind::ElemPtr { array_ptr, .. } => id = *array_ptr,
                _ => return None,
            }
        }
    }

    fn build_assign(
        &mut self,
        node: &Rc<Expr>,
        op: Option<BinOpKind>,
        lhs: &Rc<Expr>,
        rhs: &Rc<Expr>,
    ) -> InstId {
        let ptr = self.build_node(lhs, LValPurpose::Assign);

        if let Some(var) = self.root_var_of(ptr) {
            let (src_is_const, name) = {
                let variable = &self.unit.variables[var];
                (variable.src_is_const, variable.name)
            };
            if src_is_const {
                self.unit
                    .sink
                    .error(node.span, format!("cannot assign to constant '{name}'"));
                return self.build_invalid(node.span);
            }
            self.unit.variables[var].gen_is_const = false;
        }

        let rhs_value = self.build_node(rhs, LValPurpose::RValue);
        let value = match op {
            None => rhs_value,
            Some(op) => {
                let loaded = self.add_inst(node.span, InstKind::LoadPtr { ptr });
                self.add_inst(
                    node.span,
                    InstKind::BinOp {
                        op,
                        lhs: loaded,
                        rhs: rhs_value,
                    },
                )
            }
        };

        self.add_inst(node.span, InstKind::StorePtr { ptr, value });
        self.const_void(node.span)
    }

    /* Declarations */

    fn build_var_decl(&mut self, node: &Rc<Expr>, decl: &ast::VarDecl) -> InstId {
        if self
            .unit
            .find_variable(self.current_scope, decl.name)
            .is_some()
        {
            self.unit.sink.error(
                node.span,
                format!("redeclaration of variable '{}'", decl.name),
            );
            return self.build_invalid(node.span);
        }

        if self.unit.types.primitive(decl.name).is_some() {
            self.unit
                .sink
                .error(node.span, format!("variable shadows type '{}'", decl.name));
            return self.build_invalid(node.span);
        }

        let var_type = decl
            .ty
            .as_ref()
            .map(|ty| self.build_node(ty, LValPurpose::RValue));

        let init = match &decl.init {
            Some(init) => self.build_node(init, LValPurpose::RValue),
            None => {
                let ty = self.unit.types.undef_lit();
                self.build_const(node.span, ty, Value::undef())
            }
        };

        let var = self.unit.add_variable(
            self.current_scope,
            decl.name,
            node.span,
            decl.src_is_const,
            decl.is_inline,
        );

        self.add_inst(
            node.span,
            InstKind::DeclVar {
                var,
                var_type,
                init,
            },
        )
    }

    /* Control flow */

    fn build_if(&mut self, node: &Rc<Expr>, if_expr: &ast::IfExpr) -> InstId {
        let condition = self.build_node(&if_expr.condition, LValPurpose::RValue);

        let then_block = self.exec.create_block("Then");
        let else_block = self.exec.create_block("Else");
        let end_block = self.exec.create_block("EndIf");

        self.add_inst(
            node.span,
            InstKind::CondBr {
                condition,
                then_block,
                else_block,
                is_inline: self.should_inline(),
            },
        );

        self.set_cursor(then_block);
        let then_value = self.build_node(&if_expr.then_body, LValPurpose::RValue);
        let then_end = self.current_block;
        let then_terminated = self.exec.is_terminated(then_end);
        if !then_terminated {
            self.add_inst(
                node.span,
                InstKind::Br {
                    dest: end_block,
                    is_inline: self.should_inline(),
                },
            );
        }

        self.set_cursor(else_block);
        let else_value = match &if_expr.else_body {
            Some(else_body) => self.build_node(else_body, LValPurpose::RValue),
            None => self.const_void(node.span),
        };
        let else_end = self.current_block;
        let else_terminated = self.exec.is_terminated(else_end);
        if !else_terminated {
            self.add_inst(
                node.span,
                InstKind::Br {
                    dest: end_block,
                    is_inline: self.should_inline(),
                },
            );
        }

        self.set_cursor(end_block);

        let mut incoming_blocks = Vec::new();
        let mut incoming_values = Vec::new();
        if !then_terminated {
            incoming_blocks.push(then_end);
            incoming_values.push(then_value);
        }
        if !else_terminated {
            incoming_blocks.push(else_end);
            incoming_values.push(else_value);
        }

        self.add_inst(
            node.span,
            InstKind::Phi {
                incoming_blocks,
                incoming_values,
            },
        )
    }

    fn build_while(&mut self, node: &Rc<Expr>, while_expr: &ast::WhileExpr) -> InstId {
        let inline = while_expr.is_inline || self.should_inline();
        let entered_from = self.current_scope;

        let cond_block = self.exec.create_block("WhileCond");
        let body_block = self.exec.create_block("WhileBody");
        let end_block = self.exec.create_block("WhileEnd");
        // the continue block is the condition block when there is no
        // continue expression
        let continue_block = if while_expr.continue_expr.is_some() {
            self.exec.create_block("WhileContinue")
        } else {
            cond_block
        };

        self.add_inst(
            node.span,
            InstKind::Br {
                dest: cond_block,
                is_inline: inline,
            },
        );

        self.set_cursor(cond_block);
        let condition = self.build_node(&while_expr.condition, LValPurpose::RValue);
        self.add_inst(
            node.span,
            InstKind::CondBr {
                condition,
                then_block: body_block,
                else_block: end_block,
                is_inline: inline,
            },
        );

        self.break_stack.push(end_block);
        self.continue_stack.push(continue_block);
        self.loop_scope_stack.push(entered_from);

        self.set_cursor(body_block);
        let previous = self.push_scope(ScopeKind::Loop, Some(node.clone()));
        self.build_node(&while_expr.body, LValPurpose::RValue);
        if !self.exec.is_terminated(self.current_block) {
            self.emit_defers(self.current_scope, Some(previous), DeferExit::Normal);
            self.add_inst(
                node.span,
                InstKind::Br {
                    dest: continue_block,
                    is_inline: inline,
                },
            );
        }
        self.current_scope = previous;

        if let Some(continue_expr) = &while_expr.continue_expr {
            self.set_cursor(continue_block);
            self.build_node(continue_expr, LValPurpose::RValue);
            self.add_inst(
                node.span,
                InstKind::Br {
                    dest: cond_block,
                    is_inline: inline,
                },
            );
        }

        self.break_stack.pop();
        self.continue_stack.pop();
        self.loop_scope_stack.pop();

        self.set_cursor(end_block);
        self.const_void(node.span)
    }

    fn build_for(&mut self, node: &Rc<Expr>, for_expr: &ast::ForExpr) -> InstId {
        let inline = for_expr.is_inline || self.should_inline();
        let entered_from = self.current_scope;
        let previous = self.push_scope(ScopeKind::Loop, Some(node.clone()));

        let array_ptr = self.build_node(&for_expr.array, LValPurpose::AddressOf);
        let array_val = self.add_inst(node.span, InstKind::LoadPtr { ptr: array_ptr });

        // element type: @typeOf(array) -> to_ptr_type -> ptr_type_child
        let array_type = self.add_inst(node.span, InstKind::TypeOf { operand: array_val });
        let elem_ptr_type = self.add_inst(node.span, InstKind::ToPtrType { operand: array_type });
        let elem_type = self.add_inst(
            node.span,
            InstKind::PtrTypeChild {
                operand: elem_ptr_type,
            },
        );

        // hidden induction variable of the platform size-index type
        let usize_ty = self.unit.types.usize_type();
        let metatype = self.unit.types.metatype();
        let usize_type_inst = self.build_const(node.span, metatype, Value::from_type(usize_ty));
        let zero = self.const_usize(node.span, 0);
        let index_var = self.unit.add_variable(
            self.current_scope,
            InternedSymbol::new("(for index)"),
            node.span,
            false,
            false,
        );
        self.unit.variables[index_var].gen_is_const = false;
        self.add_inst(
            node.span,
            InstKind::DeclVar {
                var: index_var,
                var_type: Some(usize_type_inst),
                init: zero,
            },
        );
        let index_ptr = self.add_inst(node.span, InstKind::VarPtr { var: index_var });

        let cond_block = self.exec.create_block("ForCond");
        let body_block = self.exec.create_block("ForBody");
        let incr_block = self.exec.create_block("ForIncr");
        let end_block = self.exec.create_block("ForEnd");

        self.add_inst(
            node.span,
            InstKind::Br {
                dest: cond_block,
                is_inline: inline,
            },
        );

        self.set_cursor(cond_block);
        let index_val = self.add_inst(node.span, InstKind::LoadPtr { ptr: index_ptr });
        let len = self.add_inst(node.span, InstKind::ArrayLen { array: array_val });
        let condition = self.add_inst(
            node.span,
            InstKind::BinOp {
                op: BinOpKind::CmpLt,
                lhs: index_val,
                rhs: len,
            },
        );
        self.add_inst(
            node.span,
            InstKind::CondBr {
                condition,
                then_block: body_block,
                else_block: end_block,
                is_inline: inline,
            },
        );

        self.break_stack.push(end_block);
        self.continue_stack.push(incr_block);
        self.loop_scope_stack.push(entered_from);

        self.set_cursor(body_block);
        let elem_ptr = self.add_inst(
            node.span,
            InstKind::ElemPtr {
                array_ptr,
                index: index_val,
                safety_check_on: false,
            },
        );
        let elem_val = self.add_inst(node.span, InstKind::LoadPtr { ptr: elem_ptr });
        let elem_var = self.unit.add_variable(
            self.current_scope,
            for_expr.value_name,
            node.span,
            true,
            false,
        );
        self.add_inst(
            node.span,
            InstKind::DeclVar {
                var: elem_var,
                var_type: Some(elem_type),
                init: elem_val,
            },
        );

        if let Some(index_name) = for_expr.index_name {
            let user_index_var =
                self.unit
                    .add_variable(self.current_scope, index_name, node.span, true, false);
            self.add_inst(
                node.span,
                InstKind::DeclVar {
                    var: user_index_var,
                    var_type: Some(usize_type_inst),
                    init: index_val,
                },
            );
        }

        self.build_node(&for_expr.body, LValPurpose::RValue);
        if !self.exec.is_terminated(self.current_block) {
            self.add_inst(
                node.span,
                InstKind::Br {
                    dest: incr_block,
                    is_inline: inline,
                },
            );
        }

        self.set_cursor(incr_block);
        let index_again = self.add_inst(node.span, InstKind::LoadPtr { ptr: index_ptr });
        let one = self.const_usize(node.span, 1);
        let incremented = self.add_inst(
            node.span,
            InstKind::BinOp {
                op: BinOpKind::Add,
                lhs: index_again,
                rhs: one,
            },
        );
        self.add_inst(
            node.span,
            InstKind::StorePtr {
                ptr: index_ptr,
                value: incremented,
            },
        );
        self.add_inst(
            node.span,
            InstKind::Br {
                dest: cond_block,
                is_inline: inline,
            },
        );

        self.break_stack.pop();
        self.continue_stack.pop();
        self.loop_scope_stack.pop();
        self.current_scope = previous;

        self.set_cursor(end_block);
        self.const_void(node.span)
    }

    fn build_switch(&mut self, node: &Rc<Expr>, switch_expr: &ast::SwitchExpr) -> InstId {
        let target_ptr = self.build_node(&switch_expr.target, LValPurpose::Assign);
        let target_value = self.add_inst(node.span, InstKind::SwitchTarget { target_ptr });

        let end_block = self.exec.create_block("SwitchEnd");

        let mut cases: Vec<SwitchCase> = Vec::new();
        let mut else_prong: Option<usize> = None;
        let mut range_prongs: Vec<(usize, BlockId)> = Vec::new();
        let mut prong_blocks: Vec<BlockId> = Vec::new();

        for (i, prong) in switch_expr.prongs.iter().enumerate() {
            let prong_block = self.exec.create_block("SwitchProng");
            prong_blocks.push(prong_block);

            if prong.items.is_empty() {
                if else_prong.is_some() {
                    self.unit
                        .sink
                        .error(prong.span, "multiple else prongs in switch expression");
                } else {
                    else_prong = Some(i);
                }
                continue;
            }

            let mut has_range = false;
            for item in &prong.items {
                match item {
                    SwitchItem::Single(item_expr) => {
                        let value = self.build_node(item_expr, LValPurpose::RValue);
                        cases.push(SwitchCase {
                            value,
                            dest: prong_block,
                        });
                    }
                    SwitchItem::Range { .. } => has_range = true,
                }
            }
            if has_range {
                range_prongs.push((i, prong_block));
            }
        }

        // ranges cannot go through switch dispatch; they become a
        // comparison chain entered from the switch's else edge
        let else_target = if let Some(else_prong) = else_prong {
            prong_blocks[else_prong]
        } else {
            let unreachable_block = self.exec.create_block("SwitchElse");
            let saved = self.current_block;
            self.set_cursor(unreachable_block);
            self.add_inst(node.span, InstKind::Unreachable);
            self.set_cursor(saved);
            unreachable_block
        };

        let dispatch_else = if range_prongs.is_empty() {
            else_target
        } else {
            self.exec.create_block("SwitchRange")
        };

        self.add_inst(
            node.span,
            InstKind::SwitchBr {
                target: target_value,
                cases,
                else_block: dispatch_else,
                is_inline: self.should_inline(),
            },
        );

        if !range_prongs.is_empty() {
            self.set_cursor(dispatch_else);
            let mut remaining = range_prongs.len();
            for (prong_index, prong_block) in range_prongs.clone() {
                remaining -= 1;
                let prong = &switch_expr.prongs[prong_index];

                // (target >= a && target <= b) || ... per range item
                let mut combined: Option<InstId> = None;
                let items: Vec<_> = prong
                    .items
                    .iter()
                    .filter_map(|item| match item {
                        SwitchItem::Range { start, end } => Some((start.clone(), end.clone())),
                        SwitchItem::Single(_) => None,
                    })
                    .collect();
                for (start, end) in items {
                    let start = self.build_node(&start, LValPurpose::RValue);
                    let end = self.build_node(&end, LValPurpose::RValue);
                    let gte = self.add_inst(
                        node.span,
                        InstKind::BinOp {
                            op: BinOpKind::CmpGte,
                            lhs: target_value,
                            rhs: start,
                        },
                    );
                    let lte = self.add_inst(
                        node.span,
                        InstKind::BinOp {
                            op: BinOpKind::CmpLte,
                            lhs: target_value,
                            rhs: end,
                        },
                    );
                    let both = self.add_inst(
                        node.span,
                        InstKind::BinOp {
                            op: BinOpKind::BoolAnd,
                            lhs: gte,
                            rhs: lte,
                        },
                    );
                    combined = Some(match combined {
                        None => both,
                        Some(previous) => self.add_inst(
                            node.span,
                            InstKind::BinOp {
                                op: BinOpKind::BoolOr,
                                lhs: previous,
                                rhs: both,
                            },
                        ),
                    });
                }

                let next_check = if remaining == 0 {
                    else_target
                } else {
                    self.exec.create_block("SwitchRange")
                };

                self.add_inst(
                    node.span,
                    InstKind::CondBr {
                        condition: combined.expect("range prong has at least one range"),
                        then_block: prong_block,
                        else_block: next_check,
                        is_inline: self.should_inline(),
                    },
                );
                self.set_cursor(next_check);
            }
        }

        /* Prong bodies */

        let mut incoming_blocks = Vec::new();
        let mut incoming_values = Vec::new();

        for (i, prong) in switch_expr.prongs.iter().enumerate() {
            let prong_block = prong_blocks[i];
            self.set_cursor(prong_block);
            let previous = self.push_scope(ScopeKind::Block, None);

            if let Some(payload_name) = prong.payload {
                // the payload capture sees the prong-refined target
                let first_item = prong.items.iter().find_map(|item| match item {
                    SwitchItem::Single(e) => Some(e.clone()),
                    SwitchItem::Range { .. } => None,
                });
                if let Some(first_item) = first_item {
                    let prong_value = self.build_node(&first_item, LValPurpose::RValue);
                    let refined = self.add_inst(
                        prong.span,
                        InstKind::SwitchVar {
                            target_ptr,
                            prong_value,
                        },
                    );
                    let payload_var = self.unit.add_variable(
                        self.current_scope,
                        payload_name,
                        prong.span,
                        true,
                        false,
                    );
                    self.add_inst(
                        prong.span,
                        InstKind::DeclVar {
                            var: payload_var,
                            var_type: None,
                            init: refined,
                        },
                    );
                }
            }

            let value = self.build_node(&prong.body, LValPurpose::RValue);
            self.current_scope = previous;

            if !self.exec.is_terminated(self.current_block) {
                incoming_blocks.push(self.current_block);
                incoming_values.push(value);
                self.add_inst(
                    node.span,
                    InstKind::Br {
                        dest: end_block,
                        is_inline: self.should_inline(),
                    },
                );
            }
        }

        self.set_cursor(end_block);
        self.add_inst(
            node.span,
            InstKind::Phi {
                incoming_blocks,
                incoming_values,
            },
        )
    }

    fn build_label(&mut self, span: Span, name: InternedSymbol) -> InstId {
        if self.exec.labels.iter().any(|l| l.name == name) {
            self.unit
                .sink
                .error(span, format!("duplicate label '{name}'"));
            return self.build_invalid(span);
        }

        let label_block = self.exec.create_block("Label");
        let result = self.add_inst(
            span,
            InstKind::Br {
                dest: label_block,
                is_inline: self.should_inline(),
            },
        );
        self.exec.labels.push(LabelEntry {
            name,
            block: label_block,
            span,
            used: false,
        });
        self.set_cursor(label_block);
        result
    }

    /// Gotos start life as unreachable placeholders; pass 2 rewrites each
    /// into a branch once every label has been seen.
    fn build_goto(&mut self, span: Span, name: InternedSymbol) -> InstId {
        let placeholder = self.add_inst(span, InstKind::Unreachable);
        self.exec.goto_fixups.push(GotoFixup {
            name,
            placeholder,
            scope: self.current_scope,
            span,
        });
        self.cursor_to_dead_block();
        placeholder
    }

    fn build_break(&mut self, span: Span) -> InstId {
        let Some(&dest) = self.break_stack.last() else {
            self.unit
                .sink
                .error(span, "'break' expression outside loop");
            return self.build_invalid(span);
        };

        let loop_scope = *self.loop_scope_stack.last().unwrap();
        self.emit_defers(self.current_scope, Some(loop_scope), DeferExit::Normal);

        let result = self.add_inst(
            span,
            InstKind::Br {
                dest,
                is_inline: self.should_inline(),
            },
        );
        self.cursor_to_dead_block();
        result
    }

    fn build_continue(&mut self, span: Span) -> InstId {
        let Some(&dest) = self.continue_stack.last() else {
            self.unit
                .sink
                .error(span, "'continue' expression outside loop");
            return self.build_invalid(span);
        };

        let loop_scope = *self.loop_scope_stack.last().unwrap();
        self.emit_defers(self.current_scope, Some(loop_scope), DeferExit::Normal);

        let result = self.add_inst(
            span,
            InstKind::Br {
                dest,
                is_inline: self.should_inline(),
            },
        );
        self.cursor_to_dead_block();
        result
    }

    fn build_return(
        &mut self,
        span: Span,
        kind: ReturnKind,
        value: &Option<Rc<Expr>>,
    ) -> InstId {
        let operand = match value {
            Some(value) => self.build_node(value, LValPurpose::RValue),
            None => self.const_void(span),
        };

        match kind {
            ReturnKind::Normal => {
                self.emit_defers(self.current_scope, None, DeferExit::Normal);
                let result = self.add_inst(span, InstKind::Return { operand });
                self.cursor_to_dead_block();
                result
            }
            ReturnKind::Error | ReturnKind::Maybe => {
                // required but unimplemented; do not guess semantics
                self.unit
                    .sink
                    .error(span, "unimplemented: error propagating return");
                let result = self.add_inst(span, InstKind::Return { operand });
                self.cursor_to_dead_block();
                result
            }
        }
    }

    /* Builtins */

    fn build_builtin_call(
        &mut self,
        span: Span,
        name: InternedSymbol,
        args: &[Rc<Expr>],
    ) -> InstId {
        let Ok(builtin) = BuiltinFn::from_str(name.value()) else {
            self.unit
                .sink
                .error(span, format!("invalid builtin function: '{name}'"));
            return self.build_invalid(span);
        };

        if args.len() != builtin.arity() {
            self.unit.sink.error(
                span,
                format!(
                    "expected {} arguments, found {}",
                    builtin.arity(),
                    args.len()
                ),
            );
            return self.build_invalid(span);
        }

        let built: Vec<InstId> = args
            .iter()
            .map(|a| self.build_node(a, LValPurpose::RValue))
            .collect();

        let kind = match builtin {
            BuiltinFn::TypeOf => InstKind::TypeOf { operand: built[0] },
            BuiltinFn::SizeOf => InstKind::SizeOf { operand: built[0] },
            BuiltinFn::Import => InstKind::Import { name: built[0] },
            BuiltinFn::CompileVar => InstKind::CompileVar { name: built[0] },
            BuiltinFn::Clz => InstKind::Clz { operand: built[0] },
            BuiltinFn::Ctz => InstKind::Ctz { operand: built[0] },
            BuiltinFn::StaticEval => InstKind::StaticEval { operand: built[0] },
            BuiltinFn::ArrayLen => InstKind::ArrayLen { array: built[0] },
            BuiltinFn::SetFnTest => InstKind::SetFnTest {
                fn_value: built[0],
                enabled: built[1],
            },
            BuiltinFn::SetFnVisible => InstKind::SetFnVisible {
                fn_value: built[0],
                visible: built[1],
            },
            BuiltinFn::SetDebugSafety => InstKind::SetDebugSafety {
                scope_value: built[0],
                enabled: built[1],
            },
        };
        self.add_inst(span, kind)
    }

    fn build_asm(&mut self, span: Span, asm: &Rc<ast::AsmExpr>) -> InstId {
        if asm.outputs.is_empty() && !asm.is_volatile {
            self.unit.sink.error(
                span,
                "assembly expression with no output must be marked volatile",
            );
            return self.build_invalid(span);
        }

        let mut outputs = Vec::new();
        for output in &asm.outputs {
            match self
                .unit
                .find_variable(self.current_scope, output.variable_name)
            {
                Some(var) => {
                    self.unit.variables[var].gen_is_const = false;
                    self.unit.variables[var].ref_count += 1;
                    outputs.push(AsmBinding {
                        constraint: output.constraint,
                        var,
                    });
                }
                None => {
                    self.unit.sink.error(
                        span,
                        format!("use of undeclared identifier '{}'", output.variable_name),
                    );
                    return self.build_invalid(span);
                }
            }
        }

        let inputs = asm
            .inputs
            .iter()
            .map(|input| AsmInputEntry {
                constraint: input.constraint,
                value: self.build_node(&input.expr, LValPurpose::RValue),
            })
            .collect();

        self.add_inst(
            span,
            InstKind::Asm {
                node: asm.clone(),
                outputs,
                inputs,
            },
        )
    }

    /* Goto resolution */

    /// Second pass: resolve every goto fixup against the label table,
    /// turning placeholders into branches, then flag labels nothing jumped
    /// to.
    fn resolve_gotos(&mut self) {
        let fixups = std::mem::take(&mut self.exec.goto_fixups);

        for fixup in fixups {
            match self
                .exec
                .labels
                .iter_mut()
                .find(|label| label.name == fixup.name)
            {
                Some(label) => {
                    label.used = true;
                    let dest = label.block;
                    // swapping the kind in place preserves the ref count
                    self.exec.insts[fixup.placeholder].kind = InstKind::Br {
                        dest,
                        is_inline: false,
                    };
                    self.exec.blocks[dest].ref_count += 1;
                }
                None => {
                    self.unit
                        .sink
                        .error(fixup.span, format!("no label in scope named '{}'", fixup.name));
                }
            }
        }

        for label in &self.exec.labels {
            if !label.used {
                self.unit.sink.error(
                    label.span,
                    format!("label '{}' defined but not used", label.name),
                );
            }
        }
    }
}
