//! IR analysis: rewrites an unverified executable into a verified one where
//! every reachable instruction has a concrete result type and, where
//! possible, a known compile-time value.
//!
//! Analysis is a breadth-first walk over basic blocks. Old instructions are
//! never mutated; a side table maps each old instruction to its verified
//! counterpart, and consumers resolve operands through it. Conditional
//! branches with static conditions (and everything inside an inline
//! executable) are not emitted at all: the analyzer jumps straight into the
//! chosen successor and keeps appending to the current verified block,
//! counting back-edges against the executable's quota.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::{
    frontend::{ast::BinOpKind, intern::InternedSymbol, Span},
    index::IndexVec,
    middle::{
        coerce::{
            classify_cast, implicit_cast_kind, resolve_peer_types, ImplicitCast, PeerEntry,
            PeerResult,
        },
        fold::{fold_bin_op, fold_un_op, FoldError},
        ir::{
            build, BlockId, CastOp, Executable, InstId, InstKind, Instruction, ReturnKnowledge,
            SwitchCase, UnOpKind,
        },
        scope::{CompileUnit, DeclKind, FnId, ImportLookup, ScopeId, VarId},
        ty::{Type, TypeKind},
        value::{const_values_equal, ConstPtr, StaticValue, Value},
    },
};

const MAX_CALL_DEPTH: usize = 64;

/// The verified output of one analysis run
#[derive(Debug)]
pub struct AnalyzedExecutable {
    pub exec: Executable,
    pub return_type: Type,
    /// Static result when the executable folded completely, `Runtime`
    /// otherwise
    pub value: Value,
}

/// Builds and analyzes an expression in one step. The main entry point for
/// callers that start from an AST.
pub fn analyze_expr(
    unit: &mut CompileUnit,
    root: &std::rc::Rc<crate::frontend::ast::Expr>,
    is_inline: bool,
    expected: Option<Type>,
) -> AnalyzedExecutable {
    let old = build::build_executable(unit, root, is_inline);
    analyze_executable(unit, old, expected)
}

pub fn analyze_executable(
    unit: &mut CompileUnit,
    old: Executable,
    expected: Option<Type>,
) -> AnalyzedExecutable {
    analyze_executable_at_depth(unit, old, expected, 0)
}

fn analyze_executable_at_depth(
    unit: &mut CompileUnit,
    old: Executable,
    expected: Option<Type>,
    call_depth: usize,
) -> AnalyzedExecutable {
    let mut new = Executable::new(old.is_inline);
    new.backward_branch_quota = old.backward_branch_quota;

    let old_inst_count = old.insts.len();
    let old_block_count = old.blocks.len();

    let mut analyzer = Analyzer {
        unit,
        old,
        new,
        old_to_new: IndexVec::repeat(None, old_inst_count),
        block_map: IndexVec::repeat(None, old_block_count),
        br_origin: HashMap::new(),
        block_queue: VecDeque::new(),
        current_old_block: BlockId::ENTRY,
        current_new_block: BlockId::ENTRY,
        inst_index: 0,
        const_predecessor: None,
        mem_slots: Vec::new(),
        demoted_vars: HashMap::new(),
        return_entries: Vec::new(),
        result_value: None,
        expected,
        call_depth,
    };

    analyzer.run();
    analyzer.finish()
}

enum Step {
    Continue,
    /// Inline jump: continue analysis at this old block without emitting a
    /// branch
    Jump(BlockId),
    /// The current old block is done
    EndBlock,
    /// Fatal: stop the whole analysis
    Halt,
}

struct Analyzer<'unit> {
    unit: &'unit mut CompileUnit,
    old: Executable,
    new: Executable,
    /// The bridge between the two executables. Re-executed inline blocks
    /// overwrite their entries; runtime blocks write each exactly once.
    old_to_new: IndexVec<InstId, Option<InstId>>,
    /// Old block → the verified block its runtime instructions land in
    block_map: IndexVec<BlockId, Option<BlockId>>,
    /// Old block → the verified block that held the cursor when the old
    /// block's terminator was analyzed. Phi incoming edges resolve here.
    br_origin: HashMap<BlockId, BlockId>,
    block_queue: VecDeque<BlockId>,
    current_old_block: BlockId,
    current_new_block: BlockId,
    inst_index: usize,
    /// Old block an inlined branch came from; consumed by phi collapse
    const_predecessor: Option<BlockId>,
    /// Compile-time storage cells, indexed by `Variable::mem_slot_index`
    mem_slots: Vec<Value>,
    /// Variables whose slot went static → runtime; value is the runtime
    /// variable pointer emitted at demotion time
    demoted_vars: HashMap<VarId, InstId>,
    /// One entry per analyzed return; the executable's return type is their
    /// peer resolution
    return_entries: Vec<PeerEntry>,
    result_value: Option<Value>,
    expected: Option<Type>,
    call_depth: usize,
}

impl<'unit> Analyzer<'unit> {
    /* Driver */

    fn run(&mut self) {
        let entry_new = self.new.create_block(self.old.blocks[BlockId::ENTRY].name_hint);
        self.block_map[BlockId::ENTRY] = Some(entry_new);
        self.current_new_block = entry_new;
        self.current_old_block = BlockId::ENTRY;
        self.inst_index = 0;

        loop {
            let block_len = self.old.blocks[self.current_old_block].instructions.len();

            if self.inst_index >= block_len {
                let Some(next) = self.block_queue.pop_front() else {
                    break;
                };
                self.current_old_block = next;
                self.current_new_block =
                    self.block_map[next].expect("queued blocks are always mapped");
                self.inst_index = 0;
                self.const_predecessor = None;
                continue;
            }

            let inst_id = self.old.blocks[self.current_old_block].instructions[self.inst_index];
            self.inst_index += 1;

            // dead-code pruning: unreferenced and side-effect free
            {
                let inst = &self.old.insts[inst_id];
                if inst.ref_count == 0 && !inst.kind.has_side_effects() {
                    continue;
                }
            }

            match self.analyze_inst(inst_id) {
                Step::Continue => {}
                Step::Jump(target) => {
                    if self.note_backward_branch(inst_id, target) {
                        self.new.invalid = true;
                        break;
                    }
                    // the inlined block's instructions keep flowing into the
                    // current verified block
                    self.const_predecessor = Some(self.current_old_block);
                    self.block_map[target] = Some(self.current_new_block);
                    self.current_old_block = target;
                    self.inst_index = 0;
                }
                Step::EndBlock => {
                    self.inst_index = usize::MAX;
                }
                Step::Halt => {
                    self.new.invalid = true;
                    break;
                }
            }
        }
    }

    /// Returns true when the quota is exhausted
    fn note_backward_branch(&mut self, branch: InstId, target: BlockId) -> bool {
        let back = self.old.blocks[target].debug_id
            <= self.old.blocks[self.current_old_block].debug_id;
        if !back {
            return false;
        }

        self.new.backward_branch_count += 1;
        if self.new.backward_branch_count > self.new.backward_branch_quota {
            let span = self.old.insts[branch].span;
            self.unit.sink.error(
                span,
                format!(
                    "evaluation exceeded {} backwards branches",
                    self.new.backward_branch_quota
                ),
            );
            return true;
        }
        false
    }

    fn finish(mut self) -> AnalyzedExecutable {
        let return_type = match &self.expected {
            Some(expected) => expected.clone(),
            None => match resolve_peer_types(&mut self.unit.types, &self.return_entries) {
                PeerResult::Ok(ty) => ty,
                PeerResult::Incompatible(_, _) => {
                    // conflicting returns; each was already well typed on
                    // its own, so report once at the executable level
                    self.unit
                        .sink
                        .error(Span::ZERO, "unable to infer expression type");
                    self.unit.types.invalid()
                }
            },
        };

        let value = match self.result_value {
            Some(value) if value.is_comptime() => value,
            _ => {
                if self.old.is_inline && !self.new.invalid {
                    self.unit
                        .sink
                        .error(Span::ZERO, "unable to evaluate constant expression");
                }
                Value::runtime()
            }
        };

        AnalyzedExecutable {
            exec: self.new,
            return_type,
            value,
        }
    }

    /* Emission plumbing */

    fn resolved(&self, old_operand: InstId) -> InstId {
        self.old_to_new[old_operand].expect("operand analyzed before its consumer")
    }

    fn ty_of(&self, new_id: InstId) -> Type {
        self.new.insts[new_id].ty.clone()
    }

    fn val_of(&self, new_id: InstId) -> Value {
        self.new.insts[new_id].value.clone()
    }

    fn emit_free_in(
        &mut self,
        block: BlockId,
        before_terminator: bool,
        span: Span,
        scope: ScopeId,
        kind: InstKind,
        ty: Type,
        value: Value,
    ) -> InstId {
        for operand in kind.operands() {
            self.new.ref_inst(operand);
        }
        for target in kind.branch_targets() {
            self.new.ref_block(target);
        }

        let debug_id = self.new.take_debug_id();
        let id = self.new.insts.push(Instruction {
            debug_id,
            span,
            scope,
            ty,
            value,
            ref_count: 0,
            return_knowledge: ReturnKnowledge::None,
            kind,
        });

        let instructions = &mut self.new.blocks[block].instructions;
        if before_terminator && !instructions.is_empty() {
            let at = instructions.len() - 1;
            instructions.insert(at, id);
        } else {
            instructions.push(id);
        }
        id
    }

    /// Emits the verified counterpart of `old_id` and records the mapping
    fn emit(&mut self, old_id: InstId, kind: InstKind, ty: Type, value: Value) -> InstId {
        let span = self.old.insts[old_id].span;
        let scope = self.old.insts[old_id].scope;
        let id = self.emit_free_in(self.current_new_block, false, span, scope, kind, ty, value);
        self.old_to_new[old_id] = Some(id);
        id
    }

    fn emit_const(&mut self, old_id: InstId, ty: Type, value: Value) -> InstId {
        self.emit(old_id, InstKind::Const, ty, value)
    }

    fn void_value(&self) -> Value {
        Value::new_static(StaticValue::Struct(Vec::new()))
    }

    fn emit_void(&mut self, old_id: InstId) -> InstId {
        let ty = self.unit.types.void();
        let value = self.void_value();
        self.emit_const(old_id, ty, value)
    }

    /// Error already reported upstream; poison this instruction quietly
    fn emit_invalid_silent(&mut self, old_id: InstId) -> InstId {
        let ty = self.unit.types.invalid();
        self.emit_const(old_id, ty, Value::undef())
    }

    /// Reports a diagnostic and poisons this instruction
    fn report(&mut self, old_id: InstId, message: impl Into<String>) -> InstId {
        let span = self.old.insts[old_id].span;
        self.unit.sink.error(span, message);
        self.emit_invalid_silent(old_id)
    }

    fn any_invalid(&self, ids: &[InstId]) -> bool {
        ids.iter().any(|id| self.ty_of(*id).is_invalid())
    }

    /* Coercion execution */

    /// Coerces a verified operand to `expected`, folding static values or
    /// emitting a runtime cast. Reports the type mismatch on failure.
    fn coerce(&mut self, span: Span, operand: InstId, expected: &Type) -> InstId {
        self.coerce_in(self.current_new_block, false, span, operand, expected)
    }

    fn coerce_in(
        &mut self,
        block: BlockId,
        before_terminator: bool,
        span: Span,
        operand: InstId,
        expected: &Type,
    ) -> InstId {
        let actual = self.ty_of(operand);
        let value = self.val_of(operand);

        if actual.is_invalid() || expected.is_invalid() {
            return operand;
        }
        if actual == *expected {
            return operand;
        }

        match implicit_cast_kind(&actual, expected, Some(&value)) {
            ImplicitCast::Yes(op) => {
                self.apply_cast_in(block, before_terminator, span, operand, op, expected)
            }
            ImplicitCast::ReportedError => operand,
            ImplicitCast::No => {
                let message = match (actual.kind(), expected.kind()) {
                    (TypeKind::LitInt, TypeKind::Int { .. }) => {
                        let num = value.as_num().map(|n| n.to_string()).unwrap_or_default();
                        format!(
                            "integer value {num} cannot be implicitly casted to type '{}'",
                            expected.name()
                        )
                    }
                    _ => format!(
                        "expected type '{}', found '{}'",
                        expected.name(),
                        actual.name()
                    ),
                };
                self.unit.sink.error(span, message);
                let scope = self.new.insts[operand].scope;
                let invalid = self.unit.types.invalid();
                self.emit_free_in(
                    block,
                    before_terminator,
                    span,
                    scope,
                    InstKind::Const,
                    invalid,
                    Value::undef(),
                )
            }
        }
    }

    fn apply_cast_in(
        &mut self,
        block: BlockId,
        before_terminator: bool,
        span: Span,
        operand: InstId,
        op: CastOp,
        dest: &Type,
    ) -> InstId {
        let value = self.val_of(operand);
        let scope = self.new.insts[operand].scope;

        if value.is_comptime() && cast_folds_statically(op) {
            let folded = fold_cast_value(op, &value, dest);
            return self.emit_free_in(
                block,
                before_terminator,
                span,
                scope,
                InstKind::Const,
                dest.clone(),
                folded,
            );
        }

        let id = self.emit_free_in(
            block,
            before_terminator,
            span,
            scope,
            InstKind::Cast {
                op,
                operand,
                dest_type: dest.clone(),
            },
            dest.clone(),
            Value::runtime(),
        );
        self.new.insts[id].return_knowledge = return_knowledge_for(op);
        id
    }

    /* Instruction dispatch */

    fn analyze_inst(&mut self, old_id: InstId) -> Step {
        // the kind is cloned piecemeal below; borrowing self.old across the
        // match arms would lock out emission
        match &self.old.insts[old_id].kind {
            InstKind::Const => {
                let ty = self.old.insts[old_id].ty.clone();
                let value = self.old.insts[old_id].value.clone();
                self.emit_const(old_id, ty, value);
                Step::Continue
            }

            InstKind::UnOp { op, operand } => {
                let (op, operand) = (*op, *operand);
                self.analyze_un_op(old_id, op, operand)
            }

            InstKind::BinOp { op, lhs, rhs } => {
                let (op, lhs, rhs) = (*op, *lhs, *rhs);
                self.analyze_bin_op(old_id, op, lhs, rhs)
            }

            InstKind::Ref { operand, is_const } => {
                let (operand, is_const) = (*operand, *is_const);
                self.analyze_ref(old_id, operand, is_const)
            }

            InstKind::LoadPtr { ptr } => {
                let ptr = *ptr;
                self.analyze_load_ptr(old_id, ptr)
            }

            InstKind::StorePtr { ptr, value } => {
                let (ptr, value) = (*ptr, *value);
                self.analyze_store_ptr(old_id, ptr, value)
            }

            InstKind::DeclVar {
                var,
                var_type,
                init,
            } => {
                let (var, var_type, init) = (*var, *var_type, *init);
                self.analyze_decl_var(old_id, var, var_type, init)
            }

            InstKind::VarPtr { var } => {
                let var = *var;
                self.analyze_var_ptr(old_id, var)
            }

            InstKind::FieldPtr {
                container_ptr,
                field_name,
            } => {
                let (container_ptr, field_name) = (*container_ptr, *field_name);
                self.analyze_field_ptr(old_id, container_ptr, field_name)
            }

            InstKind::ElemPtr {
                array_ptr,
                index,
                safety_check_on,
            } => {
                let (array_ptr, index, safety) = (*array_ptr, *index, *safety_check_on);
                self.analyze_elem_ptr(old_id, array_ptr, index, safety)
            }

            InstKind::Slice {
                array_ptr,
                start,
                end,
                is_const,
                safety_check_on,
            } => {
                let (array_ptr, start, end, is_const, safety) =
                    (*array_ptr, *start, *end, *is_const, *safety_check_on);
                self.analyze_slice(old_id, array_ptr, start, end, is_const, safety)
            }

            InstKind::Call { callee, args } => {
                let (callee, args) = (*callee, args.clone());
                self.analyze_call(old_id, callee, &args)
            }

            InstKind::Phi {
                incoming_blocks,
                incoming_values,
            } => {
                let (blocks, values) = (incoming_blocks.clone(), incoming_values.clone());
                self.analyze_phi(old_id, &blocks, &values)
            }

            InstKind::Br { dest, is_inline } => {
                let (dest, is_inline) = (*dest, *is_inline);
                if is_inline || self.old.is_inline {
                    return Step::Jump(dest);
                }
                let new_dest = self.runtime_block(dest);
                let ty = self.unit.types.unreachable();
                self.emit(
                    old_id,
                    InstKind::Br {
                        dest: new_dest,
                        is_inline: false,
                    },
                    ty,
                    Value::runtime(),
                );
                self.br_origin.insert(self.current_old_block, self.current_new_block);
                Step::EndBlock
            }

            InstKind::CondBr {
                condition,
                then_block,
                else_block,
                is_inline,
            } => {
                let (condition, then_block, else_block, is_inline) =
                    (*condition, *then_block, *else_block, *is_inline);
                self.analyze_cond_br(old_id, condition, then_block, else_block, is_inline)
            }

            InstKind::SwitchBr {
                target,
                cases,
                else_block,
                is_inline,
            } => {
                let (target, cases, else_block, is_inline) =
                    (*target, cases.clone(), *else_block, *is_inline);
                self.analyze_switch_br(old_id, target, &cases, else_block, is_inline)
            }

            InstKind::SwitchTarget { target_ptr } => {
                let target_ptr = *target_ptr;
                self.analyze_load_ptr(old_id, target_ptr)
            }

            InstKind::SwitchVar {
                target_ptr,
                prong_value,
            } => {
                let (target_ptr, prong_value) = (*target_ptr, *prong_value);
                let prong_new = self.resolved(prong_value);
                let ty = self.ty_of(prong_new);
                let value = self.val_of(prong_new);
                let target_new = self.resolved(target_ptr);
                self.emit(
                    old_id,
                    InstKind::SwitchVar {
                        target_ptr: target_new,
                        prong_value: prong_new,
                    },
                    ty,
                    value,
                );
                Step::Continue
            }

            InstKind::Return { operand } => {
                let operand = *operand;
                self.analyze_return(old_id, operand)
            }

            InstKind::Unreachable => {
                let ty = self.unit.types.unreachable();
                self.emit(old_id, InstKind::Unreachable, ty, Value::runtime());
                Step::EndBlock
            }

            InstKind::TypeOf { operand } => {
                let operand = *operand;
                let operand_new = self.resolved(operand);
                let ty = self.ty_of(operand_new);
                let metatype = self.unit.types.metatype();
                self.emit_const(old_id, metatype, Value::from_type(ty));
                Step::Continue
            }

            InstKind::ToPtrType { operand } => {
                let operand = *operand;
                self.analyze_to_ptr_type(old_id, operand)
            }

            InstKind::PtrTypeChild { operand } => {
                let operand = *operand;
                let operand_new = self.resolved(operand);
                match self.val_of(operand_new).as_type().map(|t| t.kind().clone()) {
                    Some(TypeKind::Pointer { child, .. }) => {
                        let metatype = self.unit.types.metatype();
                        self.emit_const(old_id, metatype, Value::from_type(child));
                        Step::Continue
                    }
                    Some(_) | None => {
                        let ty = self.ty_of(operand_new);
                        self.report(
                            old_id,
                            format!("expected pointer type, found '{}'", ty.name()),
                        );
                        Step::Continue
                    }
                }
            }

            InstKind::ArrayType { len, child } => {
                let (len, child) = (*len, *child);
                self.analyze_array_type(old_id, len, child)
            }

            InstKind::SliceType { child, is_const } => {
                let (child, is_const) = (*child, *is_const);
                let child_new = self.resolved(child);
                match self.val_of(child_new).as_type() {
                    Some(child_ty) => {
                        let slice = self.unit.types.slice_of(child_ty, is_const);
                        let metatype = self.unit.types.metatype();
                        self.emit_const(old_id, metatype, Value::from_type(slice));
                    }
                    None => {
                        self.report(old_id, "expected type expression");
                    }
                }
                Step::Continue
            }

            InstKind::MaybeType { child } => {
                let child = *child;
                let child_new = self.resolved(child);
                match self.val_of(child_new).as_type() {
                    Some(child_ty) => {
                        let maybe = self.unit.types.maybe_of(child_ty);
                        let metatype = self.unit.types.metatype();
                        self.emit_const(old_id, metatype, Value::from_type(maybe));
                    }
                    None => {
                        self.report(old_id, "expected type expression");
                    }
                }
                Step::Continue
            }

            InstKind::SizeOf { operand } => {
                let operand = *operand;
                let operand_new = self.resolved(operand);
                match self.val_of(operand_new).as_type() {
                    Some(ty) => match self.unit.types.size_of(&ty) {
                        Some(size) => {
                            let usize_ty = self.unit.types.usize_type();
                            self.emit_const(old_id, usize_ty, Value::from_usize(size));
                        }
                        None => {
                            self.report(
                                old_id,
                                format!("no size available for type '{}'", ty.name()),
                            );
                        }
                    },
                    None => {
                        self.report(old_id, "expected type expression");
                    }
                }
                Step::Continue
            }

            InstKind::TestNull { operand } => {
                let operand = *operand;
                self.analyze_test_null(old_id, operand)
            }

            InstKind::UnwrapMaybe {
                operand,
                safety_check_on,
            } => {
                let (operand, safety) = (*operand, *safety_check_on);
                self.analyze_unwrap_maybe(old_id, operand, safety)
            }

            InstKind::Clz { operand } | InstKind::Ctz { operand } => {
                let count_leading = matches!(self.old.insts[old_id].kind, InstKind::Clz { .. });
                let operand = *operand;
                self.analyze_bit_count(old_id, operand, count_leading)
            }

            InstKind::EnumTag { .. } => {
                // present in the instruction set, analysis not written yet
                self.report(old_id, "unimplemented: enum tag analysis");
                Step::Continue
            }

            InstKind::StaticEval { operand } => {
                let operand = *operand;
                let operand_new = self.resolved(operand);
                let value = self.val_of(operand_new);
                if value.is_comptime() {
                    let ty = self.ty_of(operand_new);
                    self.emit_const(old_id, ty, value);
                } else {
                    self.report(old_id, "unable to evaluate constant expression");
                }
                Step::Continue
            }

            InstKind::ArrayLen { array } => {
                let array = *array;
                self.analyze_array_len(old_id, array)
            }

            InstKind::Import { name } => {
                let name = *name;
                self.analyze_import(old_id, name)
            }

            InstKind::CompileVar { name } => {
                let name = *name;
                self.analyze_compile_var(old_id, name)
            }

            InstKind::ContainerInitList {
                container_type,
                items,
            } => {
                let (container_type, items) = (*container_type, items.clone());
                self.analyze_container_init_list(old_id, container_type, &items)
            }

            InstKind::ContainerInitFields {
                container_type,
                fields,
            } => {
                let (container_type, fields) = (*container_type, fields.clone());
                self.analyze_container_init_fields(old_id, container_type, &fields)
            }

            InstKind::Asm { node, outputs, inputs } => {
                let (node, outputs, inputs) = (node.clone(), outputs.clone(), inputs.clone());
                let inputs = inputs
                    .iter()
                    .map(|input| crate::middle::ir::AsmInputEntry {
                        constraint: input.constraint,
                        value: self.resolved(input.value),
                    })
                    .collect();
                let ty = self.unit.types.void();
                self.emit(
                    old_id,
                    InstKind::Asm {
                        node,
                        outputs,
                        inputs,
                    },
                    ty,
                    Value::runtime(),
                );
                Step::Continue
            }

            InstKind::SetFnTest { fn_value, enabled } => {
                let (fn_value, enabled) = (*fn_value, *enabled);
                self.analyze_fn_attr(old_id, fn_value, enabled, |decl, on| decl.is_test = on)
            }

            InstKind::SetFnVisible { fn_value, visible } => {
                let (fn_value, visible) = (*fn_value, *visible);
                self.analyze_fn_attr(old_id, fn_value, visible, |decl, on| decl.is_visible = on)
            }

            InstKind::SetDebugSafety {
                scope_value,
                enabled,
            } => {
                let (scope_value, enabled) = (*scope_value, *enabled);
                self.analyze_set_debug_safety(old_id, scope_value, enabled)
            }

            // verified-only forms; the builder never produces them
            InstKind::Cast { .. }
            | InstKind::StructFieldPtr { .. }
            | InstKind::EnumFieldPtr { .. }
            | InstKind::StructInit { .. } => {
                self.emit_invalid_silent(old_id);
                Step::Continue
            }
        }
    }

    /* Operators */

    fn analyze_un_op(&mut self, old_id: InstId, op: UnOpKind, operand: InstId) -> Step {
        let operand_new = self.resolved(operand);
        if self.any_invalid(&[operand_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let operand_ty = self.ty_of(operand_new);
        let span = self.old.insts[old_id].span;

        let (operand_new, result_ty) = match op {
            UnOpKind::BoolNot => {
                let bool_ty = self.unit.types.bool();
                let coerced = self.coerce(span, operand_new, &bool_ty);
                (coerced, bool_ty)
            }
            UnOpKind::Negate | UnOpKind::NegateWrap => {
                if !operand_ty.is_numeric() {
                    self.report(
                        old_id,
                        format!("invalid operand to negation: '{}'", operand_ty.name()),
                    );
                    return Step::Continue;
                }
                (operand_new, operand_ty)
            }
            UnOpKind::BitNot => {
                if !operand_ty.is_int() {
                    self.report(
                        old_id,
                        format!("invalid operand to binary not: '{}'", operand_ty.name()),
                    );
                    return Step::Continue;
                }
                (operand_new, operand_ty)
            }
        };

        let value = self.val_of(operand_new);
        if value.is_undef() {
            self.emit_const(old_id, result_ty, Value::undef());
            return Step::Continue;
        }
        if value.is_static() {
            match fold_un_op(op, &value, &result_ty) {
                Ok(folded) => {
                    self.emit_const(old_id, result_ty, folded);
                }
                Err(err) => {
                    self.report_fold_error(old_id, err);
                }
            }
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::UnOp {
                op,
                operand: operand_new,
            },
            result_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_bin_op(&mut self, old_id: InstId, op: BinOpKind, lhs: InstId, rhs: InstId) -> Step {
        use crate::frontend::ast::BinOpClass;

        let lhs_new = self.resolved(lhs);
        let rhs_new = self.resolved(rhs);
        if self.any_invalid(&[lhs_new, rhs_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;

        match op.class() {
            BinOpClass::Array | BinOpClass::Unwrap => {
                let what = match op {
                    BinOpKind::ArrayCat => "unimplemented: compile-time array concatenation",
                    BinOpKind::ArrayMult => "unimplemented: compile-time array multiplication",
                    _ => "unimplemented: operator",
                };
                self.report(old_id, what);
                return Step::Continue;
            }
            BinOpClass::Bool => {
                let bool_ty = self.unit.types.bool();
                let lhs_c = self.coerce(span, lhs_new, &bool_ty);
                let rhs_c = self.coerce(span, rhs_new, &bool_ty);
                return self.finish_bin_op(old_id, op, lhs_c, rhs_c, bool_ty.clone(), bool_ty);
            }
            BinOpClass::Comparison | BinOpClass::Arithmetic => {}
        }

        let entries = [
            self.peer_entry(lhs_new),
            self.peer_entry(rhs_new),
        ];
        let operand_ty = match resolve_peer_types(&mut self.unit.types, &entries) {
            PeerResult::Ok(ty) => ty,
            PeerResult::Incompatible(_, _) => {
                let a = self.ty_of(lhs_new);
                let b = self.ty_of(rhs_new);
                self.report(
                    old_id,
                    format!(
                        "invalid operands to binary expression: '{}' and '{}'",
                        a.name(),
                        b.name()
                    ),
                );
                return Step::Continue;
            }
        };

        if op.class() == BinOpClass::Arithmetic && !operand_ty.is_numeric() {
            self.report(
                old_id,
                format!(
                    "invalid operands to binary expression: '{}' and '{}'",
                    self.ty_of(lhs_new).name(),
                    self.ty_of(rhs_new).name()
                ),
            );
            return Step::Continue;
        }

        let lhs_c = self.coerce(span, lhs_new, &operand_ty);
        let rhs_c = self.coerce(span, rhs_new, &operand_ty);

        let result_ty = if op.class() == BinOpClass::Comparison {
            self.unit.types.bool()
        } else {
            operand_ty.clone()
        };

        self.finish_bin_op(old_id, op, lhs_c, rhs_c, operand_ty, result_ty)
    }

    fn finish_bin_op(
        &mut self,
        old_id: InstId,
        op: BinOpKind,
        lhs: InstId,
        rhs: InstId,
        operand_ty: Type,
        result_ty: Type,
    ) -> Step {
        if self.any_invalid(&[lhs, rhs]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let lhs_val = self.val_of(lhs);
        let rhs_val = self.val_of(rhs);

        if lhs_val.is_undef() || rhs_val.is_undef() {
            self.emit_const(old_id, result_ty, Value::undef());
            return Step::Continue;
        }

        if lhs_val.is_static() && rhs_val.is_static() {
            match fold_bin_op(op, &lhs_val, &rhs_val, &operand_ty) {
                Ok(folded) => {
                    self.emit_const(old_id, result_ty, folded);
                }
                Err(err) => {
                    self.report_fold_error(old_id, err);
                }
            }
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::BinOp { op, lhs, rhs },
            result_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn report_fold_error(&mut self, old_id: InstId, err: FoldError) {
        let message = match err {
            FoldError::DivisionByZero => "division by zero".to_string(),
            FoldError::Overflow => "operation caused overflow".to_string(),
            FoldError::ShiftOutOfRange => "shift amount is out of range".to_string(),
            FoldError::Incompatible => "invalid operands to expression".to_string(),
        };
        self.report(old_id, message);
    }

    fn peer_entry(&self, new_id: InstId) -> PeerEntry {
        let ty = self.ty_of(new_id);
        let num = if ty.is_numeric_literal() {
            self.val_of(new_id).as_num().cloned()
        } else {
            None
        };
        PeerEntry { ty, num }
    }

    /* Pointers and memory */

    fn analyze_ref(&mut self, old_id: InstId, operand: InstId, is_const: bool) -> Step {
        let operand_new = self.resolved(operand);
        if self.any_invalid(&[operand_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let value = self.val_of(operand_new);

        // a ref of a type value is pointer-type construction
        if let Some(child) = value.as_type() {
            let ptr_ty = self.unit.types.pointer_to(child, is_const);
            let metatype = self.unit.types.metatype();
            self.emit_const(old_id, metatype, Value::from_type(ptr_ty));
            return Step::Continue;
        }

        let operand_ty = self.ty_of(operand_new);
        let ptr_ty = self.unit.types.pointer_to(operand_ty, is_const);

        if value.is_comptime() {
            let ptr = ConstPtr::to_base(value, false);
            self.emit_const(old_id, ptr_ty, Value::new_static(StaticValue::Ptr(ptr)));
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::Ref {
                operand: operand_new,
                is_const,
            },
            ptr_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn slot_of(&self, var: VarId) -> Option<usize> {
        self.unit.variables[var]
            .mem_slot_index
            .filter(|slot| *slot < self.mem_slots.len())
    }

    fn analyze_load_ptr(&mut self, old_id: InstId, ptr: InstId) -> Step {
        let ptr_new = self.resolved(ptr);
        if self.any_invalid(&[ptr_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        // loads from a slot-backed variable read the slot directly
        if let InstKind::VarPtr { var } = &self.new.insts[ptr_new].kind {
            let var = *var;
            if let Some(slot) = self.slot_of(var) {
                let slot_value = self.mem_slots[slot].clone();
                if slot_value.is_comptime() {
                    let ty = self.unit.variables[var].ty.clone();
                    self.emit_const(old_id, ty, slot_value);
                    return Step::Continue;
                }
            }
        }

        let ptr_ty = self.ty_of(ptr_new);
        let child = match ptr_ty.kind() {
            TypeKind::Pointer { child, .. } => child.clone(),
            _ => {
                self.report(
                    old_id,
                    format!("attempt to dereference non-pointer type '{}'", ptr_ty.name()),
                );
                return Step::Continue;
            }
        };

        let ptr_value = self.val_of(ptr_new);
        if let Some(StaticValue::Ptr(const_ptr)) = ptr_value.as_static() {
            if let Some(pointee) = const_ptr.pointee() {
                let pointee = pointee.clone();
                self.emit_const(old_id, child, pointee);
                return Step::Continue;
            }
        }

        self.emit(
            old_id,
            InstKind::LoadPtr { ptr: ptr_new },
            child,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_store_ptr(&mut self, old_id: InstId, ptr: InstId, value: InstId) -> Step {
        let ptr_new = self.resolved(ptr);
        let value_new = self.resolved(value);
        if self.any_invalid(&[ptr_new, value_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;

        if let InstKind::VarPtr { var } = &self.new.insts[ptr_new].kind {
            let var = *var;
            let var_ty = self.unit.variables[var].ty.clone();
            let coerced = self.coerce(span, value_new, &var_ty);
            let new_value = self.val_of(coerced);

            if let Some(slot) = self.slot_of(var) {
                if self.mem_slots[slot].is_comptime() {
                    if new_value.is_comptime() {
                        self.mem_slots[slot] = new_value;
                        self.emit_void(old_id);
                        return Step::Continue;
                    }

                    // known → runtime transition: materialize the variable
                    // once, then store like any other runtime write
                    self.demote_var(old_id, var, slot);
                }
            }

            let runtime_ptr = match self.demoted_vars.get(&var) {
                Some(ptr) => *ptr,
                None => ptr_new,
            };
            let void_ty = self.unit.types.void();
            self.emit(
                old_id,
                InstKind::StorePtr {
                    ptr: runtime_ptr,
                    value: coerced,
                },
                void_ty,
                Value::runtime(),
            );
            return Step::Continue;
        }

        let ptr_ty = self.ty_of(ptr_new);
        let child = match ptr_ty.kind() {
            TypeKind::Pointer { child, is_const } => {
                if *is_const {
                    self.report(old_id, "cannot assign to constant");
                    return Step::Continue;
                }
                child.clone()
            }
            _ => {
                self.report(
                    old_id,
                    format!("attempt to dereference non-pointer type '{}'", ptr_ty.name()),
                );
                return Step::Continue;
            }
        };

        let coerced = self.coerce(span, value_new, &child);
        let void_ty = self.unit.types.void();
        self.emit(
            old_id,
            InstKind::StorePtr {
                ptr: ptr_new,
                value: coerced,
            },
            void_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    /// Emits the deferred runtime declaration for a variable whose slot just
    /// went runtime. A slot never becomes static again afterwards.
    fn demote_var(&mut self, old_id: InstId, var: VarId, slot: usize) {
        let span = self.old.insts[old_id].span;
        let scope = self.old.insts[old_id].scope;
        let last_known = self.mem_slots[slot].clone();
        self.mem_slots[slot] = Value::runtime();

        let var_ty = self.unit.variables[var].ty.clone();
        let init = self.emit_free_in(
            self.current_new_block,
            false,
            span,
            scope,
            InstKind::Const,
            var_ty.clone(),
            last_known,
        );
        let void_ty = self.unit.types.void();
        self.emit_free_in(
            self.current_new_block,
            false,
            span,
            scope,
            InstKind::DeclVar {
                var,
                var_type: None,
                init,
            },
            void_ty,
            Value::runtime(),
        );
        let ptr_ty = self.unit.types.pointer_to(var_ty, false);
        let var_ptr = self.emit_free_in(
            self.current_new_block,
            false,
            span,
            scope,
            InstKind::VarPtr { var },
            ptr_ty,
            Value::runtime(),
        );
        self.demoted_vars.insert(var, var_ptr);
    }

    fn analyze_decl_var(
        &mut self,
        old_id: InstId,
        var: VarId,
        var_type: Option<InstId>,
        init: InstId,
    ) -> Step {
        let init_new = self.resolved(init);
        let span = self.old.insts[old_id].span;

        let explicit_ty = match var_type {
            None => None,
            Some(type_inst) => {
                let type_new = self.resolved(type_inst);
                if self.ty_of(type_new).is_invalid() {
                    self.unit.variables[var].ty = self.unit.types.invalid();
                    self.emit_invalid_silent(old_id);
                    return Step::Continue;
                }
                match self.val_of(type_new).as_type() {
                    Some(ty) => Some(ty),
                    None => {
                        self.unit.variables[var].ty = self.unit.types.invalid();
                        self.report(old_id, "expected type expression");
                        return Step::Continue;
                    }
                }
            }
        };

        let init_coerced = match &explicit_ty {
            Some(expected) => self.coerce(span, init_new, expected),
            None => init_new,
        };

        let var_ty = match explicit_ty {
            Some(ty) => ty,
            None => self.ty_of(init_coerced),
        };

        if var_ty.is_invalid() {
            self.unit.variables[var].ty = var_ty;
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let src_is_const = self.unit.variables[var].src_is_const;
        let is_inline = self.unit.variables[var].is_inline;

        // bindings of compile-time-only types never reach runtime; they
        // must be const so the slot carries them
        if var_ty.is_compile_time_only() && !src_is_const && !is_inline {
            self.unit.variables[var].ty = self.unit.types.invalid();
            self.report(
                old_id,
                format!("variable of type '{}' must be const", var_ty.name()),
            );
            return Step::Continue;
        }

        self.unit.variables[var].ty = var_ty.clone();

        let init_value = self.val_of(init_coerced);
        let wants_slot =
            is_inline || self.unit.variables[var].gen_is_const || self.old.is_inline;

        if is_inline && !init_value.is_comptime() {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        }

        if wants_slot {
            let slot = match self.unit.variables[var].mem_slot_index {
                Some(slot) if slot < self.mem_slots.len() => slot,
                _ => {
                    let slot = self.new.alloc_mem_slot();
                    self.mem_slots.push(Value::runtime());
                    self.unit.variables[var].mem_slot_index = Some(slot);
                    slot
                }
            };
            self.mem_slots[slot] = init_value.clone();

            if init_value.is_comptime() {
                // fully compile-time binding; no runtime declaration
                self.emit_void(old_id);
                return Step::Continue;
            }
        }

        let void_ty = self.unit.types.void();
        self.emit(
            old_id,
            InstKind::DeclVar {
                var,
                var_type: None,
                init: init_coerced,
            },
            void_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_var_ptr(&mut self, old_id: InstId, var: VarId) -> Step {
        let var_ty = self.unit.variables[var].ty.clone();
        if var_ty.is_invalid() {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        // a binding the generator proved never mutates hands out const
        // pointers, which keeps its element reads foldable
        let variable = &self.unit.variables[var];
        let is_const = variable.src_is_const || variable.gen_is_const;
        let ptr_ty = self.unit.types.pointer_to(var_ty, is_const);
        self.emit(old_id, InstKind::VarPtr { var }, ptr_ty, Value::runtime());
        Step::Continue
    }

    /* Aggregates */

    fn analyze_field_ptr(
        &mut self,
        old_id: InstId,
        container_ptr: InstId,
        field_name: InternedSymbol,
    ) -> Step {
        let ptr_new = self.resolved(container_ptr);
        if self.any_invalid(&[ptr_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let ptr_ty = self.ty_of(ptr_new);

        // type and namespace values reach here directly, not through a
        // pointer; members resolve against the value itself
        match ptr_ty.kind() {
            TypeKind::Metatype => {
                let Some(ty) = self.static_value_behind(ptr_new).and_then(|v| v.as_type())
                else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                return self.metatype_member(old_id, &ty, field_name);
            }
            TypeKind::Namespace => {
                let import = self.static_value_behind(ptr_new).and_then(|v| {
                    match v.as_static() {
                        Some(StaticValue::Namespace(import)) => Some(*import),
                        _ => None,
                    }
                });
                let Some(import) = import else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                return self.namespace_member(old_id, import, field_name);
            }
            _ => {}
        }

        let (container_ty, ptr_is_const) = match ptr_ty.kind() {
            TypeKind::Pointer { child, is_const } => (child.clone(), *is_const),
            _ => {
                self.report(
                    old_id,
                    format!("type '{}' does not support field access", ptr_ty.name()),
                );
                return Step::Continue;
            }
        };

        match container_ty.kind().clone() {
            TypeKind::Array { len, .. } => {
                if field_name.value() == "len" {
                    // array.len folds to a constant pointer at a constant
                    let usize_ty = self.unit.types.usize_type();
                    let ptr = ConstPtr::to_base(Value::from_usize(len), false);
                    let ptr_ty = self.unit.types.pointer_to(usize_ty, true);
                    self.emit_const(old_id, ptr_ty, Value::new_static(StaticValue::Ptr(ptr)));
                    return Step::Continue;
                }
                self.report(
                    old_id,
                    format!(
                        "no member named '{field_name}' in '{}'",
                        container_ty.name()
                    ),
                );
                Step::Continue
            }

            TypeKind::Slice { child, is_const } => {
                let (index, field_ty) = match field_name.value() {
                    "ptr" => (0usize, self.unit.types.pointer_to(child, is_const)),
                    "len" => (1usize, self.unit.types.usize_type()),
                    _ => {
                        self.report(
                            old_id,
                            format!(
                                "no member named '{field_name}' in '{}'",
                                container_ty.name()
                            ),
                        );
                        return Step::Continue;
                    }
                };
                self.struct_field_ptr(old_id, ptr_new, index, field_ty, ptr_is_const)
            }

            TypeKind::Struct(id) => {
                let field = self.unit.types.structs[id]
                    .fields
                    .iter()
                    .enumerate()
                    .find(|(_, f)| f.name == field_name)
                    .map(|(i, f)| (i, f.ty.clone()));
                match field {
                    Some((index, field_ty)) => {
                        self.struct_field_ptr(old_id, ptr_new, index, field_ty, ptr_is_const)
                    }
                    None => {
                        self.report(
                            old_id,
                            format!(
                                "no member named '{field_name}' in '{}'",
                                container_ty.name()
                            ),
                        );
                        Step::Continue
                    }
                }
            }

            // a pointer to a type value resolves members of the named type
            TypeKind::Metatype => {
                let Some(ty) = self.static_value_behind(ptr_new).and_then(|v| v.as_type())
                else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                self.metatype_member(old_id, &ty, field_name)
            }

            TypeKind::Namespace => {
                let import = self
                    .static_value_behind(ptr_new)
                    .and_then(|v| match v.as_static() {
                        Some(StaticValue::Namespace(import)) => Some(*import),
                        _ => None,
                    });
                let Some(import) = import else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                self.namespace_member(old_id, import, field_name)
            }

            _ => {
                self.report(
                    old_id,
                    format!(
                        "type '{}' does not support field access",
                        container_ty.name()
                    ),
                );
                Step::Continue
            }
        }
    }

    fn struct_field_ptr(
        &mut self,
        old_id: InstId,
        ptr_new: InstId,
        index: usize,
        field_ty: Type,
        ptr_is_const: bool,
    ) -> Step {
        // fold when the whole aggregate is known and stays immutable
        let ptr_value = self.val_of(ptr_new);
        if let (true, Some(StaticValue::Ptr(const_ptr))) = (ptr_is_const, ptr_value.as_static()) {
            if let Some(pointee) = const_ptr.pointee() {
                if let Some(StaticValue::Struct(fields)) = pointee.as_static() {
                    if let Some(field_value) = fields.get(index) {
                        let field_value = field_value.clone();
                        let ptr = ConstPtr::to_base(field_value, false);
                        let result_ty = self.unit.types.pointer_to(field_ty, true);
                        self.emit_const(
                            old_id,
                            result_ty,
                            Value::new_static(StaticValue::Ptr(ptr)),
                        );
                        return Step::Continue;
                    }
                }
            }
        }

        let result_ty = self.unit.types.pointer_to(field_ty, ptr_is_const);
        self.emit(
            old_id,
            InstKind::StructFieldPtr {
                struct_ptr: ptr_new,
                field_index: index,
            },
            result_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn metatype_member(
        &mut self,
        old_id: InstId,
        ty: &Type,
        field_name: InternedSymbol,
    ) -> Step {
        match ty.kind() {
            TypeKind::Enum(id) => {
                let field = self.unit.types.enums[*id]
                    .fields
                    .iter()
                    .enumerate()
                    .find(|(_, f)| f.name == field_name)
                    .map(|(i, f)| (i, f.payload.clone()));
                match field {
                    Some((tag, None)) => {
                        let value = Value::new_static(StaticValue::Enum { tag, payload: None });
                        let ptr = ConstPtr::to_base(value, false);
                        let ptr_ty = self.unit.types.pointer_to(ty.clone(), true);
                        self.emit_const(old_id, ptr_ty, Value::new_static(StaticValue::Ptr(ptr)));
                        Step::Continue
                    }
                    Some((_, Some(_))) => {
                        self.report(
                            old_id,
                            format!("enum field '{field_name}' requires a payload value"),
                        );
                        Step::Continue
                    }
                    None => {
                        self.report(
                            old_id,
                            format!("no member named '{field_name}' in '{}'", ty.name()),
                        );
                        Step::Continue
                    }
                }
            }
            _ => {
                self.report(
                    old_id,
                    format!("no member named '{field_name}' in '{}'", ty.name()),
                );
                Step::Continue
            }
        }
    }

    fn namespace_member(
        &mut self,
        old_id: InstId,
        import: crate::middle::scope::ImportId,
        field_name: InternedSymbol,
    ) -> Step {
        match self.unit.resolve_in_import(import, field_name, true) {
            ImportLookup::Found(decl) => {
                let (ty, value) = match decl.kind {
                    DeclKind::Fn(fn_id) => (
                        self.unit.fns[fn_id].ty.clone(),
                        Value::new_static(StaticValue::Fn(fn_id)),
                    ),
                    DeclKind::Type(ty) => (self.unit.types.metatype(), Value::from_type(ty)),
                    DeclKind::Const(value) => {
                        let ty = self.type_of_const_value(&value);
                        (ty, value)
                    }
                };
                let ptr = ConstPtr::to_base(value, false);
                let ptr_ty = self.unit.types.pointer_to(ty, true);
                self.emit_const(old_id, ptr_ty, Value::new_static(StaticValue::Ptr(ptr)));
                Step::Continue
            }
            ImportLookup::Private(_) => {
                self.report(old_id, format!("'{field_name}' is private"));
                Step::Continue
            }
            ImportLookup::NotFound => {
                self.report(old_id, format!("no member named '{field_name}'"));
                Step::Continue
            }
        }
    }

    fn type_of_const_value(&mut self, value: &Value) -> Type {
        match value.as_static() {
            Some(StaticValue::Num(num)) if num.is_float() => self.unit.types.lit_float(),
            Some(StaticValue::Num(_)) => self.unit.types.lit_int(),
            Some(StaticValue::Bool(_)) => self.unit.types.bool(),
            Some(StaticValue::Type(_)) => self.unit.types.metatype(),
            _ => self.unit.types.invalid(),
        }
    }

    fn analyze_elem_ptr(
        &mut self,
        old_id: InstId,
        array_ptr: InstId,
        index: InstId,
        safety_check_on: bool,
    ) -> Step {
        let ptr_new = self.resolved(array_ptr);
        let index_new = self.resolved(index);
        if self.any_invalid(&[ptr_new, index_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;
        let usize_ty = self.unit.types.usize_type();
        let index_c = self.coerce(span, index_new, &usize_ty);
        let index_value = self.val_of(index_c).as_usize();

        let ptr_ty = self.ty_of(ptr_new);
        let TypeKind::Pointer { child: container, is_const } = ptr_ty.kind().clone() else {
            self.report(
                old_id,
                format!("array access of non-array type '{}'", ptr_ty.name()),
            );
            return Step::Continue;
        };

        match container.kind().clone() {
            TypeKind::Array { child: elem, len } => {
                if let Some(i) = index_value {
                    if i >= len {
                        self.report(old_id, format!("index {i} outside array of size {len}"));
                        return Step::Continue;
                    }

                    // compose constant pointers: known base, known offset.
                    // Only through const pointers; a writable element must
                    // stay addressable at runtime.
                    if is_const {
                        if let Some(base) = self.static_array_behind(ptr_new) {
                            let elem_ptr = ConstPtr::to_element(base, i);
                            let result_ty = self.unit.types.pointer_to(elem, true);
                            self.emit_const(
                                old_id,
                                result_ty,
                                Value::new_static(StaticValue::Ptr(elem_ptr)),
                            );
                            return Step::Continue;
                        }
                    }
                }

                let result_ty = self.unit.types.pointer_to(elem, is_const);
                self.emit(
                    old_id,
                    InstKind::ElemPtr {
                        array_ptr: ptr_new,
                        index: index_c,
                        safety_check_on,
                    },
                    result_ty,
                    Value::runtime(),
                );
                Step::Continue
            }

            TypeKind::Slice { child: elem, is_const: slice_const } => {
                // compile-time slices carry their length in field 1
                if let (Some(i), Some(slice_value)) =
                    (index_value, self.static_aggregate_behind(ptr_new))
                {
                    if let Some(StaticValue::Struct(fields)) = slice_value.as_static() {
                        if let Some(len) = fields.get(1).and_then(Value::as_usize) {
                            if i >= len {
                                self.report(
                                    old_id,
                                    format!("index {i} outside array of size {len}"),
                                );
                                return Step::Continue;
                            }
                            if let Some(StaticValue::Ptr(base_ptr)) =
                                fields.first().and_then(Value::as_static)
                            {
                                let offset = base_ptr.index.unwrap_or(0);
                                if let Some(size) = base_ptr.base_len() {
                                    if offset + i >= size {
                                        self.report(
                                            old_id,
                                            format!(
                                                "index {} outside array of size {size}",
                                                offset + i
                                            ),
                                        );
                                        return Step::Continue;
                                    }
                                }
                                let composed =
                                    ConstPtr::to_element((*base_ptr.base).clone(), offset + i);
                                let result_ty = self.unit.types.pointer_to(elem, true);
                                self.emit_const(
                                    old_id,
                                    result_ty,
                                    Value::new_static(StaticValue::Ptr(composed)),
                                );
                                return Step::Continue;
                            }
                        }
                    }
                }

                let result_ty = self.unit.types.pointer_to(elem, slice_const);
                self.emit(
                    old_id,
                    InstKind::ElemPtr {
                        array_ptr: ptr_new,
                        index: index_c,
                        safety_check_on,
                    },
                    result_ty,
                    Value::runtime(),
                );
                Step::Continue
            }

            _ => {
                self.report(
                    old_id,
                    format!("array access of non-array type '{}'", container.name()),
                );
                Step::Continue
            }
        }
    }

    /// The static array value a pointer instruction addresses: either a
    /// slot-backed variable or a constant pointer value.
    fn static_array_behind(&self, ptr_new: InstId) -> Option<Value> {
        self.static_aggregate_behind(ptr_new)
            .filter(|v| matches!(v.as_static(), Some(StaticValue::Array(_))))
    }

    fn static_aggregate_behind(&self, ptr_new: InstId) -> Option<Value> {
        if let InstKind::VarPtr { var } = &self.new.insts[ptr_new].kind {
            let slot = self.slot_of(*var)?;
            let value = self.mem_slots[slot].clone();
            return value.is_comptime().then_some(value);
        }

        if let Some(StaticValue::Ptr(const_ptr)) = self.val_of(ptr_new).as_static() {
            return const_ptr.pointee().cloned();
        }

        None
    }

    /// The static value an operand denotes, whether it arrived as the value
    /// itself, as a constant pointer to it, or behind a slot-backed
    /// variable pointer.
    fn static_value_behind(&self, new_id: InstId) -> Option<Value> {
        let value = self.val_of(new_id);
        match value.as_static() {
            Some(StaticValue::Ptr(const_ptr)) => const_ptr.pointee().cloned(),
            Some(_) => Some(value),
            None => self.static_aggregate_behind(new_id),
        }
    }

    fn analyze_slice(
        &mut self,
        old_id: InstId,
        array_ptr: InstId,
        start: InstId,
        end: Option<InstId>,
        is_const: bool,
        safety_check_on: bool,
    ) -> Step {
        let ptr_new = self.resolved(array_ptr);
        let start_new = self.resolved(start);
        let end_new = end.map(|e| self.resolved(e));

        let mut all = vec![ptr_new, start_new];
        all.extend(end_new);
        if self.any_invalid(&all) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;
        let usize_ty = self.unit.types.usize_type();
        let start_c = self.coerce(span, start_new, &usize_ty);
        let end_c = end_new.map(|e| self.coerce(span, e, &usize_ty));

        let ptr_ty = self.ty_of(ptr_new);
        let TypeKind::Pointer { child: container, .. } = ptr_ty.kind().clone() else {
            self.report(
                old_id,
                format!("slice of non-array type '{}'", ptr_ty.name()),
            );
            return Step::Continue;
        };

        let elem = match container.kind().clone() {
            TypeKind::Array { child, .. } => child,
            TypeKind::Slice { child, .. } => child,
            _ => {
                self.report(
                    old_id,
                    format!("slice of non-array type '{}'", container.name()),
                );
                return Step::Continue;
            }
        };

        let result_ty = self.unit.types.slice_of(elem, is_const);

        // fold when the base and both bounds are known
        let start_val = self.val_of(start_c).as_usize();
        let end_val = match end_c {
            Some(e) => self.val_of(e).as_usize(),
            None => self
                .static_array_behind(ptr_new)
                .and_then(|v| match v.as_static() {
                    Some(StaticValue::Array(items)) => Some(items.len()),
                    _ => None,
                }),
        };

        if let (Some(start_i), Some(end_i), Some(base)) =
            (start_val, end_val, self.static_array_behind(ptr_new))
        {
            let len = match base.as_static() {
                Some(StaticValue::Array(items)) => items.len(),
                _ => 0,
            };
            if start_i > end_i || end_i > len {
                self.report(old_id, "slice out of bounds");
                return Step::Continue;
            }

            let ptr_field = Value::new_static(StaticValue::Ptr(ConstPtr::to_element(
                base, start_i,
            )));
            let len_field = Value::from_usize(end_i - start_i);
            let slice_value = Value::new_static(StaticValue::Struct(vec![ptr_field, len_field]));
            self.emit_const(old_id, result_ty, slice_value);
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::Slice {
                array_ptr: ptr_new,
                start: start_c,
                end: end_c,
                is_const,
                safety_check_on,
            },
            result_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    /* Maybe handling */

    fn analyze_test_null(&mut self, old_id: InstId, operand: InstId) -> Step {
        let operand_new = self.resolved(operand);
        if self.any_invalid(&[operand_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let operand_ty = self.ty_of(operand_new);
        let bool_ty = self.unit.types.bool();

        match operand_ty.kind() {
            TypeKind::NullLit => {
                self.emit_const(old_id, bool_ty, Value::from_bool(true));
                Step::Continue
            }
            TypeKind::Maybe(_) => {
                let value = self.val_of(operand_new);
                if let Some(StaticValue::Maybe(inner)) = value.as_static() {
                    let is_null = inner.is_none();
                    self.emit_const(old_id, bool_ty, Value::from_bool(is_null));
                    return Step::Continue;
                }
                self.emit(
                    old_id,
                    InstKind::TestNull {
                        operand: operand_new,
                    },
                    bool_ty,
                    Value::runtime(),
                );
                Step::Continue
            }
            _ => {
                self.report(
                    old_id,
                    format!("expected maybe type, found '{}'", operand_ty.name()),
                );
                Step::Continue
            }
        }
    }

    fn analyze_unwrap_maybe(
        &mut self,
        old_id: InstId,
        operand: InstId,
        safety_check_on: bool,
    ) -> Step {
        let operand_new = self.resolved(operand);
        if self.any_invalid(&[operand_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let operand_ty = self.ty_of(operand_new);
        let TypeKind::Maybe(child) = operand_ty.kind().clone() else {
            self.report(
                old_id,
                format!("expected maybe type, found '{}'", operand_ty.name()),
            );
            return Step::Continue;
        };

        let value = self.val_of(operand_new);
        if let Some(StaticValue::Maybe(inner)) = value.as_static() {
            match inner {
                Some(inner_value) => {
                    let inner_value = (**inner_value).clone();
                    self.emit_const(old_id, child, inner_value);
                }
                None => {
                    self.report(old_id, "unable to unwrap null");
                }
            }
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::UnwrapMaybe {
                operand: operand_new,
                safety_check_on,
            },
            child,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_bit_count(&mut self, old_id: InstId, operand: InstId, leading: bool) -> Step {
        let operand_new = self.resolved(operand);
        if self.any_invalid(&[operand_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let operand_ty = self.ty_of(operand_new);
        let TypeKind::Int { bits, .. } = operand_ty.kind() else {
            self.report(
                old_id,
                format!("expected integer type, found '{}'", operand_ty.name()),
            );
            return Step::Continue;
        };
        let bits = *bits;

        let value = self.val_of(operand_new);
        if let Some(num) = value.as_num() {
            let count = if leading {
                num.leading_zeros(bits)
            } else {
                num.trailing_zeros(bits)
            };
            if let Some(count) = count {
                self.emit_const(old_id, operand_ty, Value::from_u64(count));
                return Step::Continue;
            }
        }

        let kind = if leading {
            InstKind::Clz {
                operand: operand_new,
            }
        } else {
            InstKind::Ctz {
                operand: operand_new,
            }
        };
        self.emit(old_id, kind, operand_ty, Value::runtime());
        Step::Continue
    }

    fn analyze_array_len(&mut self, old_id: InstId, array: InstId) -> Step {
        let array_new = self.resolved(array);
        if self.any_invalid(&[array_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let array_ty = self.ty_of(array_new);
        let usize_ty = self.unit.types.usize_type();

        match array_ty.kind().clone() {
            TypeKind::Array { len, .. } => {
                self.emit_const(old_id, usize_ty, Value::from_usize(len));
                Step::Continue
            }
            TypeKind::Slice { .. } => {
                let value = self.val_of(array_new);
                if let Some(StaticValue::Struct(fields)) = value.as_static() {
                    if let Some(len) = fields.get(1).and_then(Value::as_usize) {
                        self.emit_const(old_id, usize_ty, Value::from_usize(len));
                        return Step::Continue;
                    }
                }
                self.emit(
                    old_id,
                    InstKind::ArrayLen { array: array_new },
                    usize_ty,
                    Value::runtime(),
                );
                Step::Continue
            }
            _ => {
                self.report(old_id, format!("type '{}' has no length", array_ty.name()));
                Step::Continue
            }
        }
    }

    /* Compile-time environment */

    fn string_arg(&self, new_id: InstId) -> Option<String> {
        let value = self.val_of(new_id);
        let bytes = match value.as_static()? {
            StaticValue::Array(items) => items.clone(),
            StaticValue::Ptr(ptr) => match ptr.base.as_static()? {
                StaticValue::Array(items) => {
                    // drop the NUL from c strings
                    let mut items = items.clone();
                    if ptr.is_c_str {
                        items.pop();
                    }
                    items
                }
                _ => return None,
            },
            _ => return None,
        };

        let bytes: Option<Vec<u8>> = bytes
            .iter()
            .map(|v| v.as_num().and_then(|n| n.to_u64()).map(|b| b as u8))
            .collect();
        String::from_utf8(bytes?).ok()
    }

    fn analyze_import(&mut self, old_id: InstId, name: InstId) -> Step {
        let name_new = self.resolved(name);
        let Some(name_str) = self.string_arg(name_new) else {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        };

        let symbol = InternedSymbol::new(&name_str);
        match self.unit.find_import(symbol) {
            Some(import) => {
                let namespace_ty = self.unit.types.namespace();
                self.emit_const(
                    old_id,
                    namespace_ty,
                    Value::new_static(StaticValue::Namespace(import)),
                );
            }
            None => {
                self.report(old_id, format!("unable to find '{name_str}'"));
            }
        }
        Step::Continue
    }

    fn analyze_compile_var(&mut self, old_id: InstId, name: InstId) -> Step {
        let name_new = self.resolved(name);
        let Some(name_str) = self.string_arg(name_new) else {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        };

        let symbol = InternedSymbol::new(&name_str);
        match self.unit.compile_vars.get(&symbol).cloned() {
            Some(value) => {
                let ty = self.type_of_const_value(&value);
                // everything derived from here is configuration dependent
                let value = value.with_dependency(true);
                self.emit_const(old_id, ty, value);
            }
            None => {
                self.report(old_id, format!("unknown compile variable: '{name_str}'"));
            }
        }
        Step::Continue
    }

    /* Container construction */

    fn analyze_container_init_list(
        &mut self,
        old_id: InstId,
        container_type: InstId,
        items: &[InstId],
    ) -> Step {
        let type_new = self.resolved(container_type);
        if self.any_invalid(&[type_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let Some(ty) = self.val_of(type_new).as_type() else {
            self.report(old_id, "expected type expression");
            return Step::Continue;
        };

        let TypeKind::Array { child, len } = ty.kind().clone() else {
            self.report(
                old_id,
                format!("type '{}' does not support list initialization", ty.name()),
            );
            return Step::Continue;
        };

        if items.len() != len {
            self.report(
                old_id,
                format!("expected {len} elements, found {}", items.len()),
            );
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;
        let mut coerced = Vec::with_capacity(items.len());
        for item in items {
            let item_new = self.resolved(*item);
            coerced.push(self.coerce(span, item_new, &child));
        }

        if self.any_invalid(&coerced) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        if coerced.iter().all(|id| self.val_of(*id).is_comptime()) {
            let depends = coerced
                .iter()
                .any(|id| self.val_of(*id).depends_on_compile_var);
            let elements = coerced.iter().map(|id| self.val_of(*id)).collect();
            let value =
                Value::new_static(StaticValue::Array(elements)).with_dependency(depends);
            self.emit_const(old_id, ty, value);
            return Step::Continue;
        }

        self.emit(
            old_id,
            InstKind::ContainerInitList {
                container_type: type_new,
                items: coerced,
            },
            ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_container_init_fields(
        &mut self,
        old_id: InstId,
        container_type: InstId,
        fields: &[crate::middle::ir::FieldInitEntry],
    ) -> Step {
        let type_new = self.resolved(container_type);
        if self.any_invalid(&[type_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let Some(ty) = self.val_of(type_new).as_type() else {
            self.report(old_id, "expected type expression");
            return Step::Continue;
        };

        let TypeKind::Struct(struct_id) = ty.kind() else {
            self.report(
                old_id,
                format!("type '{}' does not support field initialization", ty.name()),
            );
            return Step::Continue;
        };
        let struct_id = *struct_id;

        let decl_fields: Vec<(InternedSymbol, Type)> = self.unit.types.structs[struct_id]
            .fields
            .iter()
            .map(|f| (f.name, f.ty.clone()))
            .collect();

        let mut assigned: Vec<Option<InstId>> = vec![None; decl_fields.len()];

        for field in fields {
            let Some(index) = decl_fields.iter().position(|(name, _)| *name == field.name)
            else {
                self.report(
                    old_id,
                    format!("no member named '{}' in '{}'", field.name, ty.name()),
                );
                return Step::Continue;
            };

            if assigned[index].is_some() {
                self.unit
                    .sink
                    .error(field.span, format!("duplicate field '{}'", field.name));
                continue;
            }

            let value_new = self.resolved(field.value);
            let coerced = self.coerce_in(
                self.current_new_block,
                false,
                field.span,
                value_new,
                &decl_fields[index].1,
            );
            assigned[index] = Some(coerced);
        }

        for (index, slot) in assigned.iter().enumerate() {
            if slot.is_none() {
                self.report(
                    old_id,
                    format!("missing field: '{}'", decl_fields[index].0),
                );
                return Step::Continue;
            }
        }

        let assigned: Vec<InstId> = assigned.into_iter().map(Option::unwrap).collect();
        if self.any_invalid(&assigned) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        if assigned.iter().all(|id| self.val_of(*id).is_comptime()) {
            let depends = assigned
                .iter()
                .any(|id| self.val_of(*id).depends_on_compile_var);
            let values = assigned.iter().map(|id| self.val_of(*id)).collect();
            let value =
                Value::new_static(StaticValue::Struct(values)).with_dependency(depends);
            self.emit_const(old_id, ty, value);
            return Step::Continue;
        }

        let fields: Vec<(usize, InstId)> = assigned
            .into_iter()
            .enumerate()
            .collect();
        self.emit(
            old_id,
            InstKind::StructInit {
                struct_type: ty.clone(),
                fields,
            },
            ty,
            Value::runtime(),
        );
        Step::Continue
    }

    /* Calls */

    fn analyze_call(&mut self, old_id: InstId, callee: InstId, args: &[InstId]) -> Step {
        let callee_new = self.resolved(callee);
        if self.any_invalid(&[callee_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let callee_ty = self.ty_of(callee_new);
        let callee_value = self.val_of(callee_new);
        let span = self.old.insts[old_id].span;

        match callee_ty.kind().clone() {
            // calling a type value is an explicit cast
            TypeKind::Metatype => {
                let Some(dest_ty) = callee_value.as_type() else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                if args.len() != 1 {
                    self.report(old_id, "cast expression expects exactly one argument");
                    return Step::Continue;
                }
                let operand_new = self.resolved(args[0]);
                self.analyze_cast(old_id, operand_new, &dest_ty)
            }

            TypeKind::Fn(sig) => {
                if args.len() != sig.params.len() {
                    self.report(
                        old_id,
                        format!("expected {} arguments, found {}", sig.params.len(), args.len()),
                    );
                    return Step::Continue;
                }

                let mut coerced = Vec::with_capacity(args.len());
                for (arg, param_ty) in args.iter().zip(sig.params.iter()) {
                    let arg_new = self.resolved(*arg);
                    coerced.push(self.coerce(span, arg_new, param_ty));
                }
                if self.any_invalid(&coerced) {
                    self.emit_invalid_silent(old_id);
                    return Step::Continue;
                }

                if let Some(fn_id) = callee_value.as_fn() {
                    let inline_call =
                        self.unit.fns[fn_id].proto.is_inline || self.old.is_inline;
                    if inline_call {
                        return self.eval_fn_call(old_id, fn_id, &coerced, &sig.ret);
                    }
                }

                self.emit(
                    old_id,
                    InstKind::Call {
                        callee: callee_new,
                        args: coerced,
                    },
                    sig.ret.clone(),
                    Value::runtime(),
                );
                Step::Continue
            }

            TypeKind::BoundFn { fn_ty } => {
                let TypeKind::Fn(sig) = fn_ty.kind().clone() else {
                    self.report(old_id, format!("type '{}' not a function", fn_ty.name()));
                    return Step::Continue;
                };
                let Some(StaticValue::BoundFn { func, bound }) = callee_value.as_static()
                else {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Continue;
                };
                let (func, bound) = (*func, *bound);

                // the captured first argument is prepended
                if args.len() + 1 != sig.params.len() {
                    self.report(
                        old_id,
                        format!(
                            "expected {} arguments, found {}",
                            sig.params.len().saturating_sub(1),
                            args.len()
                        ),
                    );
                    return Step::Continue;
                }

                let mut coerced = vec![bound];
                for (arg, param_ty) in args.iter().zip(sig.params.iter().skip(1)) {
                    let arg_new = self.resolved(*arg);
                    coerced.push(self.coerce(span, arg_new, param_ty));
                }

                let fn_const = self.emit_free_in(
                    self.current_new_block,
                    false,
                    span,
                    self.old.insts[old_id].scope,
                    InstKind::Const,
                    fn_ty,
                    Value::new_static(StaticValue::Fn(func)),
                );
                self.emit(
                    old_id,
                    InstKind::Call {
                        callee: fn_const,
                        args: coerced,
                    },
                    sig.ret.clone(),
                    Value::runtime(),
                );
                Step::Continue
            }

            TypeKind::GenericFn => {
                self.report(old_id, "unimplemented: calling generic function");
                Step::Continue
            }

            _ => {
                self.report(
                    old_id,
                    format!("type '{}' not a function", callee_ty.name()),
                );
                Step::Continue
            }
        }
    }

    /// Abstract interpretation of a call: builds the callee body as an
    /// inline executable, seeds parameter slots with the argument values,
    /// and analyzes it to a static result.
    fn eval_fn_call(
        &mut self,
        old_id: InstId,
        fn_id: FnId,
        args: &[InstId],
        ret: &Type,
    ) -> Step {
        if self.call_depth >= MAX_CALL_DEPTH {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        }

        let arg_values: Vec<Value> = args.iter().map(|a| self.val_of(*a)).collect();
        if arg_values.iter().any(|v| !v.is_comptime()) {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        }

        // parameter variables are created on first evaluation
        let fn_scope = self.unit.fns[fn_id].scope;
        let params: Vec<VarId> = if self.unit.scopes[fn_scope].variables.is_empty()
            && !self.unit.fns[fn_id].proto.params.is_empty()
        {
            build::declare_params(self.unit, fn_id)
        } else {
            self.unit.scopes[fn_scope].variables.clone()
        };

        let child_old = build::build_fn_executable(self.unit, fn_id, true);

        let mut child_new = Executable::new(true);
        child_new.backward_branch_quota = child_old.backward_branch_quota;

        let child_inst_count = child_old.insts.len();
        let child_block_count = child_old.blocks.len();

        let mut child = Analyzer {
            unit: &mut *self.unit,
            old: child_old,
            new: child_new,
            old_to_new: IndexVec::repeat(None, child_inst_count),
            block_map: IndexVec::repeat(None, child_block_count),
            br_origin: HashMap::new(),
            block_queue: VecDeque::new(),
            current_old_block: BlockId::ENTRY,
            current_new_block: BlockId::ENTRY,
            inst_index: 0,
            const_predecessor: None,
            mem_slots: Vec::new(),
            demoted_vars: HashMap::new(),
            return_entries: Vec::new(),
            result_value: None,
            expected: Some(ret.clone()),
            call_depth: self.call_depth + 1,
        };

        // seed parameters into compile-time slots
        for (param, value) in params.iter().zip(arg_values) {
            let slot = child.new.alloc_mem_slot();
            child.mem_slots.push(value);
            child.unit.variables[*param].mem_slot_index = Some(slot);
        }

        child.run();
        let result = child.finish();

        if result.value.is_comptime() {
            self.emit_const(old_id, ret.clone(), result.value);
        } else {
            // the failure was reported inside the evaluation
            self.emit_invalid_silent(old_id);
        }
        Step::Continue
    }

    /* Casts */

    fn analyze_cast(&mut self, old_id: InstId, operand: InstId, dest: &Type) -> Step {
        let actual = self.ty_of(operand);
        if actual.is_invalid() || dest.is_invalid() {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let value = self.val_of(operand);
        let Some(op) = classify_cast(&self.unit.types, &actual, dest, Some(&value)) else {
            self.report(
                old_id,
                format!(
                    "invalid cast from type '{}' to type '{}'",
                    actual.name(),
                    dest.name()
                ),
            );
            return Step::Continue;
        };

        let span = self.old.insts[old_id].span;
        let id = self.apply_cast_in(self.current_new_block, false, span, operand, op, dest);
        self.old_to_new[old_id] = Some(id);
        Step::Continue
    }

    /* Control flow */

    /// Ensures a verified block exists for an old block reached at runtime,
    /// queuing it for analysis on first sight
    fn runtime_block(&mut self, old_block: BlockId) -> BlockId {
        if let Some(mapped) = self.block_map[old_block] {
            return mapped;
        }

        let name_hint = self.old.blocks[old_block].name_hint;
        let new_block = self.new.create_block(name_hint);
        self.block_map[old_block] = Some(new_block);
        self.block_queue.push_back(old_block);
        new_block
    }

    fn analyze_cond_br(
        &mut self,
        old_id: InstId,
        condition: InstId,
        then_block: BlockId,
        else_block: BlockId,
        is_inline: bool,
    ) -> Step {
        let cond_new = self.resolved(condition);
        if self.ty_of(cond_new).is_invalid() {
            // invalid is fatal for control flow; stop this path
            return Step::EndBlock;
        }

        let span = self.old.insts[old_id].span;
        let bool_ty = self.unit.types.bool();
        let cond_c = self.coerce(span, cond_new, &bool_ty);
        if self.ty_of(cond_c).is_invalid() {
            return Step::EndBlock;
        }

        let cond_value = self.val_of(cond_c).as_bool();

        match cond_value {
            Some(cond) => {
                // static condition: inline the chosen successor
                let target = if cond { then_block } else { else_block };
                Step::Jump(target)
            }
            None if is_inline || self.old.is_inline => {
                self.report(old_id, "unable to evaluate constant expression");
                Step::Halt
            }
            None => {
                let then_new = self.runtime_block(then_block);
                let else_new = self.runtime_block(else_block);
                let ty = self.unit.types.unreachable();
                self.emit(
                    old_id,
                    InstKind::CondBr {
                        condition: cond_c,
                        then_block: then_new,
                        else_block: else_new,
                        is_inline: false,
                    },
                    ty,
                    Value::runtime(),
                );
                self.br_origin
                    .insert(self.current_old_block, self.current_new_block);
                Step::EndBlock
            }
        }
    }

    fn analyze_switch_br(
        &mut self,
        old_id: InstId,
        target: InstId,
        cases: &[SwitchCase],
        else_block: BlockId,
        is_inline: bool,
    ) -> Step {
        let target_new = self.resolved(target);
        if self.ty_of(target_new).is_invalid() {
            return Step::EndBlock;
        }

        let target_ty = self.ty_of(target_new);
        let target_value = self.val_of(target_new);
        let span = self.old.insts[old_id].span;

        if target_value.is_static() || is_inline || self.old.is_inline {
            if !target_value.is_static() {
                self.report(old_id, "unable to evaluate constant expression");
                return Step::Halt;
            }

            // fold to the matching case
            for case in cases {
                let case_new = self.resolved(case.value);
                let case_coerced = self.coerce(span, case_new, &target_ty);
                let case_value = self.val_of(case_coerced);
                if !case_value.is_static() {
                    self.report(old_id, "unable to evaluate constant expression");
                    return Step::Halt;
                }
                if const_values_equal(&target_value, &case_value) {
                    return Step::Jump(case.dest);
                }
            }
            return Step::Jump(else_block);
        }

        let mut new_cases = Vec::with_capacity(cases.len());
        for case in cases {
            let case_new = self.resolved(case.value);
            let case_coerced = self.coerce(span, case_new, &target_ty);
            let dest = self.runtime_block(case.dest);
            new_cases.push(SwitchCase {
                value: case_coerced,
                dest,
            });
        }
        let else_new = self.runtime_block(else_block);

        let ty = self.unit.types.unreachable();
        self.emit(
            old_id,
            InstKind::SwitchBr {
                target: target_new,
                cases: new_cases,
                else_block: else_new,
                is_inline: false,
            },
            ty,
            Value::runtime(),
        );
        self.br_origin
            .insert(self.current_old_block, self.current_new_block);
        Step::EndBlock
    }

    fn analyze_phi(
        &mut self,
        old_id: InstId,
        incoming_blocks: &[BlockId],
        incoming_values: &[InstId],
    ) -> Step {
        // under a const predecessor the phi collapses to the matching value
        if let Some(pred) = self.const_predecessor {
            if let Some(position) = incoming_blocks.iter().position(|b| *b == pred) {
                let value_new = self.resolved(incoming_values[position]);
                self.old_to_new[old_id] = Some(value_new);
                return Step::Continue;
            }
        }

        // drop incoming edges from blocks analysis never reached
        let mut survivors: Vec<(BlockId, InstId)> = Vec::new();
        for (block, value) in incoming_blocks.iter().zip(incoming_values) {
            if self.old.blocks[*block].ref_count == 0 {
                continue;
            }
            let Some(origin) = self.br_origin.get(block).copied() else {
                continue;
            };
            let Some(value_new) = self.old_to_new[*value] else {
                continue;
            };
            survivors.push((origin, value_new));
        }

        match survivors.len() {
            0 => {
                let ty = self.unit.types.unreachable();
                self.emit(old_id, InstKind::Unreachable, ty, Value::runtime());
                return Step::EndBlock;
            }
            1 => {
                self.old_to_new[old_id] = Some(survivors[0].1);
                return Step::Continue;
            }
            _ => {}
        }

        let entries: Vec<PeerEntry> = survivors
            .iter()
            .map(|(_, value)| self.peer_entry(*value))
            .collect();
        let peer_ty = match resolve_peer_types(&mut self.unit.types, &entries) {
            PeerResult::Ok(ty) => ty,
            PeerResult::Incompatible(a, b) => {
                let a_ty = entries[a].ty.clone();
                let b_ty = entries[b].ty.clone();
                self.report(
                    old_id,
                    format!(
                        "incompatible types: '{}' and '{}'",
                        a_ty.name(),
                        b_ty.name()
                    ),
                );
                return Step::Continue;
            }
        };

        // a joined value must have a constrained runtime type
        if peer_ty.is_numeric_literal() {
            self.report(old_id, "unable to infer expression type");
            return Step::Continue;
        }
        if peer_ty.is_invalid() {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let span = self.old.insts[old_id].span;
        let mut new_blocks = Vec::with_capacity(survivors.len());
        let mut new_values = Vec::with_capacity(survivors.len());
        for (origin, value) in survivors {
            // coercions happen in the predecessor, before its terminator
            let coerced = self.coerce_in(origin, true, span, value, &peer_ty);
            new_blocks.push(origin);
            new_values.push(coerced);
        }

        self.emit(
            old_id,
            InstKind::Phi {
                incoming_blocks: new_blocks,
                incoming_values: new_values,
            },
            peer_ty,
            Value::runtime(),
        );
        Step::Continue
    }

    fn analyze_return(&mut self, old_id: InstId, operand: InstId) -> Step {
        let operand_new = self.resolved(operand);
        let span = self.old.insts[old_id].span;

        let coerced = match self.expected.clone() {
            Some(expected) => self.coerce(span, operand_new, &expected),
            None => operand_new,
        };

        self.return_entries.push(self.peer_entry(coerced));
        if self.result_value.is_none() {
            self.result_value = Some(self.val_of(coerced));
        }

        let ty = self.unit.types.unreachable();
        self.emit(old_id, InstKind::Return { operand: coerced }, ty, Value::runtime());
        Step::EndBlock
    }

    fn analyze_to_ptr_type(&mut self, old_id: InstId, operand: InstId) -> Step {
        let operand_new = self.resolved(operand);
        let Some(ty) = self.val_of(operand_new).as_type() else {
            self.report(old_id, "expected type expression");
            return Step::Continue;
        };

        let child = match ty.kind() {
            TypeKind::Array { child, .. } => child.clone(),
            TypeKind::Slice { child, .. } => child.clone(),
            _ => {
                self.report(
                    old_id,
                    format!("expected array type or slice, found '{}'", ty.name()),
                );
                return Step::Continue;
            }
        };

        let ptr = self.unit.types.pointer_to(child, false);
        let metatype = self.unit.types.metatype();
        self.emit_const(old_id, metatype, Value::from_type(ptr));
        Step::Continue
    }

    fn analyze_array_type(&mut self, old_id: InstId, len: InstId, child: InstId) -> Step {
        let len_new = self.resolved(len);
        let child_new = self.resolved(child);
        if self.any_invalid(&[len_new, child_new]) {
            self.emit_invalid_silent(old_id);
            return Step::Continue;
        }

        let Some(len_value) = self.val_of(len_new).as_usize() else {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        };
        let Some(child_ty) = self.val_of(child_new).as_type() else {
            self.report(old_id, "expected type expression");
            return Step::Continue;
        };

        let array_ty = self.unit.types.array_of(child_ty, len_value);
        let metatype = self.unit.types.metatype();
        self.emit_const(old_id, metatype, Value::from_type(array_ty));
        Step::Continue
    }

    /* Attribute setters */

    fn analyze_fn_attr(
        &mut self,
        old_id: InstId,
        fn_value: InstId,
        flag: InstId,
        apply: impl FnOnce(&mut crate::middle::scope::FnDecl, bool),
    ) -> Step {
        let fn_new = self.resolved(fn_value);
        let flag_new = self.resolved(flag);

        let Some(fn_id) = self.val_of(fn_new).as_fn() else {
            self.report(old_id, "expected function");
            return Step::Continue;
        };
        let Some(enabled) = self.val_of(flag_new).as_bool() else {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        };

        apply(&mut self.unit.fns[fn_id], enabled);
        self.emit_void(old_id);
        Step::Continue
    }

    fn analyze_set_debug_safety(
        &mut self,
        old_id: InstId,
        scope_value: InstId,
        enabled: InstId,
    ) -> Step {
        let scope_new = self.resolved(scope_value);
        let enabled_new = self.resolved(enabled);

        let scope_id = match self.val_of(scope_new).as_static() {
            Some(StaticValue::Scope(id)) => *id,
            _ => {
                self.report(old_id, "expected scope reference");
                return Step::Continue;
            }
        };
        let Some(on) = self.val_of(enabled_new).as_bool() else {
            self.report(old_id, "unable to evaluate constant expression");
            return Step::Continue;
        };

        self.unit.scopes[scope_id].safety_off = Some(!on);
        self.emit_void(old_id);
        Step::Continue
    }
}

/* Static cast execution */

fn cast_folds_statically(op: CastOp) -> bool {
    !matches!(
        op,
        CastOp::PtrToInt
            | CastOp::IntToPtr
            | CastOp::PointerReinterpret
            | CastOp::SliceReinterpret
            | CastOp::BytesToSlice
    )
}

fn return_knowledge_for(op: CastOp) -> ReturnKnowledge {
    match op {
        CastOp::MaybeWrap => ReturnKnowledge::KnownNonNull,
        CastOp::NullToMaybe => ReturnKnowledge::KnownNull,
        CastOp::ErrWrap => ReturnKnowledge::KnownNonError,
        CastOp::PureErrWrap => ReturnKnowledge::KnownError,
        _ => ReturnKnowledge::None,
    }
}

fn fold_cast_value(op: CastOp, value: &Value, dest: &Type) -> Value {
    let depends = value.depends_on_compile_var;

    let folded = match op {
        CastOp::Noop | CastOp::IntWiden | CastOp::FloatWiden | CastOp::ErrToInt => value.clone(),
        CastOp::Undef => Value::undef(),
        CastOp::IntTruncate => match (value.as_num(), dest.kind()) {
            (Some(num), TypeKind::Int { bits, signed }) => {
                Value::from_num(num.wrapped_to_bits(*bits, *signed))
            }
            _ => value.clone(),
        },
        CastOp::FloatTruncate => value.clone(),
        CastOp::IntToFloat => match value.as_num() {
            Some(num) => Value::from_num(num.promote_to_float()),
            None => value.clone(),
        },
        CastOp::FloatToInt => match value.as_num() {
            Some(num) => Value::from_num(num.truncate_to_int()),
            None => value.clone(),
        },
        CastOp::BoolToInt => match value.as_bool() {
            Some(b) => Value::from_u64(b as u64),
            None => value.clone(),
        },
        CastOp::IntToBool => match value.as_num() {
            Some(num) => Value::from_bool(!num.is_zero()),
            None => value.clone(),
        },
        CastOp::MaybeWrap => {
            Value::new_static(StaticValue::Maybe(Some(Box::new(value.clone()))))
        }
        CastOp::NullToMaybe => Value::new_static(StaticValue::Maybe(None)),
        CastOp::ErrWrap => Value::new_static(StaticValue::Enum {
            tag: 0,
            payload: Some(Box::new(value.clone())),
        }),
        CastOp::PureErrWrap => match value.as_num() {
            Some(num) => Value::new_static(StaticValue::Enum {
                tag: num.to_usize().unwrap_or(1).max(1),
                payload: None,
            }),
            None => value.clone(),
        },
        CastOp::EnumToInt => match value.as_static() {
            Some(StaticValue::Enum { tag, .. }) => Value::from_usize(*tag),
            _ => value.clone(),
        },
        CastOp::IntToEnum => match value.as_num().and_then(|n| n.to_usize()) {
            Some(tag) => Value::new_static(StaticValue::Enum { tag, payload: None }),
            None => value.clone(),
        },
        CastOp::ArrayToSlice => match value.as_static() {
            Some(StaticValue::Array(items)) => {
                let len = items.len();
                let ptr = Value::new_static(StaticValue::Ptr(ConstPtr::to_element(
                    value.clone(),
                    0,
                )));
                Value::new_static(StaticValue::Struct(vec![ptr, Value::from_usize(len)]))
            }
            _ => value.clone(),
        },
        CastOp::PtrToInt
        | CastOp::IntToPtr
        | CastOp::PointerReinterpret
        | CastOp::SliceReinterpret
        | CastOp::BytesToSlice => value.clone(),
    };

    folded.with_dependency(depends)
}
