//! IR (Intermediate Representation). In this form, loops, conditionals and
//! defers are simplified to basic blocks ending in explicit transfers, and
//! expression trees are flattened into ordered instructions. The same
//! instruction set serves two stages: the builder produces an *unverified*
//! executable, and the analyzer rewrites it into a *verified* one where
//! every instruction has a known result type and, where possible, a known
//! compile-time value.

use std::rc::Rc;

use crate::{
    frontend::{
        ast::{AsmExpr, BinOpKind},
        intern::InternedSymbol,
        Span,
    },
    index::{arena_id, IndexVec},
    middle::{
        scope::{ScopeId, VarId},
        ty::Type,
        value::Value,
    },
};

pub mod build;
pub mod pretty_print;

pub const DEFAULT_BACKWARD_BRANCH_QUOTA: usize = 1000;

arena_id! {
    /// Identifies an instruction within one executable
    pub struct InstId;
}

arena_id! {
    /// Identifies a basic block within one executable
    pub struct BlockId;
}

impl BlockId {
    pub const ENTRY: Self = Self(0);
}

#[derive(Debug)]
pub struct Instruction {
    /// Stable id used in dumps and for back-edge detection; monotonically
    /// increasing in creation order
    pub debug_id: usize,
    pub span: Span,
    pub scope: ScopeId,
    /// Result type; invalid until the analyzer assigns it
    pub ty: Type,
    /// Compile-time value; `Runtime` for truly dynamic results
    pub value: Value,
    /// How many downstream instructions read this one
    pub ref_count: usize,
    /// Hint attached to cast outputs for downstream folding
    pub return_knowledge: ReturnKnowledge,
    pub kind: InstKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnKnowledge {
    #[default]
    None,
    KnownNull,
    KnownNonNull,
    KnownError,
    KnownNonError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnOpKind {
    Negate,
    NegateWrap,
    BoolNot,
    BitNot,
}

/// How a cast output is produced from its operand. Decided by the coercion
/// engine; executed by the analyzer (fold) or the backend (runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CastOp {
    Noop,
    IntWiden,
    IntTruncate,
    FloatWiden,
    FloatTruncate,
    IntToFloat,
    FloatToInt,
    BoolToInt,
    IntToBool,
    IntToPtr,
    PtrToInt,
    PointerReinterpret,
    /// Fixed-size array to slice
    ArrayToSlice,
    /// Slice element-type reinterpretation through `u8`
    SliceReinterpret,
    /// `[N]u8` to `[]T` when the sizes divide evenly
    BytesToSlice,
    /// Wrap a payload value into a maybe
    MaybeWrap,
    /// `null` literal into a typed maybe
    NullToMaybe,
    /// Wrap a payload value into an error union
    ErrWrap,
    /// Wrap a bare error code into an error union
    PureErrWrap,
    EnumToInt,
    IntToEnum,
    ErrToInt,
    /// `undefined` into any type
    Undef,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub value: InstId,
    pub dest: BlockId,
}

#[derive(Debug, Clone)]
pub struct FieldInitEntry {
    pub span: Span,
    pub name: InternedSymbol,
    pub value: InstId,
}

#[derive(Debug, Clone)]
pub struct AsmBinding {
    pub constraint: InternedSymbol,
    pub var: VarId,
}

#[derive(Debug, Clone)]
pub struct AsmInputEntry {
    pub constraint: InternedSymbol,
    pub value: InstId,
}

#[derive(Debug)]
pub enum InstKind {
    /// Value prebuilt into the instruction's `value` field
    Const,
    UnOp {
        op: UnOpKind,
        operand: InstId,
    },
    BinOp {
        op: BinOpKind,
        lhs: InstId,
        rhs: InstId,
    },
    /// Emitted only into verified executables
    Cast {
        op: CastOp,
        operand: InstId,
        dest_type: Type,
    },
    /// Address-of
    Ref {
        operand: InstId,
        is_const: bool,
    },
    LoadPtr {
        ptr: InstId,
    },
    StorePtr {
        ptr: InstId,
        value: InstId,
    },
    DeclVar {
        var: VarId,
        var_type: Option<InstId>,
        init: InstId,
    },
    VarPtr {
        var: VarId,
    },
    /// Unresolved field access through a pointer; the analyzer dispatches
    /// on the container type
    FieldPtr {
        container_ptr: InstId,
        field_name: InternedSymbol,
    },
    StructFieldPtr {
        struct_ptr: InstId,
        field_index: usize,
    },
    EnumFieldPtr {
        enum_ptr: InstId,
        field_index: usize,
    },
    ElemPtr {
        array_ptr: InstId,
        index: InstId,
        safety_check_on: bool,
    },
    /// `array[start...end]`; produces the `{ptr, len}` slice struct
    Slice {
        array_ptr: InstId,
        start: InstId,
        end: Option<InstId>,
        is_const: bool,
        safety_check_on: bool,
    },
    Call {
        callee: InstId,
        args: Vec<InstId>,
    },
    Phi {
        incoming_blocks: Vec<BlockId>,
        incoming_values: Vec<InstId>,
    },
    Br {
        dest: BlockId,
        is_inline: bool,
    },
    CondBr {
        condition: InstId,
        then_block: BlockId,
        else_block: BlockId,
        is_inline: bool,
    },
    SwitchBr {
        target: InstId,
        cases: Vec<SwitchCase>,
        else_block: BlockId,
        is_inline: bool,
    },
    /// Loads the scrutinee out of the switch target pointer
    SwitchTarget {
        target_ptr: InstId,
    },
    /// Prong-refined view of the switch target inside a payload capture
    SwitchVar {
        target_ptr: InstId,
        prong_value: InstId,
    },
    Return {
        operand: InstId,
    },
    Unreachable,
    TypeOf {
        operand: InstId,
    },
    /// Container value type → pointer-to-element type
    ToPtrType {
        operand: InstId,
    },
    PtrTypeChild {
        operand: InstId,
    },
    ArrayType {
        len: InstId,
        child: InstId,
    },
    SliceType {
        child: InstId,
        is_const: bool,
    },
    /// `?T` as a type expression
    MaybeType {
        child: InstId,
    },
    SizeOf {
        operand: InstId,
    },
    TestNull {
        operand: InstId,
    },
    UnwrapMaybe {
        operand: InstId,
        safety_check_on: bool,
    },
    Clz {
        operand: InstId,
    },
    Ctz {
        operand: InstId,
    },
    EnumTag {
        operand: InstId,
    },
    StaticEval {
        operand: InstId,
    },
    ArrayLen {
        array: InstId,
    },
    Import {
        name: InstId,
    },
    CompileVar {
        name: InstId,
    },
    ContainerInitList {
        container_type: InstId,
        items: Vec<InstId>,
    },
    ContainerInitFields {
        container_type: InstId,
        fields: Vec<FieldInitEntry>,
    },
    /// Verified struct construction with resolved field indices
    StructInit {
        struct_type: Type,
        fields: Vec<(usize, InstId)>,
    },
    Asm {
        node: Rc<AsmExpr>,
        outputs: Vec<AsmBinding>,
        inputs: Vec<AsmInputEntry>,
    },
    SetFnTest {
        fn_value: InstId,
        enabled: InstId,
    },
    SetFnVisible {
        fn_value: InstId,
        visible: InstId,
    },
    SetDebugSafety {
        scope_value: InstId,
        enabled: InstId,
    },
}

impl InstKind {
    /// Instructions with observable side effects survive dead-code pruning
    /// even with a zero ref count.
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::SwitchBr { .. }
            | InstKind::DeclVar { .. }
            | InstKind::StorePtr { .. }
            | InstKind::Call { .. }
            | InstKind::Return { .. }
            | InstKind::Unreachable
            | InstKind::SetFnTest { .. }
            | InstKind::SetFnVisible { .. }
            | InstKind::SetDebugSafety { .. }
            | InstKind::Import { .. } => true,
            InstKind::Asm { node, .. } => node.is_volatile,
            _ => false,
        }
    }

    /// Every instruction operand, in evaluation order. Used to maintain ref
    /// counts and by the pretty printer.
    pub fn operands(&self) -> Vec<InstId> {
        match self {
            InstKind::Const | InstKind::Unreachable | InstKind::VarPtr { .. } => Vec::new(),
            InstKind::UnOp { operand, .. }
            | InstKind::Cast { operand, .. }
            | InstKind::Ref { operand, .. }
            | InstKind::LoadPtr { ptr: operand }
            | InstKind::FieldPtr {
                container_ptr: operand,
                ..
            }
            | InstKind::StructFieldPtr {
                struct_ptr: operand,
                ..
            }
            | InstKind::EnumFieldPtr {
                enum_ptr: operand, ..
            }
            | InstKind::SwitchTarget {
                target_ptr: operand,
            }
            | InstKind::Return { operand }
            | InstKind::TypeOf { operand }
            | InstKind::ToPtrType { operand }
            | InstKind::PtrTypeChild { operand }
            | InstKind::SliceType { child: operand, .. }
            | InstKind::MaybeType { child: operand }
            | InstKind::SizeOf { operand }
            | InstKind::TestNull { operand }
            | InstKind::UnwrapMaybe { operand, .. }
            | InstKind::Clz { operand }
            | InstKind::Ctz { operand }
            | InstKind::EnumTag { operand }
            | InstKind::StaticEval { operand }
            | InstKind::ArrayLen { array: operand }
            | InstKind::Import { name: operand }
            | InstKind::CompileVar { name: operand }
            | InstKind::CondBr {
                condition: operand, ..
            } => vec![*operand],
            InstKind::BinOp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::StorePtr { ptr, value } => vec![*ptr, *value],
            InstKind::DeclVar { var_type, init, .. } => {
                var_type.iter().copied().chain([*init]).collect()
            }
            InstKind::ElemPtr {
                array_ptr, index, ..
            } => vec![*array_ptr, *index],
            InstKind::Slice {
                array_ptr,
                start,
                end,
                ..
            } => [*array_ptr, *start]
                .into_iter()
                .chain(end.iter().copied())
                .collect(),
            InstKind::Call { callee, args } => {
                [*callee].into_iter().chain(args.iter().copied()).collect()
            }
            InstKind::Phi {
                incoming_values, ..
            } => incoming_values.clone(),
            InstKind::Br { .. } => Vec::new(),
            InstKind::SwitchBr { target, cases, .. } => [*target]
                .into_iter()
                .chain(cases.iter().map(|c| c.value))
                .collect(),
            InstKind::SwitchVar {
                target_ptr,
                prong_value,
            } => vec![*target_ptr, *prong_value],
            InstKind::ArrayType { len, child } => vec![*len, *child],
            InstKind::ContainerInitList {
                container_type,
                items,
            } => [*container_type]
                .into_iter()
                .chain(items.iter().copied())
                .collect(),
            InstKind::ContainerInitFields {
                container_type,
                fields,
            } => [*container_type]
                .into_iter()
                .chain(fields.iter().map(|f| f.value))
                .collect(),
            InstKind::StructInit { fields, .. } => fields.iter().map(|(_, v)| *v).collect(),
            InstKind::Asm { inputs, .. } => inputs.iter().map(|i| i.value).collect(),
            InstKind::SetFnTest { fn_value, enabled } => vec![*fn_value, *enabled],
            InstKind::SetFnVisible { fn_value, visible } => vec![*fn_value, *visible],
            InstKind::SetDebugSafety {
                scope_value,
                enabled,
            } => vec![*scope_value, *enabled],
        }
    }

    /// Blocks this instruction transfers control to
    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { dest, .. } => vec![*dest],
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            InstKind::SwitchBr {
                cases, else_block, ..
            } => cases
                .iter()
                .map(|c| c.dest)
                .chain([*else_block])
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Short mnemonic used by dumps
    pub fn mnemonic(&self) -> &'static str {
        match self {
            InstKind::Const => "const",
            InstKind::UnOp { .. } => "un_op",
            InstKind::BinOp { .. } => "bin_op",
            InstKind::Cast { .. } => "cast",
            InstKind::Ref { .. } => "ref",
            InstKind::LoadPtr { .. } => "load_ptr",
            InstKind::StorePtr { .. } => "store_ptr",
            InstKind::DeclVar { .. } => "decl_var",
            InstKind::VarPtr { .. } => "var_ptr",
            InstKind::FieldPtr { .. } => "field_ptr",
            InstKind::StructFieldPtr { .. } => "struct_field_ptr",
            InstKind::EnumFieldPtr { .. } => "enum_field_ptr",
            InstKind::ElemPtr { .. } => "elem_ptr",
            InstKind::Slice { .. } => "slice",
            InstKind::Call { .. } => "call",
            InstKind::Phi { .. } => "phi",
            InstKind::Br { .. } => "br",
            InstKind::CondBr { .. } => "cond_br",
            InstKind::SwitchBr { .. } => "switch_br",
            InstKind::SwitchTarget { .. } => "switch_target",
            InstKind::SwitchVar { .. } => "switch_var",
            InstKind::Return { .. } => "return",
            InstKind::Unreachable => "unreachable",
            InstKind::TypeOf { .. } => "typeof",
            InstKind::ToPtrType { .. } => "to_ptr_type",
            InstKind::PtrTypeChild { .. } => "ptr_type_child",
            InstKind::ArrayType { .. } => "array_type",
            InstKind::SliceType { .. } => "slice_type",
            InstKind::MaybeType { .. } => "maybe_type",
            InstKind::SizeOf { .. } => "size_of",
            InstKind::TestNull { .. } => "test_null",
            InstKind::UnwrapMaybe { .. } => "unwrap_maybe",
            InstKind::Clz { .. } => "clz",
            InstKind::Ctz { .. } => "ctz",
            InstKind::EnumTag { .. } => "enum_tag",
            InstKind::StaticEval { .. } => "static_eval",
            InstKind::ArrayLen { .. } => "array_len",
            InstKind::Import { .. } => "import",
            InstKind::CompileVar { .. } => "compile_var",
            InstKind::ContainerInitList { .. } => "container_init_list",
            InstKind::ContainerInitFields { .. } => "container_init_fields",
            InstKind::StructInit { .. } => "struct_init",
            InstKind::Asm { .. } => "asm",
            InstKind::SetFnTest { .. } => "set_fn_test",
            InstKind::SetFnVisible { .. } => "set_fn_visible",
            InstKind::SetDebugSafety { .. } => "set_debug_safety",
        }
    }
}

#[derive(Debug)]
pub struct BasicBlock {
    pub name_hint: &'static str,
    pub debug_id: usize,
    pub instructions: Vec<InstId>,
    /// Number of branches targeting this block. The entry block carries an
    /// implicit reference from the executable itself.
    pub ref_count: usize,
}

/// A label placed in an executable during construction; resolved against
/// goto fixups in a second pass.
#[derive(Debug)]
pub struct LabelEntry {
    pub name: InternedSymbol,
    pub block: BlockId,
    pub span: Span,
    pub used: bool,
}

/// A goto recorded during construction. The placeholder instruction is an
/// `Unreachable` that pass 2 replaces with a branch to the label's block.
#[derive(Debug)]
pub struct GotoFixup {
    pub name: InternedSymbol,
    pub placeholder: InstId,
    pub scope: ScopeId,
    pub span: Span,
}

#[derive(Debug)]
pub struct Executable {
    pub blocks: IndexVec<BlockId, BasicBlock>,
    pub insts: IndexVec<InstId, Instruction>,
    /// Number of compile-time storage cells variables of this executable use
    pub mem_slot_count: usize,
    pub next_debug_id: usize,
    /// The whole executable must fold to a static value
    pub is_inline: bool,
    pub backward_branch_count: usize,
    pub backward_branch_quota: usize,
    /// Sticky failure flag; once set, every further analysis step yields
    /// invalid types
    pub invalid: bool,
    pub labels: Vec<LabelEntry>,
    pub goto_fixups: Vec<GotoFixup>,
}

impl Executable {
    pub fn new(is_inline: bool) -> Self {
        Self {
            blocks: IndexVec::new(),
            insts: IndexVec::new(),
            mem_slot_count: 0,
            next_debug_id: 0,
            is_inline,
            backward_branch_count: 0,
            backward_branch_quota: DEFAULT_BACKWARD_BRANCH_QUOTA,
            invalid: false,
            labels: Vec::new(),
            goto_fixups: Vec::new(),
        }
    }

    pub fn create_block(&mut self, name_hint: &'static str) -> BlockId {
        let debug_id = self.take_debug_id();
        self.blocks.push(BasicBlock {
            name_hint,
            debug_id,
            instructions: Vec::new(),
            // the entry block is referenced by the executable itself
            ref_count: usize::from(self.blocks.is_empty()),
        })
    }

    pub fn take_debug_id(&mut self) -> usize {
        let id = self.next_debug_id;
        self.next_debug_id += 1;
        id
    }

    pub fn alloc_mem_slot(&mut self) -> usize {
        let slot = self.mem_slot_count;
        self.mem_slot_count += 1;
        slot
    }

    /// Marks one more reader of an instruction
    pub fn ref_inst(&mut self, inst: InstId) {
        self.insts[inst].ref_count += 1;
    }

    pub fn ref_block(&mut self, block: BlockId) {
        self.blocks[block].ref_count += 1;
    }

    /// The instruction a block ends with, if the block is terminated
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block]
            .instructions
            .last()
            .copied()
            .filter(|id| {
                matches!(
                    self.insts[*id].kind,
                    InstKind::Br { .. }
                        | InstKind::CondBr { .. }
                        | InstKind::SwitchBr { .. }
                        | InstKind::Return { .. }
                        | InstKind::Unreachable
                )
            })
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.terminator(block).is_some()
    }
}
