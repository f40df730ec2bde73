//! The middle-end type model. Types are interned: handing out `Type` clones
//! is cheap and comparing them starts with pointer identity. Every
//! non-invalid type gets its display name computed once at intern time.

use std::rc::Rc;

use colored::Colorize;
use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    frontend::intern::InternedSymbol,
    index::{arena_id, IndexVec},
};

/// Width of a pointer on every target this middle-end currently serves
pub const POINTER_BITS: u32 = 64;

#[doc(hidden)]
mod private {
    #[doc(hidden)]
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct PrivateZst;
}

/// Thin pointer to an interned type. Do not construct directly; use
/// [`TypeContext::intern`]
#[derive(Clone)]
pub struct Type(Rc<TypeData>, private::PrivateZst);

#[derive(Debug)]
pub struct TypeData {
    pub kind: TypeKind,
    /// Stable display name, e.g. `&const u8` or `[3]u32`
    pub name: String,
}

impl Type {
    fn new_from_reference_only_for_interning(data: Rc<TypeData>) -> Self {
        Self(data, private::PrivateZst)
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl core::ops::Deref for Type {
    type Target = TypeKind;

    fn deref(&self) -> &Self::Target {
        &self.0.kind
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.kind == other.0.kind
    }
}

impl Eq for Type {}

impl core::hash::Hash for Type {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
    }
}

impl core::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Type").field(&self.0.name).finish()
    }
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.name.yellow())
    }
}

arena_id! {
    /// Identifies a struct declaration in the compile unit
    pub struct StructId;
}

arena_id! {
    /// Identifies an enum declaration in the compile unit
    pub struct EnumId;
}

arena_id! {
    /// Identifies a union declaration in the compile unit
    pub struct UnionId;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Produced only after an error has been reported. Seeing this in an
    /// operand means stay quiet and pass it along.
    Invalid,
    Void,
    Unreachable,
    Bool,
    /// Sized integer, e.g. `u8` / `i32`
    Int { bits: u32, signed: bool },
    /// Sized float, `f32` / `f64`
    Float { bits: u32 },
    /// Compile-time integer literal of unconstrained width
    LitInt,
    /// Compile-time float literal
    LitFloat,
    /// The type of types
    Metatype,
    Pointer { child: Type, is_const: bool },
    Array { child: Type, len: usize },
    /// Unknown-length view; its value form is the two-field `{ptr, len}`
    /// struct with fixed indices 0 and 1
    Slice { child: Type, is_const: bool },
    Struct(StructId),
    Enum(EnumId),
    Union(UnionId),
    Maybe(Type),
    /// `%T`: either an error code or a payload of the child type
    ErrorUnion { err: Type, payload: Type },
    /// A bare error code
    PureError,
    Fn(Rc<FnSig>),
    /// A function with compile-time parameters; calls are not analyzable yet
    GenericFn,
    /// A function with its first argument already captured
    BoundFn { fn_ty: Type },
    Namespace,
    /// A scope handle value
    Block,
    /// The type of `undefined` before coercion gives it one
    UndefLit,
    /// The type of `null` before coercion wraps it in a maybe
    NullLit,
    /// A named type declaration (alias) before it is resolved away
    TypeDecl,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSig {
    pub params: Vec<Type>,
    pub ret: Type,
    pub is_var_args: bool,
}

#[derive(Debug)]
pub struct StructData {
    pub name: InternedSymbol,
    pub fields: Vec<StructField>,
}

#[derive(Debug)]
pub struct StructField {
    pub name: InternedSymbol,
    pub ty: Type,
}

#[derive(Debug)]
pub struct EnumData {
    pub name: InternedSymbol,
    pub tag_type: Type,
    pub fields: Vec<EnumField>,
}

impl EnumData {
    /// An enum with no payloads anywhere casts to and from its tag type
    pub fn is_payload_free(&self) -> bool {
        self.fields.iter().all(|f| f.payload.is_none())
    }
}

#[derive(Debug)]
pub struct EnumField {
    pub name: InternedSymbol,
    pub payload: Option<Type>,
}

#[derive(Debug)]
pub struct UnionData {
    pub name: InternedSymbol,
    pub fields: Vec<(InternedSymbol, Type)>,
}

impl TypeKind {
    pub fn is_invalid(&self) -> bool {
        matches!(self, TypeKind::Invalid)
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, TypeKind::Unreachable)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, TypeKind::Int { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeKind::Float { .. })
    }

    pub fn is_numeric_literal(&self) -> bool {
        matches!(self, TypeKind::LitInt | TypeKind::LitFloat)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_int() || self.is_float() || self.is_numeric_literal()
    }

    /// Types whose values exist only at compile time. Variables of these
    /// types must be const; they never receive a runtime representation.
    pub fn is_compile_time_only(&self) -> bool {
        matches!(
            self,
            TypeKind::Metatype
                | TypeKind::Namespace
                | TypeKind::Block
                | TypeKind::LitInt
                | TypeKind::LitFloat
                | TypeKind::UndefLit
                | TypeKind::NullLit
                | TypeKind::GenericFn
                | TypeKind::TypeDecl
        )
    }
}

/// The only structural equality coercion ever uses: identical except that
/// pointer and slice constness may differ.
pub fn types_equal_modulo_const(a: &Type, b: &Type) -> bool {
    if a == b {
        return true;
    }

    match (a.kind(), b.kind()) {
        (
            TypeKind::Pointer { child: a_child, .. },
            TypeKind::Pointer { child: b_child, .. },
        )
        | (
            TypeKind::Slice { child: a_child, .. },
            TypeKind::Slice { child: b_child, .. },
        ) => types_equal_modulo_const(a_child, b_child),
        (
            TypeKind::Array {
                child: a_child,
                len: a_len,
            },
            TypeKind::Array {
                child: b_child,
                len: b_len,
            },
        ) => a_len == b_len && types_equal_modulo_const(a_child, b_child),
        (TypeKind::Maybe(a_child), TypeKind::Maybe(b_child)) => {
            types_equal_modulo_const(a_child, b_child)
        }
        (
            TypeKind::ErrorUnion {
                err: a_err,
                payload: a_payload,
            },
            TypeKind::ErrorUnion {
                err: b_err,
                payload: b_payload,
            },
        ) => types_equal_modulo_const(a_err, b_err) && types_equal_modulo_const(a_payload, b_payload),
        _ => false,
    }
}

/// Type interning table plus the container declarations types refer to.
/// Append-only for the duration of one compilation.
#[derive(Debug, Default)]
pub struct TypeContext {
    table: HashMap<TypeKind, Type>,
    pub structs: IndexVec<StructId, StructData>,
    pub enums: IndexVec<EnumId, EnumData>,
    pub unions: IndexVec<UnionId, UnionData>,
    primitives: HashMap<InternedSymbol, Type>,
}

impl TypeContext {
    pub fn new() -> Self {
        let mut ctx = Self::default();
        ctx.register_primitives();
        ctx
    }

    pub fn intern(&mut self, kind: TypeKind) -> Type {
        if let Some(existing) = self.table.get(&kind) {
            return existing.clone();
        }

        let name = self.name_for(&kind);
        let ty = Type::new_from_reference_only_for_interning(Rc::new(TypeData {
            kind: kind.clone(),
            name,
        }));
        self.table.insert(kind, ty.clone());
        ty
    }

    pub fn invalid(&mut self) -> Type {
        self.intern(TypeKind::Invalid)
    }

    pub fn void(&mut self) -> Type {
        self.intern(TypeKind::Void)
    }

    pub fn unreachable(&mut self) -> Type {
        self.intern(TypeKind::Unreachable)
    }

    pub fn bool(&mut self) -> Type {
        self.intern(TypeKind::Bool)
    }

    pub fn metatype(&mut self) -> Type {
        self.intern(TypeKind::Metatype)
    }

    pub fn lit_int(&mut self) -> Type {
        self.intern(TypeKind::LitInt)
    }

    pub fn lit_float(&mut self) -> Type {
        self.intern(TypeKind::LitFloat)
    }

    pub fn undef_lit(&mut self) -> Type {
        self.intern(TypeKind::UndefLit)
    }

    pub fn null_lit(&mut self) -> Type {
        self.intern(TypeKind::NullLit)
    }

    pub fn pure_error(&mut self) -> Type {
        self.intern(TypeKind::PureError)
    }

    pub fn namespace(&mut self) -> Type {
        self.intern(TypeKind::Namespace)
    }

    pub fn int_type(&mut self, bits: u32, signed: bool) -> Type {
        self.intern(TypeKind::Int { bits, signed })
    }

    pub fn float_type(&mut self, bits: u32) -> Type {
        self.intern(TypeKind::Float { bits })
    }

    /// The platform size-index type used for array lengths and induction
    /// variables
    pub fn usize_type(&mut self) -> Type {
        self.int_type(POINTER_BITS, false)
    }

    pub fn isize_type(&mut self) -> Type {
        self.int_type(POINTER_BITS, true)
    }

    pub fn pointer_to(&mut self, child: Type, is_const: bool) -> Type {
        self.intern(TypeKind::Pointer { child, is_const })
    }

    pub fn array_of(&mut self, child: Type, len: usize) -> Type {
        self.intern(TypeKind::Array { child, len })
    }

    pub fn slice_of(&mut self, child: Type, is_const: bool) -> Type {
        self.intern(TypeKind::Slice { child, is_const })
    }

    pub fn maybe_of(&mut self, child: Type) -> Type {
        self.intern(TypeKind::Maybe(child))
    }

    pub fn error_union_of(&mut self, payload: Type) -> Type {
        let err = self.pure_error();
        self.intern(TypeKind::ErrorUnion { err, payload })
    }

    pub fn fn_type(&mut self, sig: FnSig) -> Type {
        self.intern(TypeKind::Fn(Rc::new(sig)))
    }

    /// Looks a name up in the primitive type table
    pub fn primitive(&self, name: InternedSymbol) -> Option<Type> {
        self.primitives.get(&name).cloned()
    }

    pub fn define_struct(&mut self, name: InternedSymbol, fields: Vec<StructField>) -> Type {
        let id = self.structs.push(StructData { name, fields });
        self.intern(TypeKind::Struct(id))
    }

    pub fn define_enum(
        &mut self,
        name: InternedSymbol,
        tag_type: Type,
        fields: Vec<EnumField>,
    ) -> Type {
        let id = self.enums.push(EnumData {
            name,
            tag_type,
            fields,
        });
        self.intern(TypeKind::Enum(id))
    }

    /// ABI size in bytes, with no padding model. `None` for types that have
    /// no runtime representation.
    pub fn size_of(&self, ty: &Type) -> Option<usize> {
        match ty.kind() {
            TypeKind::Void => Some(0),
            TypeKind::Bool => Some(1),
            TypeKind::Int { bits, .. } => Some(bits.div_ceil(8) as usize),
            TypeKind::Float { bits } => Some((bits / 8) as usize),
            TypeKind::Pointer { .. } | TypeKind::Fn(_) => Some((POINTER_BITS / 8) as usize),
            TypeKind::PureError => Some((POINTER_BITS / 8) as usize),
            TypeKind::Array { child, len } => Some(self.size_of(child)? * len),
            TypeKind::Slice { .. } => Some(2 * (POINTER_BITS / 8) as usize),
            TypeKind::Maybe(child) => Some(self.size_of(child)? + 1),
            TypeKind::ErrorUnion { payload, .. } => {
                Some(self.size_of(payload)? + (POINTER_BITS / 8) as usize)
            }
            TypeKind::Struct(id) => self.structs[*id]
                .fields
                .iter()
                .map(|f| self.size_of(&f.ty))
                .sum(),
            TypeKind::Enum(id) => {
                let data = &self.enums[*id];
                let tag = self.size_of(&data.tag_type)?;
                let payload = data
                    .fields
                    .iter()
                    .filter_map(|f| f.payload.as_ref())
                    .map(|ty| self.size_of(ty))
                    .try_fold(0usize, |max, size| size.map(|s| max.max(s)))?;
                Some(tag + payload)
            }
            TypeKind::Union(id) => self.unions[*id]
                .fields
                .iter()
                .map(|(_, ty)| self.size_of(ty))
                .try_fold(0usize, |max, size| size.map(|s| max.max(s))),
            TypeKind::Invalid
            | TypeKind::Unreachable
            | TypeKind::LitInt
            | TypeKind::LitFloat
            | TypeKind::Metatype
            | TypeKind::GenericFn
            | TypeKind::BoundFn { .. }
            | TypeKind::Namespace
            | TypeKind::Block
            | TypeKind::UndefLit
            | TypeKind::NullLit
            | TypeKind::TypeDecl => None,
        }
    }

    fn register_primitives(&mut self) {
        let named: &[(&str, TypeKind)] = &[
            ("void", TypeKind::Void),
            ("bool", TypeKind::Bool),
            ("unreachable", TypeKind::Unreachable),
            ("type", TypeKind::Metatype),
            ("error", TypeKind::PureError),
            ("f32", TypeKind::Float { bits: 32 }),
            ("f64", TypeKind::Float { bits: 64 }),
        ];

        for (name, kind) in named {
            let ty = self.intern(kind.clone());
            self.primitives.insert(InternedSymbol::new(name), ty);
        }

        for bits in [8u32, 16, 32, 64] {
            for signed in [false, true] {
                let prefix = if signed { 'i' } else { 'u' };
                let ty = self.int_type(bits, signed);
                self.primitives
                    .insert(InternedSymbol::new(&format!("{prefix}{bits}")), ty);
            }
        }

        let usize_ty = self.usize_type();
        self.primitives
            .insert(InternedSymbol::new("usize"), usize_ty);
        let isize_ty = self.isize_type();
        self.primitives
            .insert(InternedSymbol::new("isize"), isize_ty);
    }

    fn name_for(&self, kind: &TypeKind) -> String {
        match kind {
            TypeKind::Invalid => "(invalid)".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Unreachable => "unreachable".to_string(),
            TypeKind::Bool => "bool".to_string(),
            TypeKind::Int { bits, signed } => {
                format!("{}{bits}", if *signed { 'i' } else { 'u' })
            }
            TypeKind::Float { bits } => format!("f{bits}"),
            TypeKind::LitInt => "(integer literal)".to_string(),
            TypeKind::LitFloat => "(float literal)".to_string(),
            TypeKind::Metatype => "type".to_string(),
            TypeKind::Pointer { child, is_const } => {
                if *is_const {
                    format!("&const {}", child.name())
                } else {
                    format!("&{}", child.name())
                }
            }
            TypeKind::Array { child, len } => format!("[{len}]{}", child.name()),
            TypeKind::Slice { child, is_const } => {
                if *is_const {
                    format!("[]const {}", child.name())
                } else {
                    format!("[]{}", child.name())
                }
            }
            TypeKind::Struct(id) => self.structs[*id].name.value().to_string(),
            TypeKind::Enum(id) => self.enums[*id].name.value().to_string(),
            TypeKind::Union(id) => self.unions[*id].name.value().to_string(),
            TypeKind::Maybe(child) => format!("?{}", child.name()),
            TypeKind::ErrorUnion { payload, .. } => format!("%{}", payload.name()),
            TypeKind::PureError => "error".to_string(),
            TypeKind::Fn(sig) => {
                let params = sig.params.iter().map(|p| p.name()).join(", ");
                if *sig.ret.kind() == TypeKind::Void {
                    format!("fn({params})")
                } else {
                    format!("fn({params}) -> {}", sig.ret.name())
                }
            }
            TypeKind::GenericFn => "(generic fn)".to_string(),
            TypeKind::BoundFn { fn_ty } => format!("(bound {})", fn_ty.name()),
            TypeKind::Namespace => "(namespace)".to_string(),
            TypeKind::Block => "(block)".to_string(),
            TypeKind::UndefLit => "(undefined)".to_string(),
            TypeKind::NullLit => "(null)".to_string(),
            TypeKind::TypeDecl => "(type decl)".to_string(),
        }
    }
}
