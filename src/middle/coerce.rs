//! The coercion engine: implicit cast acceptance, explicit cast
//! classification, and peer-type resolution. Everything here only *decides*;
//! the analyzer executes the decision by folding a static value or emitting
//! a runtime cast instruction.

use crate::middle::{
    bignum::BigNum,
    ir::CastOp,
    ty::{types_equal_modulo_const, Type, TypeContext, TypeKind, POINTER_BITS},
    value::Value,
};

/// Outcome of asking whether `actual` implicitly coerces to `expected`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImplicitCast {
    Yes(CastOp),
    No,
    /// One of the types is already invalid; the error was reported where it
    /// happened
    ReportedError,
}

/// Implicit coercion rules, evaluated in order. `value` participates only in
/// literal fitting.
pub fn implicit_cast_kind(
    actual: &Type,
    expected: &Type,
    value: Option<&Value>,
) -> ImplicitCast {
    if actual.is_invalid() || expected.is_invalid() {
        return ImplicitCast::ReportedError;
    }

    // 1. exact structural match modulo pointer const
    if types_equal_modulo_const(actual, expected) {
        return ImplicitCast::Yes(CastOp::Noop);
    }

    // 2. non-maybe into maybe; null literal into maybe
    if let TypeKind::Maybe(child) = expected.kind() {
        if matches!(actual.kind(), TypeKind::NullLit) {
            return ImplicitCast::Yes(CastOp::NullToMaybe);
        }
        if !matches!(actual.kind(), TypeKind::Maybe(_)) {
            if let ImplicitCast::Yes(_) = implicit_cast_kind(actual, child, value) {
                return ImplicitCast::Yes(CastOp::MaybeWrap);
            }
        }
    }

    // 3. child type into error union; pure error into error union
    if let TypeKind::ErrorUnion { payload, .. } = expected.kind() {
        if matches!(actual.kind(), TypeKind::PureError) {
            return ImplicitCast::Yes(CastOp::PureErrWrap);
        }
        if !matches!(actual.kind(), TypeKind::ErrorUnion { .. }) {
            if let ImplicitCast::Yes(_) = implicit_cast_kind(actual, payload, value) {
                return ImplicitCast::Yes(CastOp::ErrWrap);
            }
        }
    }

    match (actual.kind(), expected.kind()) {
        // 4. widening int-to-int with the same signedness
        (
            TypeKind::Int {
                bits: a_bits,
                signed: a_signed,
            },
            TypeKind::Int {
                bits: e_bits,
                signed: e_signed,
            },
        ) if a_signed == e_signed && e_bits >= a_bits => ImplicitCast::Yes(CastOp::IntWiden),

        // 5. unsigned into strictly wider signed
        (
            TypeKind::Int {
                bits: a_bits,
                signed: false,
            },
            TypeKind::Int {
                bits: e_bits,
                signed: true,
            },
        ) if e_bits > a_bits => ImplicitCast::Yes(CastOp::IntWiden),

        // 6. widening float-to-float
        (TypeKind::Float { bits: a_bits }, TypeKind::Float { bits: e_bits })
            if e_bits >= a_bits =>
        {
            ImplicitCast::Yes(CastOp::FloatWiden)
        }

        // 7. array into slice when the element types match modulo const
        (
            TypeKind::Array { child: a_child, .. },
            TypeKind::Slice { child: e_child, .. },
        ) if types_equal_modulo_const(a_child, e_child) => {
            ImplicitCast::Yes(CastOp::ArrayToSlice)
        }

        // 8. literal numerics into any sized type that represents the value
        //    exactly
        (TypeKind::LitInt, TypeKind::Int { bits, signed }) => match value.and_then(Value::as_num)
        {
            Some(num) if num.fits_in_bits(*bits, *signed) => ImplicitCast::Yes(CastOp::Noop),
            _ => ImplicitCast::No,
        },
        (TypeKind::LitInt, TypeKind::Float { .. }) => ImplicitCast::Yes(CastOp::IntToFloat),
        (TypeKind::LitFloat, TypeKind::Float { .. }) => ImplicitCast::Yes(CastOp::Noop),

        // 9. undefined into anything
        (TypeKind::UndefLit, _) => ImplicitCast::Yes(CastOp::Undef),

        _ => ImplicitCast::No,
    }
}

/// Explicit cast classification. Everything the implicit rules accept is
/// also an explicit cast; the extra conversions here must be spelled out in
/// the source.
pub fn classify_cast(
    types: &TypeContext,
    actual: &Type,
    wanted: &Type,
    value: Option<&Value>,
) -> Option<CastOp> {
    if let ImplicitCast::Yes(op) = implicit_cast_kind(actual, wanted, value) {
        return Some(op);
    }

    match (actual.kind(), wanted.kind()) {
        (TypeKind::Bool, TypeKind::Int { .. }) => Some(CastOp::BoolToInt),
        (TypeKind::Int { .. }, TypeKind::Bool) => Some(CastOp::IntToBool),

        // pointer <-> the platform size integer
        (TypeKind::Pointer { .. }, TypeKind::Int { bits, signed: false })
            if *bits == POINTER_BITS =>
        {
            Some(CastOp::PtrToInt)
        }
        (TypeKind::Int { bits, signed: false }, TypeKind::Pointer { .. })
            if *bits == POINTER_BITS =>
        {
            Some(CastOp::IntToPtr)
        }

        // any int width/signedness change
        (
            TypeKind::Int {
                bits: a_bits,
                signed: a_signed,
            },
            TypeKind::Int {
                bits: w_bits,
                signed: w_signed,
            },
        ) => {
            if w_bits >= a_bits && a_signed == w_signed {
                Some(CastOp::IntWiden)
            } else {
                Some(CastOp::IntTruncate)
            }
        }
        (TypeKind::LitInt, TypeKind::Int { .. }) => Some(CastOp::IntTruncate),

        (TypeKind::Float { bits: a_bits }, TypeKind::Float { bits: w_bits }) => {
            if w_bits >= a_bits {
                Some(CastOp::FloatWiden)
            } else {
                Some(CastOp::FloatTruncate)
            }
        }

        (TypeKind::Int { .. } | TypeKind::LitInt, TypeKind::Float { .. }) => {
            Some(CastOp::IntToFloat)
        }
        (TypeKind::Float { .. } | TypeKind::LitFloat, TypeKind::Int { .. }) => {
            Some(CastOp::FloatToInt)
        }

        // slice element reinterpretation through u8
        (
            TypeKind::Slice { child: a_child, .. },
            TypeKind::Slice { child: w_child, .. },
        ) if is_u8(a_child) || is_u8(w_child) => Some(CastOp::SliceReinterpret),

        // [N]u8 -> []T when N divides evenly by @sizeOf(T)
        (TypeKind::Array { child: a_child, len }, TypeKind::Slice { child: w_child, .. })
            if is_u8(a_child) =>
        {
            let elem_size = types.size_of(w_child)?;
            (elem_size > 0 && len % elem_size == 0).then_some(CastOp::BytesToSlice)
        }

        (TypeKind::Pointer { .. }, TypeKind::Pointer { .. }) => {
            Some(CastOp::PointerReinterpret)
        }
        (TypeKind::Maybe(a_child), TypeKind::Maybe(w_child))
            if matches!(a_child.kind(), TypeKind::Pointer { .. })
                && matches!(w_child.kind(), TypeKind::Pointer { .. }) =>
        {
            Some(CastOp::PointerReinterpret)
        }

        // payload-free enums cast to and from their tag's int
        (TypeKind::Enum(id), TypeKind::Int { .. }) if types.enums[*id].is_payload_free() => {
            Some(CastOp::EnumToInt)
        }
        (TypeKind::Int { .. }, TypeKind::Enum(id)) if types.enums[*id].is_payload_free() => {
            Some(CastOp::IntToEnum)
        }

        // a bare error code into an int wide enough for the whole set
        (TypeKind::PureError, TypeKind::Int { .. }) => Some(CastOp::ErrToInt),

        _ => None,
    }
}

fn is_u8(ty: &Type) -> bool {
    matches!(
        ty.kind(),
        TypeKind::Int {
            bits: 8,
            signed: false
        }
    )
}

/// One operand position in a peer-type resolution: its type and, when it is
/// a numeric literal, the literal's exact value for fit checking.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub ty: Type,
    pub num: Option<BigNum>,
}

impl PeerEntry {
    pub fn typed(ty: Type) -> Self {
        Self { ty, num: None }
    }
}

#[derive(Debug)]
pub enum PeerResult {
    Ok(Type),
    /// Indices of the two operands that refused to unify
    Incompatible(usize, usize),
}

/// Chooses a common type for a list of sibling expressions: if/phi joins,
/// arithmetic operands, switch results. Maintains a running best type;
/// `unreachable` is absorbed, numeric literals are accepted only where they
/// fit, error unions win over their child type.
pub fn resolve_peer_types(types: &mut TypeContext, entries: &[PeerEntry]) -> PeerResult {
    let mut best: Option<(usize, Type)> = None;

    for (i, entry) in entries.iter().enumerate() {
        let ty = &entry.ty;

        if ty.is_invalid() {
            return PeerResult::Ok(types.invalid());
        }
        if ty.is_unreachable() {
            continue;
        }

        let Some((best_index, best_ty)) = best.clone() else {
            best = Some((i, ty.clone()));
            continue;
        };

        match unify_pair(types, &best_ty, ty, entries, best_index, i) {
            Some(unified) => best = Some((i, unified)),
            None => return PeerResult::Incompatible(best_index, i),
        }
    }

    match best {
        Some((_, ty)) => PeerResult::Ok(ty),
        // every operand was unreachable
        None => PeerResult::Ok(types.unreachable()),
    }
}

fn unify_pair(
    types: &mut TypeContext,
    best: &Type,
    next: &Type,
    entries: &[PeerEntry],
    best_index: usize,
    next_index: usize,
) -> Option<Type> {
    if types_equal_modulo_const(best, next) {
        return Some(best.clone());
    }

    match (best.kind(), next.kind()) {
        // promote to the wider integer of matching signedness
        (
            TypeKind::Int {
                bits: a_bits,
                signed: a_signed,
            },
            TypeKind::Int {
                bits: b_bits,
                signed: b_signed,
            },
        ) => {
            if a_signed == b_signed {
                let bits = (*a_bits).max(*b_bits);
                Some(types.int_type(bits, *a_signed))
            } else {
                // mixed signedness resolves to the signed type only when it
                // is strictly wider
                let (signed_bits, unsigned_bits) =
                    if *a_signed { (*a_bits, *b_bits) } else { (*b_bits, *a_bits) };
                (signed_bits > unsigned_bits).then(|| types.int_type(signed_bits, true))
            }
        }

        (TypeKind::Float { bits: a_bits }, TypeKind::Float { bits: b_bits }) => {
            Some(types.float_type((*a_bits).max(*b_bits)))
        }

        // numeric literals are accepted where they fit
        (TypeKind::LitInt, TypeKind::LitInt) => Some(best.clone()),
        (TypeKind::LitFloat, TypeKind::LitFloat) => Some(best.clone()),
        (TypeKind::LitInt, TypeKind::LitFloat) | (TypeKind::LitFloat, TypeKind::LitInt) => {
            Some(types.lit_float())
        }
        (TypeKind::LitInt, TypeKind::Int { bits, signed }) => {
            literal_fits(entries, best_index, *bits, *signed).then(|| next.clone())
        }
        (TypeKind::Int { bits, signed }, TypeKind::LitInt) => {
            literal_fits(entries, next_index, *bits, *signed).then(|| best.clone())
        }
        (TypeKind::LitInt | TypeKind::LitFloat, TypeKind::Float { .. }) => Some(next.clone()),
        (TypeKind::Float { .. }, TypeKind::LitInt | TypeKind::LitFloat) => Some(best.clone()),

        // error union vs its child resolves in favor of the union
        (TypeKind::ErrorUnion { payload, .. }, _) if types_equal_modulo_const(payload, next) => {
            Some(best.clone())
        }
        (_, TypeKind::ErrorUnion { payload, .. }) if types_equal_modulo_const(payload, best) => {
            Some(next.clone())
        }
        (TypeKind::ErrorUnion { .. }, TypeKind::PureError) => Some(best.clone()),
        (TypeKind::PureError, TypeKind::ErrorUnion { .. }) => Some(next.clone()),
        (_, TypeKind::PureError) => {
            let payload = best.clone();
            Some(types.error_union_of(payload))
        }
        (TypeKind::PureError, _) => {
            let payload = next.clone();
            Some(types.error_union_of(payload))
        }

        _ => None,
    }
}

fn literal_fits(entries: &[PeerEntry], index: usize, bits: u32, signed: bool) -> bool {
    entries[index]
        .num
        .as_ref()
        .is_some_and(|num| num.fits_in_bits(bits, signed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u8_ty(types: &mut TypeContext) -> Type {
        types.int_type(8, false)
    }

    #[test]
    fn exact_match_is_rule_one() {
        let mut types = TypeContext::new();
        let a = u8_ty(&mut types);
        let b = u8_ty(&mut types);
        assert_eq!(
            implicit_cast_kind(&a, &b, None),
            ImplicitCast::Yes(CastOp::Noop)
        );
    }

    #[test]
    fn pointer_const_is_ignored_by_matching() {
        let mut types = TypeContext::new();
        let u8_ty = u8_ty(&mut types);
        let mut_ptr = types.pointer_to(u8_ty.clone(), false);
        let const_ptr = types.pointer_to(u8_ty, true);
        assert_eq!(
            implicit_cast_kind(&mut_ptr, &const_ptr, None),
            ImplicitCast::Yes(CastOp::Noop)
        );
    }

    #[test]
    fn widening_is_one_directional() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);
        let u32_ty = types.int_type(32, false);

        assert_eq!(
            implicit_cast_kind(&u8_ty, &u32_ty, None),
            ImplicitCast::Yes(CastOp::IntWiden)
        );
        assert_eq!(implicit_cast_kind(&u32_ty, &u8_ty, None), ImplicitCast::No);
    }

    #[test]
    fn unsigned_into_strictly_wider_signed() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);
        let i8_ty = types.int_type(8, true);
        let i16_ty = types.int_type(16, true);

        assert_eq!(
            implicit_cast_kind(&u8_ty, &i16_ty, None),
            ImplicitCast::Yes(CastOp::IntWiden)
        );
        assert_eq!(implicit_cast_kind(&u8_ty, &i8_ty, None), ImplicitCast::No);
    }

    #[test]
    fn null_and_values_into_maybe() {
        let mut types = TypeContext::new();
        let u32_ty = types.int_type(32, false);
        let maybe_u32 = types.maybe_of(u32_ty.clone());
        let null_ty = types.null_lit();

        assert_eq!(
            implicit_cast_kind(&null_ty, &maybe_u32, None),
            ImplicitCast::Yes(CastOp::NullToMaybe)
        );
        assert_eq!(
            implicit_cast_kind(&u32_ty, &maybe_u32, None),
            ImplicitCast::Yes(CastOp::MaybeWrap)
        );
    }

    #[test]
    fn literal_fit_depends_on_value() {
        let mut types = TypeContext::new();
        let lit = types.lit_int();
        let u8_ty = types.int_type(8, false);

        let fits = Value::from_u64(255);
        let too_big = Value::from_u64(300);

        assert_eq!(
            implicit_cast_kind(&lit, &u8_ty, Some(&fits)),
            ImplicitCast::Yes(CastOp::Noop)
        );
        assert_eq!(implicit_cast_kind(&lit, &u8_ty, Some(&too_big)), ImplicitCast::No);
    }

    #[test]
    fn array_coerces_to_slice() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);
        let array = types.array_of(u8_ty.clone(), 4);
        let slice = types.slice_of(u8_ty, true);

        assert_eq!(
            implicit_cast_kind(&array, &slice, None),
            ImplicitCast::Yes(CastOp::ArrayToSlice)
        );
    }

    #[test]
    fn explicit_casts_reach_beyond_implicit() {
        let mut types = TypeContext::new();
        let bool_ty = types.bool();
        let u8_ty = types.int_type(8, false);
        let u32_ty = types.int_type(32, false);
        let usize_ty = types.usize_type();
        let ptr = types.pointer_to(u8_ty.clone(), false);

        assert_eq!(
            classify_cast(&types, &bool_ty, &u8_ty, None),
            Some(CastOp::BoolToInt)
        );
        assert_eq!(
            classify_cast(&types, &u32_ty, &u8_ty, None),
            Some(CastOp::IntTruncate)
        );
        assert_eq!(
            classify_cast(&types, &ptr, &usize_ty, None),
            Some(CastOp::PtrToInt)
        );
        assert_eq!(classify_cast(&types, &bool_ty, &ptr, None), None);
    }

    #[test]
    fn peer_resolution_widens_and_absorbs_unreachable() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);
        let u32_ty = types.int_type(32, false);
        let unreachable_ty = types.unreachable();

        let entries = [
            PeerEntry::typed(u8_ty),
            PeerEntry::typed(unreachable_ty),
            PeerEntry::typed(u32_ty.clone()),
        ];

        match resolve_peer_types(&mut types, &entries) {
            PeerResult::Ok(ty) => assert_eq!(ty, u32_ty),
            PeerResult::Incompatible(a, b) => panic!("unexpected incompatibility {a}/{b}"),
        }
    }

    #[test]
    fn peer_resolution_rejects_fundamentally_different_types() {
        let mut types = TypeContext::new();
        let bool_ty = types.bool();
        let u8_ty = types.int_type(8, false);

        let entries = [PeerEntry::typed(bool_ty), PeerEntry::typed(u8_ty)];
        assert!(matches!(
            resolve_peer_types(&mut types, &entries),
            PeerResult::Incompatible(0, 1)
        ));
    }
}
