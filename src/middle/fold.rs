//! Compile-time evaluation of individual operations on static values.
//! Arithmetic goes through the big-number payload exactly, then the result
//! is checked against the result type's width; wrapping variants truncate
//! instead. The analyzer translates every `FoldError` into a diagnostic at
//! the requesting source location.

use crate::{
    frontend::ast::BinOpKind,
    middle::{
        bignum::{BigNum, BigNumError},
        ir::UnOpKind,
        ty::{Type, TypeKind},
        value::{const_values_equal, Value},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldError {
    DivisionByZero,
    /// The exact result does not fit the result type
    Overflow,
    ShiftOutOfRange,
    /// The operands cannot be folded by this operation
    Incompatible,
}

fn int_info(ty: &Type) -> Option<(u32, bool)> {
    match ty.kind() {
        TypeKind::Int { bits, signed } => Some((*bits, *signed)),
        _ => None,
    }
}

fn num_result(
    num: BigNum,
    result_ty: &Type,
    wrapping: bool,
    depends: bool,
) -> Result<Value, FoldError> {
    let value = match int_info(result_ty) {
        Some((bits, signed)) => {
            if wrapping {
                num.wrapped_to_bits(bits, signed)
            } else if num.fits_in_bits(bits, signed) {
                num
            } else {
                return Err(FoldError::Overflow);
            }
        }
        // literal and float results stay exact
        None => num,
    };

    Ok(Value::from_num(value).with_dependency(depends))
}

fn map_err(err: BigNumError) -> FoldError {
    match err {
        BigNumError::DivisionByZero => FoldError::DivisionByZero,
        BigNumError::ShiftOutOfRange => FoldError::ShiftOutOfRange,
        BigNumError::IncompatibleOperands => FoldError::Incompatible,
    }
}

/// Folds a binary operation over two static operands. `result_ty` is the
/// already peer-resolved operand type and decides fit checks and wrapping
/// widths.
pub fn fold_bin_op(
    op: BinOpKind,
    lhs: &Value,
    rhs: &Value,
    result_ty: &Type,
) -> Result<Value, FoldError> {
    let depends = lhs.depends_on_compile_var || rhs.depends_on_compile_var;

    match op {
        BinOpKind::BoolAnd | BinOpKind::BoolOr => {
            let (Some(a), Some(b)) = (lhs.as_bool(), rhs.as_bool()) else {
                return Err(FoldError::Incompatible);
            };
            let result = if op == BinOpKind::BoolAnd { a && b } else { a || b };
            Ok(Value::from_bool(result).with_dependency(depends))
        }

        BinOpKind::CmpEq | BinOpKind::CmpNeq => {
            let equal = match (lhs.as_num(), rhs.as_num()) {
                // numerics compare by magnitude
                (Some(a), Some(b)) => a.compare(b).is_eq(),
                // everything else structurally
                _ => const_values_equal(lhs, rhs),
            };
            let result = if op == BinOpKind::CmpEq { equal } else { !equal };
            Ok(Value::from_bool(result).with_dependency(depends))
        }

        BinOpKind::CmpLt | BinOpKind::CmpGt | BinOpKind::CmpLte | BinOpKind::CmpGte => {
            let (Some(a), Some(b)) = (lhs.as_num(), rhs.as_num()) else {
                return Err(FoldError::Incompatible);
            };
            let ordering = a.compare(b);
            let result = match op {
                BinOpKind::CmpLt => ordering.is_lt(),
                BinOpKind::CmpGt => ordering.is_gt(),
                BinOpKind::CmpLte => ordering.is_le(),
                BinOpKind::CmpGte => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::from_bool(result).with_dependency(depends))
        }

        BinOpKind::Add
        | BinOpKind::AddWrap
        | BinOpKind::Sub
        | BinOpKind::SubWrap
        | BinOpKind::Mul
        | BinOpKind::MulWrap
        | BinOpKind::Div
        | BinOpKind::Mod
        | BinOpKind::Shl
        | BinOpKind::ShlWrap
        | BinOpKind::Shr
        | BinOpKind::BitAnd
        | BinOpKind::BitOr
        | BinOpKind::BitXor => {
            let (Some(a), Some(b)) = (lhs.as_num(), rhs.as_num()) else {
                return Err(FoldError::Incompatible);
            };

            if matches!(op, BinOpKind::Shl | BinOpKind::ShlWrap | BinOpKind::Shr) {
                if let Some((bits, _)) = int_info(result_ty) {
                    let in_range = b.to_u64().is_some_and(|amount| amount < bits as u64);
                    if !in_range {
                        return Err(FoldError::ShiftOutOfRange);
                    }
                }
            }

            let exact = match op {
                BinOpKind::Add | BinOpKind::AddWrap => a.add(b),
                BinOpKind::Sub | BinOpKind::SubWrap => a.sub(b),
                BinOpKind::Mul | BinOpKind::MulWrap => a.mul(b),
                BinOpKind::Div => a.div(b),
                BinOpKind::Mod => a.rem(b),
                BinOpKind::Shl | BinOpKind::ShlWrap => a.shl(b),
                BinOpKind::Shr => a.shr(b),
                BinOpKind::BitAnd => a.bit_and(b),
                BinOpKind::BitOr => a.bit_or(b),
                BinOpKind::BitXor => a.bit_xor(b),
                _ => unreachable!(),
            }
            .map_err(map_err)?;

            num_result(exact, result_ty, op.is_wrapping(), depends)
        }

        // no folding semantics yet; the analyzer reports these
        BinOpKind::ArrayCat | BinOpKind::ArrayMult | BinOpKind::UnwrapOr => {
            Err(FoldError::Incompatible)
        }
    }
}

/// Folds a unary operation over one static operand.
pub fn fold_un_op(op: UnOpKind, operand: &Value, result_ty: &Type) -> Result<Value, FoldError> {
    let depends = operand.depends_on_compile_var;

    match op {
        UnOpKind::BoolNot => {
            let Some(b) = operand.as_bool() else {
                return Err(FoldError::Incompatible);
            };
            Ok(Value::from_bool(!b).with_dependency(depends))
        }
        UnOpKind::Negate | UnOpKind::NegateWrap => {
            let Some(num) = operand.as_num() else {
                return Err(FoldError::Incompatible);
            };
            num_result(
                num.negate(),
                result_ty,
                op == UnOpKind::NegateWrap,
                depends,
            )
        }
        UnOpKind::BitNot => {
            let Some(num) = operand.as_num() else {
                return Err(FoldError::Incompatible);
            };
            let Some((bits, signed)) = int_info(result_ty) else {
                return Err(FoldError::Incompatible);
            };
            let flipped = num.bit_not_in_width(bits, signed).map_err(map_err)?;
            Ok(Value::from_num(flipped).with_dependency(depends))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ty::TypeContext;

    #[test]
    fn addition_checks_the_result_width() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let ok = fold_bin_op(
            BinOpKind::Add,
            &Value::from_u64(100),
            &Value::from_u64(100),
            &u8_ty,
        )
        .unwrap();
        assert_eq!(ok.as_num().unwrap().to_u64(), Some(200));

        let err = fold_bin_op(
            BinOpKind::Add,
            &Value::from_u64(200),
            &Value::from_u64(100),
            &u8_ty,
        )
        .unwrap_err();
        assert_eq!(err, FoldError::Overflow);
    }

    #[test]
    fn wrapping_add_truncates() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let wrapped = fold_bin_op(
            BinOpKind::AddWrap,
            &Value::from_u64(200),
            &Value::from_u64(100),
            &u8_ty,
        )
        .unwrap();
        assert_eq!(wrapped.as_num().unwrap().to_u64(), Some(44));
    }

    #[test]
    fn division_by_zero_is_a_fold_error() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let err = fold_bin_op(
            BinOpKind::Div,
            &Value::from_u64(1),
            &Value::from_u64(0),
            &u8_ty,
        )
        .unwrap_err();
        assert_eq!(err, FoldError::DivisionByZero);
    }

    #[test]
    fn shift_amount_must_be_in_range() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let err = fold_bin_op(
            BinOpKind::Shl,
            &Value::from_u64(1),
            &Value::from_u64(8),
            &u8_ty,
        )
        .unwrap_err();
        assert_eq!(err, FoldError::ShiftOutOfRange);

        let ok = fold_bin_op(
            BinOpKind::Shl,
            &Value::from_u64(1),
            &Value::from_u64(7),
            &u8_ty,
        )
        .unwrap();
        assert_eq!(ok.as_num().unwrap().to_u64(), Some(128));
    }

    #[test]
    fn comparisons_fold_to_bools() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let lt = fold_bin_op(
            BinOpKind::CmpLt,
            &Value::from_u64(3),
            &Value::from_u64(4),
            &u8_ty,
        )
        .unwrap();
        assert_eq!(lt.as_bool(), Some(true));
    }

    #[test]
    fn compile_var_dependency_propagates() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);

        let tainted = Value::from_u64(1).with_dependency(true);
        let sum = fold_bin_op(BinOpKind::Add, &tainted, &Value::from_u64(2), &u8_ty).unwrap();
        assert!(sum.depends_on_compile_var);
    }

    #[test]
    fn negation_of_unsigned_overflows() {
        let mut types = TypeContext::new();
        let u8_ty = types.int_type(8, false);
        let i8_ty = types.int_type(8, true);

        let err = fold_un_op(UnOpKind::Negate, &Value::from_u64(1), &u8_ty).unwrap_err();
        assert_eq!(err, FoldError::Overflow);

        let ok = fold_un_op(UnOpKind::Negate, &Value::from_u64(1), &i8_ty).unwrap();
        assert!(ok.as_num().unwrap().is_negative());
    }
}
