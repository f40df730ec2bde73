//! Property tests over the coercion engine, the big-number payload, and the
//! abstract interpreter's termination bound.

mod common;

use cinder::{
    frontend::ast::BinOpKind,
    middle::{
        analyze::{analyze_executable, analyze_expr},
        bignum::BigNum,
        coerce::{resolve_peer_types, PeerEntry, PeerResult},
        ir::build::build_executable,
        ty::{Type, TypeContext},
    },
};
use common::*;
use proptest::prelude::*;

/// The non-literal types peer resolution is exercised over
fn type_pool(types: &mut TypeContext) -> Vec<Type> {
    vec![
        types.int_type(8, false),
        types.int_type(16, false),
        types.int_type(32, false),
        types.int_type(64, false),
        types.int_type(8, true),
        types.int_type(16, true),
        types.int_type(32, true),
        types.int_type(64, true),
        types.float_type(32),
        types.float_type(64),
        types.bool(),
        types.void(),
        types.unreachable(),
    ]
}

fn outcome(types: &mut TypeContext, picks: &[usize]) -> Result<Type, ()> {
    let pool = type_pool(types);
    let entries: Vec<PeerEntry> = picks
        .iter()
        .map(|i| PeerEntry::typed(pool[i % pool.len()].clone()))
        .collect();
    match resolve_peer_types(types, &entries) {
        PeerResult::Ok(ty) => Ok(ty),
        PeerResult::Incompatible(_, _) => Err(()),
    }
}

proptest! {
    // peer resolution of a literal-free set is order independent
    #[test]
    fn peer_resolution_is_permutation_invariant(picks in prop::collection::vec(0usize..13, 1..6)) {
        let mut types = TypeContext::new();
        let forward = outcome(&mut types, &picks);

        let mut reversed = picks.clone();
        reversed.reverse();
        let backward = outcome(&mut types, &reversed);

        prop_assert_eq!(forward.is_ok(), backward.is_ok());
        if let (Ok(a), Ok(b)) = (forward, backward) {
            prop_assert_eq!(a, b);
        }
    }

    // unsigned fit checking matches the arithmetic definition
    #[test]
    fn unsigned_fit_check_is_exact(value in any::<u64>(), bits in 1u32..64) {
        let num = BigNum::from_u64(value);
        let fits = num.fits_in_bits(bits, false);
        prop_assert_eq!(fits, value < (1u64 << bits));
    }

    // wrapping truncation always lands inside the target width
    #[test]
    fn wrapped_values_always_fit(value in any::<i64>(), bits in 1u32..64, signed in any::<bool>()) {
        let wrapped = BigNum::from_i64(value).wrapped_to_bits(bits, signed);
        prop_assert!(wrapped.fits_in_bits(bits, signed));
    }

    // widening a static value preserves the numeric payload exactly
    #[test]
    fn widening_round_trips_the_payload(value in any::<u8>()) {
        let mut unit = unit();
        let root = block(vec![
            decl("x", true, Some(sym("u8")), int(value as u64)),
            decl("y", true, Some(sym("u32")), sym("x")),
            sym("y"),
        ]);

        let analyzed = analyze_expr(&mut unit, &root, false, None);

        prop_assert!(!unit.sink.has_errors());
        prop_assert_eq!(
            analyzed.value.as_num().and_then(|n| n.to_u64()),
            Some(value as u64)
        );
    }

    // a non-terminating inline loop stops after exactly quota + 1
    // back-edges with the quota error
    #[test]
    fn backward_branch_quota_is_honored(quota in 1usize..40) {
        let mut unit = unit();
        let root = while_(boolean(true), block(vec![]));

        let mut old = build_executable(&mut unit, &root, true);
        old.backward_branch_quota = quota;
        let analyzed = analyze_executable(&mut unit, old, None);

        let expected_msg = format!("evaluation exceeded {} backwards branches", quota);
        prop_assert!(unit.sink.contains(&expected_msg));
        prop_assert_eq!(analyzed.exec.backward_branch_count, quota + 1);
    }

    // static arithmetic over sized operands folds to the model result
    #[test]
    fn static_sums_match_the_model(values in prop::collection::vec(0u64..1000, 1..5)) {
        let mut unit = unit();

        let mut expr = cast("u32", int(values[0]));
        for v in &values[1..] {
            expr = binop(BinOpKind::Add, expr, cast("u32", int(*v)));
        }

        let analyzed = analyze_expr(&mut unit, &expr, false, None);

        prop_assert!(!unit.sink.has_errors());
        let expected: u64 = values.iter().sum();
        prop_assert_eq!(
            analyzed.value.as_num().and_then(|n| n.to_u64()),
            Some(expected)
        );

        // type totality: nothing reachable is left untyped
        for inst in analyzed.exec.insts.iter() {
            prop_assert!(!inst.ty.is_invalid());
        }
    }
}
