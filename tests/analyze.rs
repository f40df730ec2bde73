//! End-to-end middle-end scenarios: build a small AST by hand, run IR
//! construction plus analysis, and assert on the diagnostics or on the
//! verified instruction stream.

mod common;

use cinder::{
    frontend::ast::{BinOpKind, DeferKind, PrefixOpKind},
    middle::analyze::analyze_expr,
};
use common::*;

#[test]
fn integer_literal_must_fit_declared_type() {
    let mut unit = unit();
    let root = block(vec![decl("x", true, Some(sym("u8")), int(300))]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit
        .sink
        .contains("integer value 300 cannot be implicitly casted to type 'u8'"));
}

#[test]
fn runtime_if_join_of_bare_literals_cannot_infer() {
    let mut unit = unit();
    let bool_ty = unit.types.bool();
    register_runtime_fn(&mut unit, "cond", bool_ty);

    let root = if_(call(sym("cond"), vec![]), int(1), int(2));
    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("unable to infer expression type"));
}

#[test]
fn runtime_if_join_of_typed_operands_resolves() {
    let mut unit = unit();
    let bool_ty = unit.types.bool();
    register_runtime_fn(&mut unit, "cond", bool_ty);

    let root = if_(
        call(sym("cond"), vec![]),
        cast("u32", int(1)),
        cast("u32", int(2)),
    );
    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    let u32_ty = unit.types.int_type(32, false);
    assert_eq!(analyzed.return_type, u32_ty);
    assert!(mnemonics(&analyzed.exec).contains(&"phi"));
}

#[test]
fn inline_while_true_hits_the_backward_branch_quota() {
    let mut unit = unit();
    let root = while_(boolean(true), block(vec![]));

    analyze_expr(&mut unit, &root, true, None);

    assert!(unit
        .sink
        .contains("evaluation exceeded 1000 backwards branches"));
}

#[test]
fn compile_time_index_out_of_bounds() {
    let mut unit = unit();
    let root = block(vec![
        decl(
            "a",
            true,
            None,
            array_init(array_ty(3, sym("u8")), vec![int(1), int(2), int(3)]),
        ),
        decl("b", true, None, index(sym("a"), int(5))),
    ]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("index 5 outside array of size 3"));
}

#[test]
fn static_maybe_unwrap_folds_away() {
    let mut unit = unit();
    let root = block(vec![
        decl("m", true, Some(maybe_ty(sym("u32"))), int(7)),
        prefix(PrefixOpKind::UnwrapMaybe, sym("m")),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"unwrap_maybe"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(7));

    let u32_ty = unit.types.int_type(32, false);
    assert_eq!(analyzed.return_type, u32_ty);
}

#[test]
fn static_switch_range_folds_to_one_prong() {
    let mut unit = unit();
    let root = block(vec![
        decl("v", true, None, int(15)),
        switch(
            sym("v"),
            vec![prong_range(10, 20, int(1)), prong_else(int(2))],
        ),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"switch_br"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(1));
}

#[test]
fn static_switch_item_folds_to_matching_prong() {
    let mut unit = unit();
    let root = block(vec![
        decl("v", true, None, int(2)),
        switch(
            sym("v"),
            vec![
                prong_items(vec![int(1)], int(10)),
                prong_items(vec![int(2)], int(20)),
                prong_else(int(30)),
            ],
        ),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"switch_br"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(20));
}

#[test]
fn multiple_else_prongs_are_rejected() {
    let mut unit = unit();
    let root = block(vec![
        decl("v", true, None, int(0)),
        switch(sym("v"), vec![prong_else(int(1)), prong_else(int(2))]),
    ]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("multiple else prongs"));
}

#[test]
fn forward_goto_resolves_to_label() {
    let mut unit = unit();
    let root = block(vec![goto("out"), int(1), label("out"), int(2)]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(mnemonics(&analyzed.exec).contains(&"br"));
    assert_eq!(analyzed.return_type, unit.types.lit_int());
}

#[test]
fn goto_without_label_is_an_error() {
    let mut unit = unit();
    let root = block(vec![goto("nowhere"), int(1)]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("no label in scope named 'nowhere'"));
}

#[test]
fn unused_label_is_an_error() {
    let mut unit = unit();
    let root = block(vec![label("dead"), int(1)]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("label 'dead' defined but not used"));
}

#[test]
fn duplicate_label_is_an_error() {
    let mut unit = unit();
    let root = block(vec![label("l"), goto("l"), label("l")]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("duplicate label 'l'"));
}

#[test]
fn break_outside_loop_is_an_error() {
    let mut unit = unit();
    let root = block(vec![cinder::frontend::ast::Expr::new(
        cinder::Span::ZERO,
        cinder::frontend::ast::ExprKind::Break,
    )]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("'break' expression outside loop"));
}

#[test]
fn defers_run_before_return() {
    let mut unit = unit();
    let root = block(vec![
        decl("a", false, Some(sym("u8")), int(0)),
        defer_(DeferKind::Unconditional, assign(sym("a"), int(1))),
        ret(int(2)),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    let stream = mnemonics(&analyzed.exec);
    let store = stream.iter().position(|m| *m == "store_ptr");
    let ret_at = stream.iter().position(|m| *m == "return");
    assert!(store.is_some() && ret_at.is_some());
    assert!(store.unwrap() < ret_at.unwrap());
}

#[test]
fn error_only_defers_do_not_run_on_normal_return() {
    let mut unit = unit();
    let root = block(vec![
        decl("a", false, Some(sym("u8")), int(0)),
        defer_(DeferKind::Error, assign(sym("a"), int(1))),
        ret(int(2)),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"store_ptr"));
}

#[test]
fn dead_pure_instructions_are_pruned() {
    let mut unit = unit();
    let root = block(vec![binop(BinOpKind::Add, int(1), int(2)), int(5)]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"bin_op"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(5));
}

#[test]
fn static_arithmetic_folds_with_overflow_check() {
    let mut unit = unit();
    let ok = block(vec![decl(
        "x",
        true,
        Some(sym("u8")),
        binop(BinOpKind::Add, int(100), int(100)),
    )]);
    analyze_expr(&mut unit, &ok, false, None);
    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());

    let mut unit = common::unit();
    let too_big = block(vec![decl(
        "x",
        true,
        Some(sym("u8")),
        binop(BinOpKind::Add, cast("u8", int(200)), cast("u8", int(100))),
    )]);
    analyze_expr(&mut unit, &too_big, false, None);
    assert!(unit.sink.contains("operation caused overflow"));
}

#[test]
fn compile_time_division_by_zero_is_reported() {
    let mut unit = unit();
    let root = binop(BinOpKind::Div, int(1), int(0));

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("division by zero"));
}

#[test]
fn inline_function_calls_fold_to_constants() {
    let mut unit = unit();
    let u32_ty = unit.types.int_type(32, false);
    register_inline_fn(
        &mut unit,
        "add",
        vec![("a", u32_ty.clone()), ("b", u32_ty.clone())],
        u32_ty,
        ret(binop(BinOpKind::Add, sym("a"), sym("b"))),
    );

    let root = call(sym("add"), vec![int(3), int(4)]);
    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"call"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(7));
}

#[test]
fn runtime_for_loop_lowers_to_branches_and_element_pointers() {
    let mut unit = unit();
    let root = block(vec![
        decl(
            "arr",
            true,
            None,
            array_init(array_ty(3, sym("u8")), vec![int(1), int(2), int(3)]),
        ),
        for_("x", None, sym("arr"), block(vec![])),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    let stream = mnemonics(&analyzed.exec);
    assert!(stream.contains(&"cond_br"));
    assert!(stream.contains(&"elem_ptr"));
    assert!(stream.contains(&"store_ptr"));
}

#[test]
fn known_to_runtime_slot_demotion_emits_the_variable_once() {
    let mut unit = unit();
    let u8_ty = unit.types.int_type(8, false);
    register_runtime_fn(&mut unit, "r", u8_ty);

    let root = block(vec![
        decl_inline("x", Some(sym("u8")), int(5)),
        decl("y", true, Some(sym("u8")), sym("x")),
        assign(sym("x"), call(sym("r"), vec![])),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    let stream = mnemonics(&analyzed.exec);
    // the demotion materializes exactly one runtime declaration
    assert_eq!(stream.iter().filter(|m| **m == "decl_var").count(), 1);
    assert!(stream.contains(&"store_ptr"));
}

#[test]
fn undeclared_identifier_is_reported() {
    let mut unit = unit();
    let root = sym("nope");

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("use of undeclared identifier 'nope'"));
}

#[test]
fn redeclaration_and_type_shadowing_are_reported() {
    let mut unit = unit();
    let root = block(vec![
        decl("x", true, None, int(1)),
        decl("x", true, None, int(2)),
        decl("u8", true, None, int(3)),
    ]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("redeclaration of variable 'x'"));
    assert!(unit.sink.contains("variable shadows type 'u8'"));
}

#[test]
fn struct_initializer_via_import_folds() {
    use cinder::middle::scope::{Decl, DeclKind, Import};
    use cinder::middle::ty::StructField;
    use cinder::InternedSymbol;

    let mut unit = unit();
    let u8_ty = unit.types.int_type(8, false);
    let point = unit.types.define_struct(
        InternedSymbol::new("Point"),
        vec![
            StructField {
                name: InternedSymbol::new("x"),
                ty: u8_ty.clone(),
            },
            StructField {
                name: InternedSymbol::new("y"),
                ty: u8_ty,
            },
        ],
    );

    let mut decls = hashbrown::HashMap::new();
    decls.insert(
        InternedSymbol::new("Point"),
        Decl {
            kind: DeclKind::Type(point),
            is_public: true,
        },
    );
    unit.add_import(
        InternedSymbol::new("pt"),
        Import {
            name: InternedSymbol::new("pt"),
            decls,
            uses: Vec::new(),
        },
    );

    let root = fields_init(
        field(builtin("import", vec![str_lit("pt")]), "Point"),
        vec![("x", int(1)), ("y", int(2))],
    );
    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(analyzed.value.is_static());
}

#[test]
fn private_import_members_are_rejected() {
    use cinder::middle::scope::{Decl, DeclKind, Import};
    use cinder::InternedSymbol;

    let mut unit = unit();
    let u8_ty = unit.types.int_type(8, false);

    let mut decls = hashbrown::HashMap::new();
    decls.insert(
        InternedSymbol::new("secret"),
        Decl {
            kind: DeclKind::Type(u8_ty),
            is_public: false,
        },
    );
    unit.add_import(
        InternedSymbol::new("m"),
        Import {
            name: InternedSymbol::new("m"),
            decls,
            uses: Vec::new(),
        },
    );

    let root = field(builtin("import", vec![str_lit("m")]), "secret");
    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("'secret' is private"));
}

#[test]
fn missing_import_is_a_compile_error() {
    let mut unit = unit();
    let root = builtin("import", vec![str_lit("does_not_exist")]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("unable to find 'does_not_exist'"));
}

#[test]
fn compile_var_taints_derived_values() {
    let mut unit = unit();
    let root = builtin("compileVar", vec![str_lit("is_test")]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(analyzed.value.depends_on_compile_var);
}

#[test]
fn builtin_arity_is_checked() {
    let mut unit = unit();
    let root = builtin("typeOf", vec![int(1), int(2)]);

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("expected 1 arguments, found 2"));
}

#[test]
fn invalid_explicit_cast_is_reported() {
    let mut unit = unit();
    let root = cast("bool", boolean(true));
    analyze_expr(&mut unit, &root, false, None);
    assert!(!unit.sink.has_errors());

    // a bool cannot become a pointer, explicitly or otherwise
    let mut unit = common::unit();
    let pointer_type = e(cinder::frontend::ast::ExprKind::PointerType {
        child: sym("u8"),
        is_const: false,
    });
    let root = call(pointer_type, vec![boolean(true)]);
    analyze_expr(&mut unit, &root, false, None);
    assert!(unit.sink.contains("invalid cast"));
}

#[test]
fn unwrap_or_folds_through_the_null_path() {
    let mut unit = unit();
    let root = block(vec![
        decl(
            "m",
            true,
            Some(maybe_ty(sym("u32"))),
            e(cinder::frontend::ast::ExprKind::NullLit),
        ),
        binop(BinOpKind::UnwrapOr, sym("m"), int(9)),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    assert!(!mnemonics(&analyzed.exec).contains(&"unwrap_maybe"));
    assert_eq!(analyzed.value.as_num().and_then(|n| n.to_u64()), Some(9));
}

#[test]
fn runtime_while_lowers_to_condition_and_body_blocks() {
    let mut unit = unit();
    let bool_ty = unit.types.bool();
    register_runtime_fn(&mut unit, "cond", bool_ty);

    let root = block(vec![
        decl("i", false, Some(sym("u8")), int(0)),
        while_(
            call(sym("cond"), vec![]),
            block(vec![assign(sym("i"), int(1))]),
        ),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    let stream = mnemonics(&analyzed.exec);
    assert!(stream.contains(&"cond_br"));
    assert!(stream.contains(&"store_ptr"));
    assert!(analyzed.exec.blocks.len() >= 3);
}

#[test]
fn asm_without_outputs_must_be_volatile() {
    use cinder::frontend::ast::{AsmExpr, ExprKind};
    use cinder::InternedSymbol;
    use std::rc::Rc;

    let mut unit = unit();
    let root = e(ExprKind::Asm(Rc::new(AsmExpr {
        template: InternedSymbol::new("nop"),
        is_volatile: false,
        outputs: Vec::new(),
        inputs: Vec::new(),
        clobbers: Vec::new(),
    })));

    analyze_expr(&mut unit, &root, false, None);

    assert!(unit.sink.contains("must be marked volatile"));
}

#[test]
fn ir_dump_renders_blocks_and_instructions() {
    use cinder::middle::ir::pretty_print::dump_executable;

    let mut unit = unit();
    let bool_ty = unit.types.bool();
    register_runtime_fn(&mut unit, "cond", bool_ty);
    let root = if_(
        call(sym("cond"), vec![]),
        cast("u32", int(1)),
        cast("u32", int(2)),
    );

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    let dump = dump_executable(&analyzed.exec);
    assert!(dump.contains("cond_br"));
    assert!(dump.contains("phi"));
    let rendered_lines = dump.lines().count();
    let block_count = analyzed.exec.blocks.len();
    let inst_count: usize = analyzed
        .exec
        .blocks
        .iter()
        .map(|b| b.instructions.len())
        .sum();
    assert_eq!(rendered_lines, block_count + inst_count);
}

#[test]
fn type_totality_holds_after_successful_analysis() {
    let mut unit = unit();
    let root = block(vec![
        decl("a", true, Some(sym("u32")), int(10)),
        decl("b", true, Some(sym("u32")), binop(BinOpKind::Mul, sym("a"), sym("a"))),
        sym("b"),
    ]);

    let analyzed = analyze_expr(&mut unit, &root, false, None);

    assert!(!unit.sink.has_errors(), "{:?}", unit.sink.diagnostics());
    for inst in analyzed.exec.insts.iter() {
        assert!(!inst.ty.is_invalid(), "untyped instruction survived analysis");
    }
    assert_eq!(
        analyzed.value.as_num().and_then(|n| n.to_u64()),
        Some(100)
    );
}
