use colored::Colorize;
use itertools::Itertools;

use crate::middle::{
    ir::{Executable, InstId, InstKind},
    value::Special,
};

/// Renders an executable one instruction per line, blocks labeled by name
/// hint and debug id.
pub fn dump_executable(exec: &Executable) -> String {
    let mut out = String::new();

    for block in exec.blocks.iter() {
        out.push_str(&format!(
            "{} (refs={}):\n",
            format!("{}_{}", block.name_hint, block.debug_id).bright_red(),
            block.ref_count
        ));

        for inst_id in &block.instructions {
            out.push_str(&format!("    {}\n", render_inst(exec, *inst_id)));
        }
    }

    out
}

pub fn pretty_print_executable(exec: &Executable) {
    print!("{}", dump_executable(exec));
}

fn operand(exec: &Executable, id: InstId) -> String {
    format!("%{}", exec.insts[id].debug_id).yellow().to_string()
}

fn render_inst(exec: &Executable, id: InstId) -> String {
    let inst = &exec.insts[id];

    let operands = match &inst.kind {
        InstKind::Br { dest, .. } => format!(
            "{}",
            format!("{}_{}", exec.blocks[*dest].name_hint, exec.blocks[*dest].debug_id).blue()
        ),
        InstKind::CondBr {
            condition,
            then_block,
            else_block,
            ..
        } => format!(
            "{} {} {}",
            operand(exec, *condition),
            format!(
                "{}_{}",
                exec.blocks[*then_block].name_hint, exec.blocks[*then_block].debug_id
            )
            .blue(),
            format!(
                "{}_{}",
                exec.blocks[*else_block].name_hint, exec.blocks[*else_block].debug_id
            )
            .blue()
        ),
        InstKind::SwitchBr {
            target,
            cases,
            else_block,
            ..
        } => {
            let cases = cases
                .iter()
                .map(|case| {
                    format!(
                        "{} -> {}",
                        operand(exec, case.value),
                        format!(
                            "{}_{}",
                            exec.blocks[case.dest].name_hint, exec.blocks[case.dest].debug_id
                        )
                        .blue()
                    )
                })
                .join(", ");
            format!(
                "{} [{cases}] else {}",
                operand(exec, *target),
                format!(
                    "{}_{}",
                    exec.blocks[*else_block].name_hint, exec.blocks[*else_block].debug_id
                )
                .blue()
            )
        }
        InstKind::Phi {
            incoming_blocks,
            incoming_values,
        } => incoming_blocks
            .iter()
            .zip(incoming_values)
            .map(|(block, value)| {
                format!(
                    "{} -> {}",
                    format!(
                        "{}_{}",
                        exec.blocks[*block].name_hint, exec.blocks[*block].debug_id
                    )
                    .blue(),
                    operand(exec, *value)
                )
            })
            .join(", "),
        InstKind::BinOp { op, lhs, rhs } => format!(
            "{} {} {}",
            operand(exec, *lhs),
            op.to_string().white(),
            operand(exec, *rhs)
        ),
        InstKind::UnOp { op, operand: o } => {
            format!("{} {}", op.to_string().white(), operand(exec, *o))
        }
        InstKind::Cast {
            op,
            operand: o,
            dest_type,
        } => format!("{} {} -> {dest_type}", op.to_string().white(), operand(exec, *o)),
        kind => kind
            .operands()
            .iter()
            .map(|o| operand(exec, *o))
            .join(", "),
    };

    let value = match &inst.value.special {
        Special::Runtime => String::new(),
        Special::Undef => format!(" {}", "= undefined".purple()),
        Special::Static(_) => format!(" {}", "= <static>".purple()),
    };

    format!(
        "{} {} {} {operands}{value} {}",
        format!("%{}", inst.debug_id).yellow(),
        "=".white(),
        inst.kind.mnemonic().cyan(),
        format!("[refs={} {}]", inst.ref_count, inst.ty.name()).white()
    )
}
