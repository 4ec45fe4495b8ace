//! Cross-cutting optimizer properties over whole programs.

mod common;

use std::collections::HashSet;

use anyhow::Result;

use smplc::ir::{Opcode, Operand, Program, ProgramBuilder, SymbolTable};
use smplc::{opt, ssa};

fn while_sum_program() -> Result<(Program, SymbolTable)> {
    let mut b = ProgramBuilder::new();
    b.global("s");
    b.global("i");
    let b0 = b.block();
    let b1 = b.block();
    let b2 = b.block();
    let b3 = b.block();

    b.move_to(b0, "s", Operand::lit(0));
    b.move_to(b0, "i", Operand::lit(1));
    b.edge(b0, b1);

    let cond = b.arith(b1, Opcode::Cmp, Operand::name("i"), Operand::lit(5));
    b.branch(b1, Opcode::Bgt, Operand::temp(cond), b3);
    b.edge(b1, b2);
    b.edge(b1, b3);
    b.mark_while(b1, b2, b3);

    let sum = b.arith(b2, Opcode::Add, Operand::name("s"), Operand::name("i"));
    b.move_to(b2, "s", Operand::temp(sum));
    let step = b.arith(b2, Opcode::Add, Operand::name("i"), Operand::lit(1));
    b.move_to(b2, "i", Operand::temp(step));
    b.jump(b2, b1);
    b.edge(b2, b1);

    b.write(b3, Operand::name("s"));
    b.ret(b3, None);
    Ok(b.finish()?)
}

/// Running the optimization round once more after convergence must change
/// nothing: the instruction stream renders byte-identically.
#[test]
fn fixpoint_is_idempotent() -> Result<()> {
    common::init_logging();
    let (mut program, mut table) = while_sum_program()?;
    program.sweep_empty_blocks(&mut table);
    ssa::dominance::build(&mut program);
    ssa::construct(&mut program, &table);

    opt::optimise(&mut program)?;
    let converged = program.render();

    opt::optimise(&mut program)?;
    assert_eq!(converged, program.render());
    Ok(())
}

/// After SSA construction, every (name, version) pair has exactly one
/// definition.
#[test]
fn ssa_definitions_are_unique() -> Result<()> {
    let (mut program, mut table) = while_sum_program()?;
    program.sweep_empty_blocks(&mut table);
    ssa::dominance::build(&mut program);
    ssa::construct(&mut program, &table);

    let mut seen = HashSet::new();
    for instr in &program.instrs {
        if instr.deleted {
            continue;
        }
        let defined = match instr.op {
            Opcode::Move => instr.dst.clone(),
            Opcode::LoadGlobal | Opcode::Phi => instr.src.clone(),
            _ => None,
        };
        if let Some(Operand::Var(variable)) = defined {
            assert!(
                seen.insert((variable.name.clone(), variable.version)),
                "{}_{} defined twice",
                variable.name,
                variable.version
            );
        }
    }
    Ok(())
}

/// No live instruction reads a value whose producer was soft-deleted.
#[test]
fn dead_values_are_never_read() -> Result<()> {
    let (mut program, mut table) = while_sum_program()?;
    program.sweep_empty_blocks(&mut table);
    ssa::dominance::build(&mut program);
    ssa::construct(&mut program, &table);
    opt::optimise(&mut program)?;

    let dead: HashSet<Operand> = program
        .instrs
        .iter()
        .filter(|instr| instr.deleted)
        .map(|instr| instr.value())
        .collect();

    for instr in &program.instrs {
        if instr.deleted {
            continue;
        }
        for operand in instr
            .src
            .iter()
            .chain(instr.dst.iter())
            .chain(instr.args.iter())
        {
            assert!(
                !dead.contains(operand),
                "live instruction {} reads deleted value {}",
                instr,
                operand
            );
        }
    }
    Ok(())
}
