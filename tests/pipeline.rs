//! End-to-end pipeline tests: build a program the way the front end would,
//! compile it with the full pipeline, and execute the emitted words.

mod common;

use anyhow::Result;

use smplc::ir::{Opcode, Operand, ProgramBuilder, Type};
use smplc::{CompileError, DEFAULT_REGISTERS};

use common::compile_and_run;

/// `x := 3 + 4; write(x)` prints 7.
#[test]
fn straight_line_arithmetic() -> Result<()> {
    let mut b = ProgramBuilder::new();
    b.global("x");
    let b0 = b.block();
    let sum = b.arith(b0, Opcode::Add, Operand::lit(3), Operand::lit(4));
    b.move_to(b0, "x", Operand::temp(sum));
    b.write(b0, Operand::name("x"));
    b.write_nl(b0);
    b.ret(b0, None);
    let (program, table) = b.finish()?;

    let output = compile_and_run(program, table, DEFAULT_REGISTERS, &[])?;
    assert_eq!(vec![7], output);
    Ok(())
}

/// `s := 0; i := 1; while i <= 5 { s := s + i; i := i + 1 }; write(s)`
/// prints 15.
fn while_sum(registers: usize) -> Result<()> {
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
    let (program, table) = b.finish()?;

    let output = compile_and_run(program, table, registers, &[])?;
    assert_eq!(vec![15], output);
    Ok(())
}

#[test]
fn loop_sums_one_to_five() -> Result<()> {
    while_sum(DEFAULT_REGISTERS)
}

/// The same loop under maximum register pressure: everything spillable
/// must spill and the result must not change.
#[test]
fn loop_sums_one_to_five_with_one_register() -> Result<()> {
    while_sum(1)
}

/// A function with one parameter and a return value, called twice, with
/// the first result held live across the second call.
fn double_called_twice(registers: usize) -> Result<()> {
    let mut b = ProgramBuilder::new();
    let f = b.function("double", Type::Int, &["n"]);
    b.begin_function(f);
    let fb = b.block();
    let twice = b.arith(fb, Opcode::Add, Operand::name("n"), Operand::name("n"));
    b.ret(fb, Some(Operand::temp(twice)));
    b.end_function();

    let b0 = b.block();
    let first = b.read(b0);
    let second = b.read(b0);
    let c1 = b.call(b0, "double", vec![Operand::temp(first)]);
    b.write(b0, Operand::temp(c1));
    let c2 = b.call(b0, "double", vec![Operand::temp(second)]);
    let total = b.arith(b0, Opcode::Add, Operand::temp(c1), Operand::temp(c2));
    b.write(b0, Operand::temp(total));
    b.ret(b0, None);
    let (program, table) = b.finish()?;

    let output = compile_and_run(program, table, registers, &[5, 7])?;
    assert_eq!(vec![10, 24], output);
    Ok(())
}

#[test]
fn function_called_twice() -> Result<()> {
    double_called_twice(DEFAULT_REGISTERS)
}

/// Frame offsets and spill code must hold up when almost nothing fits in
/// registers.
#[test]
fn function_called_twice_under_pressure() -> Result<()> {
    double_called_twice(1)
}

/// if/else with both branches assigning the join variable; the phi-lowered
/// result must be correct on both paths.
fn branchy(input: i32) -> Result<Vec<i32>> {
    let mut b = ProgramBuilder::new();
    b.global("y");
    let b0 = b.block();
    let b1 = b.block();
    let b2 = b.block();
    let b3 = b.block();

    let read = b.read(b0);
    let cond = b.arith(b0, Opcode::Cmp, Operand::temp(read), Operand::lit(0));
    b.branch(b0, Opcode::Beq, Operand::temp(cond), b2);
    b.edge(b0, b1);
    b.edge(b0, b2);
    b.mark_if(b0, b1, b2, b3);

    b.move_to(b1, "y", Operand::lit(1));
    b.jump(b1, b3);
    b.edge(b1, b3);

    b.move_to(b2, "y", Operand::lit(2));
    b.edge(b2, b3);

    b.write(b3, Operand::name("y"));
    b.ret(b3, None);
    let (program, table) = b.finish()?;

    compile_and_run(program, table, DEFAULT_REGISTERS, &[input])
}

#[test]
fn if_else_join_takes_the_then_path() -> Result<()> {
    assert_eq!(vec![1], branchy(5)?);
    Ok(())
}

#[test]
fn if_else_join_takes_the_else_path() -> Result<()> {
    assert_eq!(vec![2], branchy(0)?);
    Ok(())
}

/// A constant division by zero is rejected at compile time; no output is
/// produced.
#[test]
fn constant_division_by_zero_is_rejected() -> Result<()> {
    let mut b = ProgramBuilder::new();
    b.global("x");
    let b0 = b.block();
    let div = b.arith(b0, Opcode::Div, Operand::lit(1), Operand::lit(0));
    b.write(b0, Operand::temp(div));
    b.ret(b0, None);
    let (mut program, mut table) = b.finish()?;

    let result = smplc::compile(&mut program, &mut table, DEFAULT_REGISTERS);
    assert!(matches!(result, Err(CompileError::DivisionByZero { .. })));
    Ok(())
}

/// Globals modified by a callee are observed by the caller after the call.
#[test]
fn globals_are_reloaded_across_calls() -> Result<()> {
    let mut b = ProgramBuilder::new();
    b.global("g");
    let f = b.function("bump", Type::Void, &[]);
    b.begin_function(f);
    let fb = b.block();
    let bumped = b.arith(fb, Opcode::Add, Operand::name("g"), Operand::lit(1));
    b.move_to(fb, "g", Operand::temp(bumped));
    b.ret(fb, None);
    b.end_function();

    let b0 = b.block();
    b.move_to(b0, "g", Operand::lit(41));
    b.call(b0, "bump", vec![]);
    b.write(b0, Operand::name("g"));
    b.ret(b0, None);
    let (program, table) = b.finish()?;

    let output = compile_and_run(program, table, DEFAULT_REGISTERS, &[])?;
    assert_eq!(vec![42], output);
    Ok(())
}
