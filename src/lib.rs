//! smplc — the optimizing middle and back end of a compiler for a small
//! imperative language.
//!
//! The crate consumes a control-flow graph of three-address instructions
//! (built through [`ir::ProgramBuilder`] from whatever front end produced
//! them) and produces register-allocated machine words for a DLX-style
//! fixed register machine:
//!
//! 1. empty blocks left over from construction are bypassed;
//! 2. dominator and reverse-dominator trees are computed per function;
//! 3. the graph is put into SSA form with phi placeholders at joins;
//! 4. a fixpoint optimizer runs simplification, constant folding, CSE,
//!    copy/constant propagation, store elimination and dead-code
//!    elimination until nothing changes;
//! 5. phis are lowered back into moves along predecessor edges;
//! 6. an interference graph per function is colored Chaitin-Briggs style,
//!    spilling what does not fit;
//! 7. machine words are emitted in structured control order, with branch
//!    and call targets backpatched once the layout is final.
//!
//! Compilation either returns the complete word array or fails with a
//! [`CompileError`]; there is no partial output.

pub mod codegen;
pub mod error;
pub mod ir;
pub mod opt;
pub mod regalloc;
pub mod ssa;

pub use codegen::emulator::Machine;
pub use codegen::machine::DEFAULT_REGISTERS;
pub use error::{CompileError, Result};
pub use ir::{Program, ProgramBuilder, SymbolTable};

/// Run the whole pipeline over a linked program, coloring with `registers`
/// general-purpose registers.
pub fn compile(
    program: &mut Program,
    table: &mut SymbolTable,
    registers: usize,
) -> Result<Vec<u32>> {
    program.sweep_empty_blocks(table);
    ssa::dominance::build(program);
    ssa::construct(program, table);
    opt::optimise(program)?;
    opt::lower_phis(program);
    let allocation = regalloc::allocate(program, table, registers);
    codegen::generate(program, table, registers, &allocation)
}
