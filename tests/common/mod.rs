//! Shared helpers for the integration suites.

use std::sync::Once;

use anyhow::{anyhow, Result};

use smplc::{Machine, Program, SymbolTable};

static LOGGER: Once = Once::new();

/// Opt-in stderr logging for debugging test failures; honoured once per
/// process.
pub fn init_logging() {
    LOGGER.call_once(|| {
        let _ = stderrlog::new().verbosity(2).init();
    });
}

/// Compile with the given register count and execute the result, feeding
/// `input` to the READ instruction and returning everything WRITE printed.
pub fn compile_and_run(
    mut program: Program,
    mut table: SymbolTable,
    registers: usize,
    input: &[i32],
) -> Result<Vec<i32>> {
    init_logging();
    let words = smplc::compile(&mut program, &mut table, registers)
        .map_err(|e| anyhow!("compilation failed: {e}"))?;
    let mut machine = Machine::with_input(words, input);
    machine
        .run()
        .map_err(|e| anyhow!("execution failed: {e}"))?;
    Ok(machine.output)
}
