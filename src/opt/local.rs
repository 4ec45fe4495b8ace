//! Local rewrites: algebraic simplification and constant folding.
//!
//! Both are single forward sweeps per call; any rewrite substitutes the
//! instruction's produced value throughout the program, so later passes
//! and later sweep iterations immediately see the simpler form. The
//! rewritten instruction itself is left in place — once nothing refers to
//! its value any more, dead-code elimination removes it.

use crate::error::{CompileError, Result};
use crate::ir::{BlockId, Opcode, Operand, Program};

use super::substitute;

/// Run `rewrite` over every block reachable from `root`, depth first.
pub(crate) fn sweep(
    program: &mut Program,
    root: BlockId,
    rewrite: fn(&mut Program, BlockId) -> Result<bool>,
) -> Result<bool> {
    let mut change = false;
    for block in program.forward_order(root) {
        if rewrite(program, block)? {
            change = true;
        }
    }
    Ok(change)
}

fn is_lit(operand: &Option<Operand>, value: i32) -> bool {
    matches!(operand, Some(Operand::Const(v)) if *v == value)
}

/// Algebraic identities: `x*0 -> 0`, `x*1 -> x`, `x*2 -> x+x`, `x/1 -> x`,
/// `x+0 -> x`, `x-0 -> x`.
pub(crate) fn simplify_block(program: &mut Program, block: BlockId) -> Result<bool> {
    let mut change = false;
    for id in program.live_instrs(block) {
        let instr = program.instr(id);
        let op = instr.op;
        let src = instr.src.clone();
        let dst = instr.dst.clone();
        let target = Operand::temp(id);
        match op {
            Opcode::Mul => {
                if is_lit(&src, 0) || is_lit(&dst, 0) {
                    if substitute(program, &target, &Operand::lit(0)) {
                        change = true;
                    }
                } else if is_lit(&src, 1) {
                    if let Some(dst) = dst {
                        if substitute(program, &target, &dst) {
                            change = true;
                        }
                    }
                } else if is_lit(&dst, 1) {
                    if let Some(src) = src {
                        if substitute(program, &target, &src) {
                            change = true;
                        }
                    }
                } else if is_lit(&src, 2) {
                    let instr = program.instr_mut(id);
                    instr.op = Opcode::Add;
                    instr.src = instr.dst.clone();
                    change = true;
                } else if is_lit(&dst, 2) {
                    let instr = program.instr_mut(id);
                    instr.op = Opcode::Add;
                    instr.dst = instr.src.clone();
                    change = true;
                }
            }
            Opcode::Div => {
                if is_lit(&dst, 0) {
                    return Err(CompileError::DivisionByZero { seq: id.0 });
                }
                if is_lit(&dst, 1) {
                    if let Some(src) = src {
                        if substitute(program, &target, &src) {
                            change = true;
                        }
                    }
                }
            }
            Opcode::Add => {
                if is_lit(&src, 0) {
                    if let Some(dst) = dst {
                        if substitute(program, &target, &dst) {
                            change = true;
                        }
                    }
                } else if is_lit(&dst, 0) {
                    if let Some(src) = src {
                        if substitute(program, &target, &src) {
                            change = true;
                        }
                    }
                }
            }
            Opcode::Sub => {
                if is_lit(&dst, 0) {
                    if let Some(src) = src {
                        if substitute(program, &target, &src) {
                            change = true;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(change)
}

/// Both-operand-literal collapse for the scalar arithmetic and compare
/// opcodes. Arithmetic wraps like the target machine; a constant division
/// by zero is rejected instead of producing a sentinel.
pub(crate) fn fold_block(program: &mut Program, block: BlockId) -> Result<bool> {
    let mut change = false;
    for id in program.live_instrs(block) {
        let instr = program.instr(id);
        let op = instr.op;
        if !matches!(
            op,
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Cmp
        ) {
            continue;
        }
        let (Some(lhs), Some(rhs)) = (
            instr.src.as_ref().and_then(Operand::as_const),
            instr.dst.as_ref().and_then(Operand::as_const),
        ) else {
            continue;
        };

        let folded = match op {
            Opcode::Add => lhs.wrapping_add(rhs),
            Opcode::Sub => lhs.wrapping_sub(rhs),
            Opcode::Mul => lhs.wrapping_mul(rhs),
            Opcode::Div => {
                if rhs == 0 {
                    return Err(CompileError::DivisionByZero { seq: id.0 });
                }
                lhs.wrapping_div(rhs)
            }
            Opcode::Cmp => match lhs.cmp(&rhs) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            },
            _ => unreachable!(),
        };
        if substitute(program, &Operand::temp(id), &Operand::lit(folded)) {
            change = true;
        }
    }
    Ok(change)
}
