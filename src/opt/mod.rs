//! The fixpoint dataflow-optimization framework.
//!
//! The driver applies a fixed round of passes — algebraic simplification,
//! constant folding, common-subexpression elimination, copy/constant
//! propagation, redundant-store removal, dead-code elimination — until one
//! whole round reports no change. Passes that need a meet-over-paths
//! analysis implement [`GlobalPass`]: their `process` step is driven to a
//! local fixpoint by breadth-first re-visitation over the (reverse)
//! dominator tree before their `optimize` step runs once, so rewrites only
//! ever see converged facts.

mod liveness;
mod local;
pub(crate) mod phi;
mod propagate;

use log::debug;

use crate::error::Result;
use crate::ir::{BlockId, Opcode, Operand, Program};

pub(crate) use liveness::{analyse as analyse_liveness, LiveSet};
pub use phi::lower as lower_phis;

/// A global optimization: a dataflow `process` step plus a rewrite
/// `optimize` step. The framework never runs `optimize` before `process`
/// has converged.
pub(crate) trait GlobalPass {
    fn process(&mut self, program: &mut Program, block: BlockId) -> Result<bool>;
    fn optimize(&mut self, program: &mut Program, block: BlockId) -> Result<bool>;
}

pub fn optimise(program: &mut Program) -> Result<()> {
    Optimiser { program }.run()
}

struct Optimiser<'a> {
    program: &'a mut Program,
}

impl Optimiser<'_> {
    fn run(&mut self) -> Result<()> {
        let mut rounds = 0usize;
        loop {
            let mut change = false;
            if self.simplify()? {
                change = true;
            }
            if self.fold()? {
                change = true;
            }
            if self.eliminate_common_subexpressions()? {
                change = true;
            }
            if self.propagate_copies()? {
                change = true;
            }
            if self.remove_redundant_stores()? {
                change = true;
            }
            if self.eliminate_dead_code()? {
                change = true;
            }
            rounds += 1;
            if !change {
                break;
            }
        }
        debug!("optimiser: fixpoint after {} round(s)", rounds);
        Ok(())
    }

    /// Algebraic simplification (AS).
    fn simplify(&mut self) -> Result<bool> {
        let mut change = phi::translate(self.program);
        for root in self.program.roots.clone() {
            while local::sweep(self.program, root, local::simplify_block)? {
                change = true;
            }
        }
        Ok(change)
    }

    /// Constant folding (CF).
    fn fold(&mut self) -> Result<bool> {
        let mut change = phi::translate(self.program);
        for root in self.program.roots.clone() {
            while local::sweep(self.program, root, local::fold_block)? {
                change = true;
            }
        }
        Ok(change)
    }

    /// Common-subexpression elimination (CSE).
    fn eliminate_common_subexpressions(&mut self) -> Result<bool> {
        let mut change = phi::translate(self.program);
        for root in self.program.roots.clone() {
            let mut pass = propagate::AvailablePass::expressions();
            while bfs_process(self.program, root, &mut pass)? {}
            if dfs_optimize(self.program, root, &mut pass)? {
                change = true;
            }
        }
        Ok(change)
    }

    /// Copy and constant propagation (CP).
    fn propagate_copies(&mut self) -> Result<bool> {
        let mut change = phi::translate(self.program);
        for root in self.program.roots.clone() {
            let mut pass = propagate::AvailablePass::copies();
            while bfs_process(self.program, root, &mut pass)? {}
            if dfs_optimize(self.program, root, &mut pass)? {
                change = true;
            }
        }
        Ok(change)
    }

    /// Redundant global-store removal (RS).
    fn remove_redundant_stores(&mut self) -> Result<bool> {
        let mut change = false;
        for root in self.program.roots.clone() {
            if propagate::remove_redundant_stores(self.program, root) {
                change = true;
            }
        }
        Ok(change)
    }

    /// Liveness-driven dead-code elimination (DCE).
    fn eliminate_dead_code(&mut self) -> Result<bool> {
        let mut change = phi::translate(self.program);
        for exit in self.program.exits.clone() {
            let mut pass = liveness::Liveness::new();
            while reverse_bfs_process(self.program, exit, &mut pass)? {}
            if reverse_dfs_optimize(self.program, exit, &mut pass)? {
                change = true;
            }
        }
        Ok(change)
    }
}

/// One breadth-first `process` sweep over the dominator tree.
pub(crate) fn bfs_process(
    program: &mut Program,
    root: BlockId,
    pass: &mut impl GlobalPass,
) -> Result<bool> {
    let mut change = false;
    for block in program.dominator_order(root) {
        if pass.process(program, block)? {
            change = true;
        }
    }
    Ok(change)
}

/// One breadth-first `process` sweep over the reverse-dominator tree.
pub(crate) fn reverse_bfs_process(
    program: &mut Program,
    exit: BlockId,
    pass: &mut impl GlobalPass,
) -> Result<bool> {
    let mut change = false;
    for block in program.reverse_dominator_order(exit) {
        if pass.process(program, block)? {
            change = true;
        }
    }
    Ok(change)
}

/// One depth-first `optimize` sweep over successor edges.
fn dfs_optimize(
    program: &mut Program,
    root: BlockId,
    pass: &mut impl GlobalPass,
) -> Result<bool> {
    let mut change = false;
    for block in program.forward_order(root) {
        if pass.optimize(program, block)? {
            change = true;
        }
    }
    Ok(change)
}

/// One depth-first `optimize` sweep over predecessor edges.
fn reverse_dfs_optimize(
    program: &mut Program,
    exit: BlockId,
    pass: &mut impl GlobalPass,
) -> Result<bool> {
    let mut change = false;
    for block in program.backward_order(exit) {
        if pass.optimize(program, block)? {
            change = true;
        }
    }
    Ok(change)
}

/// Rewire every live reference to `source` so it refers to `target`
/// instead. This is a whole-program substitution, not a local rewrite:
/// call arguments and phi inputs are covered too.
///
/// Phi inputs need care: an input that becomes textually equal to another
/// input of the same phi is merged away, and an input that would refer to
/// the phi's own value is dropped as a self-loop. The matching predecessor
/// tags are removed in parallel.
pub(crate) fn substitute(program: &mut Program, source: &Operand, target: &Operand) -> bool {
    if source == target {
        return false;
    }
    let mut change = false;
    for instr in &mut program.instrs {
        if instr.deleted {
            continue;
        }
        match instr.op {
            Opcode::Phi => {
                let own_value = match (&instr.src, target) {
                    (Some(Operand::Var(column)), Operand::Var(incoming)) => {
                        column.name == incoming.name && incoming.version == instr.seq.0
                    }
                    _ => false,
                };
                let mut removes = Vec::new();
                for index in 0..instr.args.len() {
                    if &instr.args[index] == source {
                        let duplicate = instr
                            .args
                            .iter()
                            .enumerate()
                            .any(|(other, arg)| other != index && arg == target);
                        if duplicate || own_value {
                            removes.push(index);
                        }
                        instr.args[index] = target.clone();
                        change = true;
                    }
                }
                if !removes.is_empty() {
                    let mut position = 0;
                    instr.args.retain(|_| {
                        let keep = !removes.contains(&position);
                        position += 1;
                        keep
                    });
                    position = 0;
                    instr.phi_preds.retain(|_| {
                        let keep = !removes.contains(&position);
                        position += 1;
                        keep
                    });
                }
            }
            Opcode::Call => {
                for arg in &mut instr.args {
                    if arg == source {
                        *arg = target.clone();
                        change = true;
                    }
                }
            }
            _ => {
                if instr.src.as_ref() == Some(source) {
                    instr.src = Some(target.clone());
                    change = true;
                }
                if instr.dst.as_ref() == Some(source) {
                    instr.dst = Some(target.clone());
                    change = true;
                }
            }
        }
    }
    change
}
