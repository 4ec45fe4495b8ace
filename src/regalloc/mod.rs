//! Graph-coloring register allocation.
//!
//! One interference graph per function: at every instruction, all values
//! in its live-in set pairwise interfere. The graph is colored with the
//! general-purpose palette via Chaitin-Briggs simplify/select; uncolorable
//! nodes are marked spilled rather than failing, and the colors are then
//! written back onto every instruction's operand register slots.

mod graph;

use std::collections::HashMap;

use log::debug;

use crate::ir::{BlockId, InstrId, Opcode, Operand, Program, Slot, SymbolTable};
use crate::opt::{analyse_liveness, LiveSet};

use graph::InterferenceGraph;

/// Allocation results beyond the in-place slot annotations: the set of
/// live-range names seen per root, which the code generator turns into
/// frame slots.
#[derive(Debug)]
pub struct Allocation {
    pub root_values: HashMap<BlockId, Vec<Operand>>,
}

pub fn allocate(program: &mut Program, table: &mut SymbolTable, registers: usize) -> Allocation {
    let entries = analyse_liveness(program);
    // Lowering may have left bypassable empty blocks behind.
    program.sweep_empty_blocks(table);

    let mut root_values = HashMap::new();
    for root in program.roots.clone() {
        let values = allocate_root(program, &entries, root, registers);
        debug!("regalloc: {} live range(s) under root {}", values.len(), root);
        root_values.insert(root, values);
    }
    Allocation { root_values }
}

fn allocate_root(
    program: &mut Program,
    entries: &HashMap<InstrId, LiveSet>,
    root: BlockId,
    registers: usize,
) -> Vec<Operand> {
    let mut graph = InterferenceGraph::new();
    for block in program.forward_order(root) {
        for id in program.live_instrs(block) {
            if let Some(live) = entries.get(&id) {
                graph.add_clique(live);
            }
            // Call arguments are tracked as ordinary interfering nodes
            // even when a set would otherwise never mention them.
            if program.instr(id).op == Opcode::Call {
                for arg in program.instr(id).args.clone() {
                    if let Some(name) = arg.live_name() {
                        graph.node_for(&name);
                    }
                }
            }
        }
    }

    graph.color(registers);

    for block in program.forward_order(root) {
        for id in program.live_instrs(block) {
            let instr = program.instr(id);
            let op = instr.op;
            if op == Opcode::Call {
                let slots: Vec<Option<Slot>> = instr
                    .args
                    .iter()
                    .map(|arg| arg.live_name().and_then(|name| graph.slot_of(&name)))
                    .collect();
                let out = graph.slot_of(&Operand::temp(id));
                let instr = program.instr_mut(id);
                instr.regs.args = slots;
                instr.regs.out = out;
            } else {
                let src = instr
                    .src
                    .as_ref()
                    .and_then(Operand::live_name)
                    .and_then(|name| graph.slot_of(&name));
                let dst = instr
                    .dst
                    .as_ref()
                    .and_then(Operand::live_name)
                    .and_then(|name| graph.slot_of(&name));
                let out = op
                    .produces_value()
                    .then(|| graph.slot_of(&Operand::temp(id)))
                    .flatten();
                let instr = program.instr_mut(id);
                instr.regs.src = src;
                instr.regs.dst = dst;
                instr.regs.out = out;
            }
        }
    }

    graph.values().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, Operand, ProgramBuilder};
    use crate::ssa::dominance;

    #[test]
    fn slots_land_on_the_annotated_operands() {
        let mut b = ProgramBuilder::new();
        b.global("x");
        let b0 = b.block();
        let lhs = b.read(b0);
        let rhs = b.read(b0);
        let sum = b.arith(b0, Opcode::Add, Operand::temp(lhs), Operand::temp(rhs));
        b.write(b0, Operand::temp(sum));
        b.ret(b0, None);
        let (mut program, mut table) = b.finish().unwrap();
        dominance::build(&mut program);

        allocate(&mut program, &mut table, 4);

        let add = program.instr(sum);
        assert!(matches!(add.regs.src, Some(Slot::Reg(_))));
        assert!(matches!(add.regs.dst, Some(Slot::Reg(_))));
        assert!(matches!(add.regs.out, Some(Slot::Reg(_))));
        // Both reads are live at the add, so they occupy distinct colors.
        assert_ne!(add.regs.src, add.regs.dst);
    }

    #[test]
    fn single_register_forces_spills_not_failure() {
        let mut b = ProgramBuilder::new();
        b.global("x");
        let b0 = b.block();
        let a = b.read(b0);
        let c = b.read(b0);
        let d = b.read(b0);
        let s1 = b.arith(b0, Opcode::Add, Operand::temp(a), Operand::temp(c));
        let s2 = b.arith(b0, Opcode::Add, Operand::temp(s1), Operand::temp(d));
        b.write(b0, Operand::temp(s2));
        b.ret(b0, None);
        let (mut program, mut table) = b.finish().unwrap();
        dominance::build(&mut program);

        let allocation = allocate(&mut program, &mut table, 1);

        let values = &allocation.root_values[&b0];
        let spilled = values
            .iter()
            .filter(|v| {
                // Read back through the annotations.
                program.instrs.iter().any(|i| {
                    !i.deleted
                        && (i.src.as_ref() == Some(v) && i.regs.src == Some(Slot::Spill)
                            || i.dst.as_ref() == Some(v) && i.regs.dst == Some(Slot::Spill))
                })
            })
            .count();
        assert!(spilled > 0, "three simultaneously live reads need spills");
    }
}
