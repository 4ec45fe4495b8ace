//! Phi normalization and lowering.

use log::debug;

use crate::ir::{Opcode, Operand, Program, Variable};

/// Rewrite every phi placeholder with exactly one remaining source into a
/// plain move defining the phi's column value. Every pass runs this first,
/// so substitutions that shrank a phi to one input immediately become
/// ordinary copies the other analyses understand.
pub(crate) fn translate(program: &mut Program) -> bool {
    let mut change = false;
    for root in program.roots.clone() {
        for block in program.forward_order(root) {
            for id in program.block(block).instrs.clone() {
                let instr = program.instr_mut(id);
                if instr.deleted || instr.op != Opcode::Phi || instr.args.len() != 1 {
                    continue;
                }
                let Some(Operand::Var(column)) = &instr.src else {
                    continue;
                };
                let defined = Variable::new(column.name.clone(), instr.seq.0);
                instr.op = Opcode::Move;
                instr.dst = Some(Operand::Var(defined));
                instr.src = Some(instr.args.remove(0));
                instr.phi_preds.clear();
                change = true;
            }
        }
    }
    change
}

/// Lower every remaining multi-source phi into parallel moves: one move
/// per incoming value, inserted at the end of the corresponding
/// predecessor block, immediately before its trailing branch so control
/// semantics are preserved. The placeholder itself is soft-deleted.
///
/// Must run after the optimizer and before liveness analysis — register
/// allocation and code generation only understand moves.
pub fn lower(program: &mut Program) {
    let mut lowered = 0usize;
    for root in program.roots.clone() {
        for block in program.forward_order(root) {
            for id in program.block(block).instrs.clone() {
                let instr = program.instr(id);
                if instr.deleted || instr.op != Opcode::Phi {
                    continue;
                }
                let Some(Operand::Var(column)) = instr.src.clone() else {
                    continue;
                };
                let defined = Variable::new(column.name, id.0);

                let (args, preds) = {
                    let instr = program.instr_mut(id);
                    instr.deleted = true;
                    (
                        std::mem::take(&mut instr.args),
                        std::mem::take(&mut instr.phi_preds),
                    )
                };
                for (arg, pred) in args.into_iter().zip(preds) {
                    let mv = program.create_instr(Opcode::Move);
                    {
                        let instr = program.instr_mut(mv);
                        instr.src = Some(arg);
                        instr.dst = Some(Operand::Var(defined.clone()));
                    }
                    let trailing_branch = program
                        .block(pred)
                        .instrs
                        .last()
                        .map(|&last| program.instr(last).op.is_branch())
                        .unwrap_or(false);
                    let instrs = &mut program.block_mut(pred).instrs;
                    let position = if trailing_branch {
                        instrs.len() - 1
                    } else {
                        instrs.len()
                    };
                    instrs.insert(position, mv);
                }
                lowered += 1;
            }
        }
    }
    debug!("phi lowering: {} placeholder(s) lowered", lowered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, InstrId, Opcode, Operand, ProgramBuilder};
    use crate::ssa::{construct, dominance};

    fn diamond() -> (Program, BlockId, BlockId, BlockId) {
        let mut b = ProgramBuilder::new();
        b.global("x");
        let b0 = b.block();
        let b1 = b.block();
        let b2 = b.block();
        let b3 = b.block();

        let cond = b.arith(b0, Opcode::Cmp, Operand::name("x"), Operand::lit(0));
        b.branch(b0, Opcode::Beq, Operand::temp(cond), b2);
        b.edge(b0, b1);
        b.edge(b0, b2);
        b.mark_if(b0, b1, b2, b3);

        b.move_to(b1, "x", Operand::lit(2));
        b.jump(b1, b3);
        b.edge(b1, b3);
        b.move_to(b2, "x", Operand::lit(3));
        b.edge(b2, b3);

        b.write(b3, Operand::name("x"));
        b.ret(b3, None);

        let (mut program, table) = b.finish().unwrap();
        dominance::build(&mut program);
        construct(&mut program, &table);
        (program, b1, b2, b3)
    }

    #[test]
    fn single_source_phi_becomes_a_move() {
        let (mut program, b1, _, _) = diamond();
        // b1 has exactly one predecessor, so its phi has one source.
        let phi = program.block(b1).instrs[0];
        assert_eq!(Opcode::Phi, program.instr(phi).op);
        assert_eq!(1, program.instr(phi).args.len());

        assert!(translate(&mut program));
        let instr = program.instr(phi);
        assert_eq!(Opcode::Move, instr.op);
        assert_eq!(
            Some(Operand::var("x", phi.0)),
            instr.dst.clone()
        );
    }

    #[test]
    fn multi_source_phi_lowers_to_predecessor_moves() {
        let (mut program, b1, b2, b3) = diamond();
        let phi = program.block(b3).instrs[0];
        assert_eq!(2, program.instr(phi).args.len());

        lower(&mut program);

        assert!(program.instr(phi).deleted);
        for pred in [b1, b2] {
            let moves: Vec<InstrId> = program
                .live_instrs(pred)
                .into_iter()
                .filter(|&id| {
                    let instr = program.instr(id);
                    instr.op == Opcode::Move
                        && instr.dst == Some(Operand::var("x", phi.0))
                })
                .collect();
            assert_eq!(1, moves.len(), "one lowered move in {}", pred);
        }

        // The move in b1 sits before the trailing branch.
        let last = *program.block(b1).instrs.last().unwrap();
        assert_eq!(Opcode::Bra, program.instr(last).op);
    }
}
