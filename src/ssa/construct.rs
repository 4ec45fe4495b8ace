//! SSA construction: global-memory shadow instructions, phi placement at
//! join points, and version renaming over the dominator tree.

use log::debug;

use crate::ir::{BlockId, Opcode, Operand, Program, SymbolTable, Type};

/// Bring every root's subgraph into SSA form.
///
/// Every phi-eligible name ("candidate") gets one phi placeholder at the
/// head of every non-entry block, in a fixed column order shared by the
/// whole subgraph: for the top-level root the candidates are the global
/// scalars; for a function root they are its real globals, its real
/// parameters, then its locals. Arrays are not candidates — an array name
/// is an address, not a renameable value.
pub fn construct(program: &mut Program, table: &SymbolTable) {
    for root in program.roots.clone() {
        let scope = program.block(root).scope;
        let (candidates, global_count) = candidate_columns(table, scope);
        debug!(
            "ssa: root {} with {} candidate column(s)",
            root,
            candidates.len()
        );

        insert_store_shadows(program, root, &candidates[..global_count]);
        insert_load_shadows(program, root, &candidates[..global_count]);
        place_phis(program, root, &candidates);
        rename(program, root, &candidates);
    }
}

/// The candidate columns of a root, and how many of them are globals.
fn candidate_columns(table: &SymbolTable, scope: Option<usize>) -> (Vec<String>, usize) {
    let scalar_globals: Vec<String> = table
        .globals()
        .iter()
        .filter(|g| table.global_type(g) == Some(Type::Int))
        .cloned()
        .collect();

    match scope {
        None => {
            let count = scalar_globals.len();
            (scalar_globals, count)
        }
        Some(func) => {
            let symbol = table.function(func);
            let globals: Vec<String> = scalar_globals
                .into_iter()
                .filter(|g| !symbol.params().iter().any(|p| p == g))
                .filter(|g| !symbol.locals().iter().any(|(local, _)| local == g))
                .collect();
            let count = globals.len();

            let mut candidates = globals;
            candidates.extend(
                symbol
                    .params()
                    .iter()
                    .filter(|p| symbol.locals().iter().all(|(local, _)| local != *p))
                    .cloned(),
            );
            candidates.extend(
                symbol
                    .locals()
                    .iter()
                    .filter(|(_, ty)| *ty == Type::Int)
                    .map(|(name, _)| name.clone()),
            );
            (candidates, count)
        }
    }
}

/// Insert an `SG` shadow immediately after every move that assigns a plain
/// global, so the global's memory cell tracks its newest version across
/// call and spill boundaries.
fn insert_store_shadows(program: &mut Program, root: BlockId, globals: &[String]) {
    for block in program.forward_order(root) {
        let mut index = 0;
        while index < program.block(block).instrs.len() {
            let id = program.block(block).instrs[index];
            if program.instr(id).op == Opcode::Move {
                let target = program.instr(id).dst.clone();
                if let Some(Operand::Var(variable)) = target {
                    if globals.contains(&variable.name) {
                        let shadow = program.create_instr(Opcode::StoreGlobal);
                        let instr = program.instr_mut(shadow);
                        instr.src = Some(Operand::name(&variable.name));
                        instr.store_name = Some(variable.name.clone());
                        program.block_mut(block).instrs.insert(index + 1, shadow);
                        index += 1;
                    }
                }
            }
            index += 1;
        }
    }
}

/// Insert an `LG` reload for every global after every call: globals are
/// treated as invalidated across any call boundary. Each reload defines a
/// fresh version; dead-code elimination removes the ones nothing reads.
fn insert_load_shadows(program: &mut Program, root: BlockId, globals: &[String]) {
    for block in program.forward_order(root) {
        let mut index = 0;
        while index < program.block(block).instrs.len() {
            let id = program.block(block).instrs[index];
            if program.instr(id).op == Opcode::Call {
                for (offset, name) in globals.iter().enumerate() {
                    let shadow = program.create_instr(Opcode::LoadGlobal);
                    let instr = program.instr_mut(shadow);
                    instr.src = Some(Operand::name(name));
                    instr.store_name = Some(name.clone());
                    program
                        .block_mut(block)
                        .instrs
                        .insert(index + 1 + offset, shadow);
                }
                index += globals.len();
            }
            index += 1;
        }
    }
}

/// Walk the dominator tree breadth-first; every control-flow successor of
/// a visited block receives one phi placeholder per candidate column as
/// its leading instructions (created on first visit, extended with another
/// incoming entry on later visits). Each incoming entry is tagged with the
/// predecessor block it arrives from.
fn place_phis(program: &mut Program, root: BlockId, candidates: &[String]) {
    for block in program.dominator_order(root) {
        for succ in program.block(block).succs.clone() {
            if program.roots.contains(&succ) {
                continue;
            }
            let has_phis = program
                .block(succ)
                .instrs
                .first()
                .map(|&id| program.instr(id).op == Opcode::Phi)
                .unwrap_or(false);
            if !has_phis {
                let mut placeholders = Vec::with_capacity(candidates.len());
                for name in candidates {
                    let phi = program.create_instr(Opcode::Phi);
                    program.instr_mut(phi).src = Some(Operand::name(name));
                    placeholders.push(phi);
                }
                program.block_mut(succ).instrs.splice(0..0, placeholders);
            }
            for (column, name) in candidates.iter().enumerate() {
                let phi = program.block(succ).instrs[column];
                let instr = program.instr_mut(phi);
                instr.args.push(Operand::name(name));
                instr.phi_preds.push(block);
            }
        }
    }
}

/// Second breadth-first walk: stamp every candidate reference with the
/// column's current version, updating the column at each definition, and
/// propagate end-of-block versions into the successors' phi entries by
/// predecessor tag.
///
/// At the root all columns start unversioned; elsewhere each column is
/// seeded with its own phi placeholder's sequence number.
fn rename(program: &mut Program, root: BlockId, candidates: &[String]) {
    for block in program.dominator_order(root) {
        let mut versions: Vec<usize> = if block == root {
            vec![0; candidates.len()]
        } else {
            (0..candidates.len())
                .map(|column| program.block(block).instrs[column].0)
                .collect()
        };

        for id in program.block(block).instrs.clone() {
            let op = program.instr(id).op;
            let seq = id.0;
            let instr = program.instr_mut(id);
            if op == Opcode::Call {
                for arg in &mut instr.args {
                    if let Operand::Var(variable) = arg {
                        if let Some(column) =
                            candidates.iter().position(|c| c == &variable.name)
                        {
                            variable.version = versions[column];
                        }
                    }
                }
            } else {
                if let Some(Operand::Var(variable)) = &mut instr.src {
                    if let Some(column) = candidates.iter().position(|c| c == &variable.name) {
                        if op == Opcode::LoadGlobal {
                            versions[column] = seq;
                        }
                        variable.version = versions[column];
                    }
                }
                if let Some(Operand::Var(variable)) = &mut instr.dst {
                    if let Some(column) = candidates.iter().position(|c| c == &variable.name) {
                        if op == Opcode::Move {
                            versions[column] = seq;
                        }
                        variable.version = versions[column];
                    }
                }
            }
        }

        for succ in program.block(block).succs.clone() {
            if program.roots.contains(&succ) {
                continue;
            }
            for column in 0..candidates.len() {
                let phi = program.block(succ).instrs[column];
                let instr = program.instr_mut(phi);
                for index in 0..instr.phi_preds.len() {
                    if instr.phi_preds[index] == block {
                        if let Operand::Var(variable) = &mut instr.args[index] {
                            variable.version = versions[column];
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, ProgramBuilder, Variable};
    use crate::ssa::dominance;

    /// if/else, both branches assigning the global `x`, joined by a write.
    fn diamond() -> (Program, SymbolTable, BlockId) {
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

        let (program, table) = b.finish().unwrap();
        (program, table, b3)
    }

    #[test]
    fn join_block_gets_one_phi_per_candidate() {
        let (mut program, table, join) = diamond();
        dominance::build(&mut program);
        construct(&mut program, &table);

        let first = program.block(join).instrs[0];
        let phi = program.instr(first);
        assert_eq!(Opcode::Phi, phi.op);
        assert_eq!(2, phi.args.len());
        assert_eq!(2, phi.phi_preds.len());

        // Both incoming values are versions of x defined by the branch moves.
        for arg in &phi.args {
            let variable = arg.as_var().expect("phi input should be a variable");
            assert_eq!("x", variable.name);
            assert!(variable.version > 0);
        }

        // The final write reads the phi's own version.
        let write = program
            .block(join)
            .instrs
            .iter()
            .map(|&id| program.instr(id))
            .find(|i| i.op == Opcode::Write)
            .unwrap();
        assert_eq!(
            Some(&Variable::new("x", first.0)),
            write.src.as_ref().and_then(Operand::as_var)
        );
    }

    #[test]
    fn moves_into_globals_grow_store_shadows() {
        let (mut program, table, _) = diamond();
        dominance::build(&mut program);
        construct(&mut program, &table);

        let shadows: Vec<_> = program
            .instrs
            .iter()
            .filter(|i| i.op == Opcode::StoreGlobal)
            .collect();
        assert_eq!(2, shadows.len());
        for shadow in shadows {
            let variable = shadow.src.as_ref().and_then(Operand::as_var).unwrap();
            assert_eq!("x", variable.name);
            // The shadow stores the version the preceding move defined.
            assert!(variable.version > 0);
            assert_eq!(Some("x"), shadow.store_name.as_deref());
        }
    }

    #[test]
    fn loop_header_phi_sees_the_back_edge() {
        let mut b = ProgramBuilder::new();
        b.global("i");
        let b0 = b.block();
        let b1 = b.block();
        let b2 = b.block();
        let b3 = b.block();

        b.move_to(b0, "i", Operand::lit(0));
        b.edge(b0, b1);

        let cond = b.arith(b1, Opcode::Cmp, Operand::name("i"), Operand::lit(10));
        b.branch(b1, Opcode::Bge, Operand::temp(cond), b3);
        b.edge(b1, b2);
        b.edge(b1, b3);
        b.mark_while(b1, b2, b3);

        let next = b.arith(b2, Opcode::Add, Operand::name("i"), Operand::lit(1));
        let step = b.move_to(b2, "i", Operand::temp(next));
        b.jump(b2, b1);
        b.edge(b2, b1);

        b.ret(b3, None);

        let (mut program, table) = b.finish().unwrap();
        dominance::build(&mut program);
        construct(&mut program, &table);

        let phi = program.instr(program.block(b1).instrs[0]);
        assert_eq!(Opcode::Phi, phi.op);
        assert_eq!(2, phi.args.len());
        let versions: Vec<_> = phi
            .args
            .iter()
            .map(|a| a.as_var().unwrap().version)
            .collect();
        // One entry from the preheader move, one from the latch move.
        assert!(versions.contains(&step.0));
        assert_eq!(2, versions.len());
    }

    #[test]
    fn calls_grow_global_reloads() {
        let mut b = ProgramBuilder::new();
        b.global("g");
        let f = b.function("touch", Type::Void, &[]);
        b.begin_function(f);
        let fb = b.block();
        b.move_to(fb, "g", Operand::lit(1));
        b.ret(fb, None);
        b.end_function();

        let b0 = b.block();
        b.call(b0, "touch", vec![]);
        b.write(b0, Operand::name("g"));
        b.ret(b0, None);

        let (mut program, table) = b.finish().unwrap();
        dominance::build(&mut program);
        construct(&mut program, &table);

        let instrs = program.live_instrs(b0);
        let reload = instrs
            .iter()
            .map(|&id| program.instr(id))
            .find(|i| i.op == Opcode::LoadGlobal)
            .expect("a call should be followed by a global reload");
        // The write reads the reloaded version, not the entry version.
        let write = instrs
            .iter()
            .map(|&id| program.instr(id))
            .find(|i| i.op == Opcode::Write)
            .unwrap();
        assert_eq!(
            Some(&Variable::new("g", reload.seq.0)),
            write.src.as_ref().and_then(Operand::as_var)
        );
    }
}
