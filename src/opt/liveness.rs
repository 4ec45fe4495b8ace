//! Backward liveness analysis and dead-code elimination.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::ir::{BlockId, Instr, InstrId, Opcode, Operand, Program};

use super::{reverse_bfs_process, GlobalPass};

/// The variables and temporaries live at a program point.
pub(crate) type LiveSet = HashSet<Operand>;

/// The liveness dataflow pass. `process` flows live sets backwards through
/// each block (union at control-flow splits, driven to a fixpoint by the
/// framework); `optimize` is dead-code elimination: it soft-deletes every
/// value-producing instruction whose value is dead at its exit.
///
/// Calls and branches are never deleted here — calls may have global side
/// effects, and branches are control, not data.
pub(crate) struct Liveness {
    block_in: HashMap<BlockId, LiveSet>,
    entries: HashMap<InstrId, LiveSet>,
    exits: HashMap<InstrId, LiveSet>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            block_in: HashMap::new(),
            entries: HashMap::new(),
            exits: HashMap::new(),
        }
    }

    pub fn into_entries(self) -> HashMap<InstrId, LiveSet> {
        self.entries
    }

    /// Apply one instruction's transfer function to its exit set, yielding
    /// its entry set.
    fn transfer(instr: &Instr, live: &mut LiveSet) {
        let add = |live: &mut LiveSet, operand: &Option<Operand>| {
            if let Some(name) = operand.as_ref().and_then(Operand::live_name) {
                live.insert(name);
            }
        };
        match instr.op {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Cmp
            | Opcode::Adda => {
                live.remove(&instr.value());
                add(live, &instr.src);
                add(live, &instr.dst);
            }
            Opcode::Beq
            | Opcode::Bne
            | Opcode::Blt
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble => add(live, &instr.src),
            Opcode::Write | Opcode::StoreGlobal => add(live, &instr.src),
            Opcode::Store => {
                add(live, &instr.src);
                add(live, &instr.dst);
            }
            Opcode::Read => {
                live.remove(&instr.value());
            }
            Opcode::Load => {
                live.remove(&instr.value());
                add(live, &instr.src);
            }
            Opcode::LoadGlobal => {
                if let Some(src) = &instr.src {
                    live.remove(src);
                }
            }
            Opcode::Move => {
                if let Some(dst) = &instr.dst {
                    live.remove(dst);
                }
                add(live, &instr.src);
            }
            Opcode::Ret => {
                live.clear();
                add(live, &instr.src);
            }
            Opcode::Call => {
                for arg in &instr.args {
                    if let Some(name) = arg.live_name() {
                        live.insert(name);
                    }
                }
            }
            Opcode::Phi => {
                if let Some(src) = &instr.src {
                    live.remove(src);
                }
                for arg in &instr.args {
                    if let Some(name) = arg.live_name() {
                        live.insert(name);
                    }
                }
            }
            Opcode::Bra | Opcode::WriteNl => {}
        }
    }
}

impl GlobalPass for Liveness {
    fn process(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        let mut input = LiveSet::new();
        for succ in program.block(block).succs.clone() {
            if let Some(live) = self.block_in.get(&succ) {
                input.extend(live.iter().cloned());
            }
        }

        let terms = program.live_instrs(block);
        let Some(&last) = terms.last() else {
            self.block_in.insert(block, input);
            return Ok(false);
        };

        let change = match self.exits.get(&last) {
            None => true,
            Some(existing) => *existing != input,
        };
        if change {
            self.exits.insert(last, input);
        }

        for index in (0..terms.len()).rev() {
            let term = terms[index];
            let mut live = self.exits.get(&term).cloned().unwrap_or_default();
            Self::transfer(program.instr(term), &mut live);
            self.entries.insert(term, live.clone());
            if index == 0 {
                self.block_in.insert(block, live);
            } else {
                self.exits.insert(terms[index - 1], live);
            }
        }
        Ok(change)
    }

    fn optimize(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        let mut change = false;
        for &term in program.live_instrs(block).iter().rev() {
            let Some(exit) = self.exits.get(&term) else {
                debug_assert!(false, "liveness optimize before convergence");
                continue;
            };
            let instr = program.instr(term);
            let dead = match instr.op {
                op if op.is_arithmetic() => !exit.contains(&instr.value()),
                Opcode::Load | Opcode::Read => !exit.contains(&instr.value()),
                Opcode::LoadGlobal | Opcode::Phi => instr
                    .src
                    .as_ref()
                    .map(|src| !exit.contains(src))
                    .unwrap_or(false),
                Opcode::Move => instr
                    .dst
                    .as_ref()
                    .map(|dst| !exit.contains(dst))
                    .unwrap_or(false),
                _ => false,
            };
            if dead {
                program.instr_mut(term).deleted = true;
                change = true;
            }
        }
        Ok(change)
    }
}

/// Standalone liveness for register allocation: one shared analysis run to
/// a fixpoint from every exit, returning the live-in set of every
/// instruction.
pub(crate) fn analyse(program: &mut Program) -> HashMap<InstrId, LiveSet> {
    let mut pass = Liveness::new();
    for exit in program.exits.clone() {
        while reverse_bfs_process(program, exit, &mut pass).unwrap_or(false) {}
    }
    pass.into_entries()
}
