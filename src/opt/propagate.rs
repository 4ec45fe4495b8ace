//! Available-expression analyses: common-subexpression elimination and
//! copy/constant propagation, plus redundant global-store removal.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::Result;
use crate::ir::{BlockId, InstrId, Opcode, Operand, Program};

use super::{substitute, GlobalPass};

/// One available fact. For expression availability this is an
/// operator+operands triple; for copy availability it is a move's
/// source/destination pair. `seq` records the instruction of origin and is
/// excluded from equality and hashing, so a set never holds two origins of
/// the same fact — the earliest insertion wins, which is exactly what the
/// substitution wants to redirect later computations to.
#[derive(Debug, Clone)]
pub(crate) struct AvailExpr {
    seq: InstrId,
    op: Opcode,
    src: Option<Operand>,
    dst: Option<Operand>,
}

impl PartialEq for AvailExpr {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.src == other.src && self.dst == other.dst
    }
}
impl Eq for AvailExpr {}
impl Hash for AvailExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.op.hash(state);
        self.src.hash(state);
        self.dst.hash(state);
    }
}

/// Intersection that only keeps a fact if the other side derived it from
/// the same origin instruction; a common expression reached through
/// different computations on different paths is not available.
fn intersect_keeping_origin(acc: &mut HashSet<AvailExpr>, other: &HashSet<AvailExpr>) {
    acc.retain(|fact| other.iter().any(|o| o.seq == fact.seq && o == fact));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    /// Arithmetic facts, met by intersection: CSE.
    Expressions,
    /// Move facts, met by union: copy/constant propagation.
    Copies,
}

/// The forward meet-over-paths pass shared by CSE and CP. `process` flows
/// fact sets across the blocks (it is re-run to a fixpoint by the
/// framework), `optimize` rewrites using the converged per-instruction
/// entry sets.
pub(crate) struct AvailablePass {
    kind: Availability,
    block_out: HashMap<BlockId, HashSet<AvailExpr>>,
    entries: HashMap<InstrId, HashSet<AvailExpr>>,
}

impl AvailablePass {
    pub fn expressions() -> Self {
        Self::new(Availability::Expressions)
    }

    pub fn copies() -> Self {
        Self::new(Availability::Copies)
    }

    fn new(kind: Availability) -> Self {
        Self {
            kind,
            block_out: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn generated(&self, program: &Program, id: InstrId) -> Option<AvailExpr> {
        let instr = program.instr(id);
        let wanted = match self.kind {
            Availability::Expressions => instr.op.is_arithmetic(),
            Availability::Copies => instr.op == Opcode::Move,
        };
        wanted.then(|| AvailExpr {
            seq: id,
            op: instr.op,
            src: instr.src.clone(),
            dst: instr.dst.clone(),
        })
    }
}

impl GlobalPass for AvailablePass {
    fn process(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        let mut input: Option<HashSet<AvailExpr>> = None;
        for pred in program.block(block).preds.clone() {
            let incoming = self.block_out.get(&pred).cloned().unwrap_or_default();
            match &mut input {
                None => input = Some(incoming),
                Some(acc) => match self.kind {
                    Availability::Expressions => intersect_keeping_origin(acc, &incoming),
                    Availability::Copies => acc.extend(incoming),
                },
            }
        }
        let input = input.unwrap_or_default();

        let terms = program.live_instrs(block);
        let Some(&first) = terms.first() else {
            self.block_out.insert(block, input);
            return Ok(false);
        };

        let change = match self.entries.get(&first) {
            None => true,
            Some(existing) => *existing != input,
        };
        if change {
            self.entries.insert(first, input);
        }

        let mut flowing = self.entries[&first].clone();
        for (index, &term) in terms.iter().enumerate() {
            if let Some(fact) = self.generated(program, term) {
                flowing.insert(fact);
            }
            match terms.get(index + 1) {
                Some(&next) => {
                    self.entries.insert(next, flowing.clone());
                }
                None => {
                    self.block_out.insert(block, flowing.clone());
                }
            }
        }
        Ok(change)
    }

    fn optimize(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        match self.kind {
            Availability::Expressions => self.optimize_expressions(program, block),
            Availability::Copies => self.optimize_copies(program, block),
        }
    }
}

impl AvailablePass {
    fn optimize_expressions(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        let mut change = false;
        for id in program.live_instrs(block) {
            if !program.instr(id).op.is_arithmetic() {
                continue;
            }
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let instr = program.instr(id);
            let here = AvailExpr {
                seq: id,
                op: instr.op,
                src: instr.src.clone(),
                dst: instr.dst.clone(),
            };
            let earlier: Vec<InstrId> = entry
                .iter()
                .filter(|fact| **fact == here)
                .map(|fact| fact.seq)
                .collect();
            for origin in earlier {
                if substitute(program, &Operand::temp(id), &Operand::temp(origin)) {
                    change = true;
                }
            }
        }
        Ok(change)
    }

    fn optimize_copies(&mut self, program: &mut Program, block: BlockId) -> Result<bool> {
        let mut change = false;
        for id in program.live_instrs(block) {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let facts: Vec<AvailExpr> = entry.iter().cloned().collect();
            let op = program.instr(id).op;
            match op {
                op if op.is_arithmetic() || op == Opcode::Store => {
                    let instr = program.instr_mut(id);
                    for fact in &facts {
                        // Identity copies carry no information and must
                        // not count as rewrites, or the driver never
                        // converges.
                        if fact.src == fact.dst {
                            continue;
                        }
                        if instr.src == fact.dst {
                            instr.src = fact.src.clone();
                            change = true;
                        }
                        if instr.dst == fact.dst {
                            instr.dst = fact.src.clone();
                            change = true;
                        }
                    }
                }
                Opcode::StoreGlobal | Opcode::Write | Opcode::Move => {
                    let instr = program.instr_mut(id);
                    for fact in &facts {
                        if fact.src == fact.dst {
                            continue;
                        }
                        if instr.src == fact.dst {
                            instr.src = fact.src.clone();
                            change = true;
                        }
                    }
                }
                Opcode::Ret => {
                    let instr = program.instr_mut(id);
                    if instr.src.is_some() {
                        for fact in &facts {
                            if fact.src == fact.dst {
                                continue;
                            }
                            if instr.src == fact.dst {
                                instr.src = fact.src.clone();
                                change = true;
                            }
                        }
                    }
                }
                Opcode::Call => {
                    let instr = program.instr_mut(id);
                    for fact in &facts {
                        let (Some(from), Some(to)) = (&fact.dst, &fact.src) else {
                            continue;
                        };
                        if from == to {
                            continue;
                        }
                        for arg in &mut instr.args {
                            if arg == from {
                                *arg = to.clone();
                                change = true;
                            }
                        }
                    }
                }
                Opcode::Phi => {
                    if self.propagate_into_phi(program, id, &facts) {
                        change = true;
                    }
                }
                _ => {}
            }
        }
        Ok(change)
    }

    /// Propagation into a phi additionally prunes inputs that become
    /// duplicates of another input or self-loops on the phi's own value.
    fn propagate_into_phi(
        &mut self,
        program: &mut Program,
        id: InstrId,
        facts: &[AvailExpr],
    ) -> bool {
        let mut change = false;
        let instr = program.instr_mut(id);
        let mut removes = Vec::new();
        for fact in facts {
            let (Some(from), Some(to)) = (&fact.dst, &fact.src) else {
                continue;
            };
            if from == to {
                continue;
            }
            for index in 0..instr.args.len() {
                if &instr.args[index] != from {
                    continue;
                }
                let duplicate = instr
                    .args
                    .iter()
                    .enumerate()
                    .any(|(other, arg)| other != index && arg == to);
                let own_value = match (&instr.src, to) {
                    (Some(Operand::Var(column)), Operand::Var(incoming)) => {
                        column.name == incoming.name && incoming.version == instr.seq.0
                    }
                    _ => false,
                };
                if duplicate || own_value {
                    removes.push(index);
                }
                instr.args[index] = to.clone();
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
        change
    }
}

/// Delete `SG` shadows that store a global's own unversioned value back to
/// its cell: the cell already holds exactly that value.
pub(crate) fn remove_redundant_stores(program: &mut Program, root: BlockId) -> bool {
    let mut change = false;
    for block in program.forward_order(root) {
        for id in program.live_instrs(block) {
            let instr = program.instr(id);
            if instr.op != Opcode::StoreGlobal {
                continue;
            }
            let redundant = match (&instr.src, &instr.store_name) {
                (Some(Operand::Var(variable)), Some(name)) => {
                    variable.version == 0 && variable.name == *name
                }
                _ => false,
            };
            if redundant {
                program.instr_mut(id).deleted = true;
                change = true;
            }
        }
    }
    change
}
