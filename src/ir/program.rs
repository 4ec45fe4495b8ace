//! The program arena and its graph traversal substrate.

use std::fmt::Write;

use crate::error::{CompileError, Result};

use super::block::Block;
use super::instr::{BlockId, Instr, InstrId, Opcode, Operand};
use super::symbols::SymbolTable;

/// A whole program in flat form: one instruction arena, one block arena,
/// and the entry/exit blocks of every independent control-flow subgraph.
///
/// Blocks and instructions are addressed by stable integer ids; edges are
/// id lists. Nothing is ever physically removed — deletion is a soft flag —
/// so ids stay valid for the entire compilation.
///
/// `roots` holds one entry block per function, in declaration order, with
/// the top-level entry last. `exits` holds every block that ends in a
/// return.
#[derive(Debug)]
pub struct Program {
    pub instrs: Vec<Instr>,
    pub blocks: Vec<Block>,
    pub roots: Vec<BlockId>,
    pub exits: Vec<BlockId>,
}

impl Default for Program {
    fn default() -> Self {
        // Sequence numbers start at 1. Version 0 of a variable means "the
        // value on entry", so slot 0 of the arena is a permanently deleted
        // sentinel that never names a definition.
        let mut sentinel = Instr::new(InstrId(0), Opcode::WriteNl);
        sentinel.deleted = true;
        Self {
            instrs: vec![sentinel],
            blocks: Vec::new(),
            roots: Vec::new(),
            exits: Vec::new(),
        }
    }
}

impl Program {
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.0]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        &mut self.instrs[id.0]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    /// Allocate a fresh instruction at the tail of the arena. The caller
    /// splices the returned id into a block's instruction list.
    pub fn create_instr(&mut self, op: Opcode) -> InstrId {
        let id = InstrId(self.instrs.len());
        self.instrs.push(Instr::new(id, op));
        id
    }

    /// Ids of the non-deleted instructions of a block, in order.
    pub fn live_instrs(&self, block: BlockId) -> Vec<InstrId> {
        self.block(block)
            .instrs
            .iter()
            .copied()
            .filter(|&id| !self.instr(id).deleted)
            .collect()
    }

    /// Clear the shared visited flag on every block. Must run before each
    /// independent traversal; traversals never interleave.
    pub fn reset_visited(&mut self) {
        for block in &mut self.blocks {
            block.visited = false;
        }
    }

    /// DFS preorder over successor edges.
    pub fn forward_order(&mut self, root: BlockId) -> Vec<BlockId> {
        self.reset_visited();
        let mut order = Vec::new();
        self.dfs_succs(root, &mut order);
        order
    }

    fn dfs_succs(&mut self, block: BlockId, order: &mut Vec<BlockId>) {
        self.block_mut(block).visited = true;
        order.push(block);
        for succ in self.block(block).succs.clone() {
            if !self.block(succ).visited {
                self.dfs_succs(succ, order);
            }
        }
    }

    /// DFS preorder over predecessor edges.
    pub fn backward_order(&mut self, exit: BlockId) -> Vec<BlockId> {
        self.reset_visited();
        let mut order = Vec::new();
        self.dfs_preds(exit, &mut order);
        order
    }

    fn dfs_preds(&mut self, block: BlockId, order: &mut Vec<BlockId>) {
        self.block_mut(block).visited = true;
        order.push(block);
        for pred in self.block(block).preds.clone() {
            if !self.block(pred).visited {
                self.dfs_preds(pred, order);
            }
        }
    }

    /// Breadth-first order over the immediate-dominator tree.
    pub fn dominator_order(&mut self, root: BlockId) -> Vec<BlockId> {
        self.reset_visited();
        self.bfs(root, |program, block| program.block(block).dom_children.clone())
    }

    /// Breadth-first order over the reverse-dominator tree.
    pub fn reverse_dominator_order(&mut self, exit: BlockId) -> Vec<BlockId> {
        self.reset_visited();
        self.bfs(exit, |program, block| {
            program.block(block).rdom_children.clone()
        })
    }

    fn bfs(
        &mut self,
        root: BlockId,
        children: impl Fn(&Self, BlockId) -> Vec<BlockId>,
    ) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        self.block_mut(root).visited = true;
        queue.push_back(root);
        while let Some(block) = queue.pop_front() {
            order.push(block);
            for child in children(self, block) {
                if !self.block(child).visited {
                    self.block_mut(child).visited = true;
                    queue.push_back(child);
                }
            }
        }
        order
    }

    /// The first non-deleted instruction reachable from `block`, following
    /// the unique remaining successor of soft-deleted blocks. `None` means
    /// the input is malformed (a branch into dead code).
    pub fn first_live_instr(&self, mut block: BlockId) -> Option<InstrId> {
        let mut hops = 0;
        while self.block(block).deleted {
            block = *self.block(block).succs.first()?;
            hops += 1;
            if hops > self.blocks.len() {
                return None;
            }
        }
        self.block(block)
            .instrs
            .iter()
            .copied()
            .find(|&id| !self.instr(id).deleted)
    }

    /// Follow the unique-successor chain of soft-deleted blocks to the
    /// first live block.
    pub fn live_successor(&self, mut block: BlockId) -> Option<BlockId> {
        let mut hops = 0;
        while self.block(block).deleted {
            block = *self.block(block).succs.first()?;
            hops += 1;
            if hops > self.blocks.len() {
                return None;
            }
        }
        Some(block)
    }

    /// Wire up the graph after construction: derive predecessor lists from
    /// the successor lists, resolve every call to its callee's entry block,
    /// and validate branch shapes. All failures are fatal IR malformations.
    pub fn link(&mut self, table: &SymbolTable) -> Result<()> {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        for index in 0..self.blocks.len() {
            let id = BlockId(index);
            for succ in self.block(id).succs.clone() {
                if succ.0 >= self.blocks.len() {
                    return Err(CompileError::malformed(
                        0,
                        format!("edge to nonexistent block {}", succ),
                    ));
                }
                let preds = &mut self.block_mut(succ).preds;
                if !preds.contains(&id) {
                    preds.push(id);
                }
            }
        }

        for index in 0..self.instrs.len() {
            let id = InstrId(index);
            let instr = self.instr(id);
            match instr.op {
                Opcode::Call => {
                    let name = match &instr.src {
                        Some(Operand::Var(variable)) => variable.name.clone(),
                        _ => {
                            return Err(CompileError::malformed(index, "call without callee name"))
                        }
                    };
                    let arity = instr.args.len();
                    let func = table.lookup_function(&name, arity)?;
                    let entry = table.function(func).entry();
                    self.instr_mut(id).call_target = Some(entry);
                }
                op if op.is_branch() => {
                    let target = instr
                        .branch_target()
                        .ok_or_else(|| CompileError::malformed(index, "branch without target"))?;
                    if target.0 >= self.blocks.len() {
                        return Err(CompileError::malformed(
                            index,
                            format!("branch to nonexistent block {}", target),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Soft-delete blocks that hold no live instructions and bypass them:
    /// their predecessors are re-targeted at the unique successor, and
    /// function entries that became empty are re-pointed in the symbol
    /// table and at every call site.
    ///
    /// Only blocks with exactly one successor are deleted, which is what
    /// guarantees the unique-successor chase in `first_live_instr`.
    pub fn sweep_empty_blocks(&mut self, table: &mut SymbolTable) {
        for root in self.roots.clone() {
            let order = self.forward_order(root);
            for block in order {
                let empty = self.live_instrs(block).is_empty();
                if empty && self.block(block).succs.len() == 1 {
                    self.block_mut(block).deleted = true;
                }
            }
        }

        for index in 0..self.blocks.len() {
            let id = BlockId(index);
            if !self.block(id).deleted {
                continue;
            }
            let Some(child) = self.live_successor(id) else {
                continue;
            };

            if let Some(root_pos) = self.roots.iter().position(|&r| r == id) {
                self.roots[root_pos] = child;
                if let Some(scope) = self.block(id).scope {
                    table.function_mut(scope).set_entry(child);
                    for instr in &mut self.instrs {
                        if instr.op == Opcode::Call && instr.call_target == Some(id) {
                            instr.call_target = Some(child);
                        }
                    }
                }
                continue;
            }

            for pred in self.block(id).preds.clone() {
                for instr_id in self.block(pred).instrs.clone() {
                    if self.instr(instr_id).branch_target() == Some(id) {
                        self.instr_mut(instr_id).retarget_branch(child);
                    }
                }
                let succs = &mut self.block_mut(pred).succs;
                succs.retain(|&s| s != id);
                if !succs.contains(&child) {
                    succs.push(child);
                }
                let child_preds = &mut self.block_mut(child).preds;
                child_preds.retain(|&p| p != id);
                if !child_preds.contains(&pred) {
                    child_preds.push(pred);
                }
            }
        }
    }

    /// Text listing of every live instruction, block by block. Used by the
    /// tests to compare instruction streams.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if block.deleted {
                continue;
            }
            let live: Vec<_> = block
                .instrs
                .iter()
                .filter(|&&id| !self.instr(id).deleted)
                .collect();
            if live.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}:", block.id);
            for &id in live {
                let _ = writeln!(out, "  {}", self.instr(id));
            }
        }
        out
    }
}
