//! Control-flow blocks.

use super::instr::{BlockId, InstrId};
use super::symbols::FuncId;

/// Structured-control shape of a block, preserved from the front end so the
/// code generator can walk nested constructs in source order instead of
/// re-deriving structure from the raw successor sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Common,
    /// A two-way branch header. `els` equals `join` when there is no else
    /// branch.
    If {
        then: BlockId,
        els: BlockId,
        join: BlockId,
    },
    /// A pre-test loop header.
    While { body: BlockId, exit: BlockId },
}

/// Structured pointers for a post-test loop, attached to the block that
/// starts the loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeat {
    pub compare: BlockId,
    pub exit: BlockId,
}

/// A basic block: an ordered run of instructions plus its graph edges and
/// the per-block state the analyses need.
///
/// The `visited` flag is shared by every graph traversal and must be reset
/// across the whole program before each independent traversal; traversals
/// never interleave. `deleted` blocks are kept in the arena (they always
/// have exactly one successor, which traversals follow through).
#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub instrs: Vec<InstrId>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    /// Blocks dominated by this block, in forest preorder.
    pub doms: Vec<BlockId>,
    /// Children in the immediate-dominator tree.
    pub dom_children: Vec<BlockId>,
    /// Blocks reverse-dominated by this block.
    pub rdoms: Vec<BlockId>,
    /// Children in the reverse-dominator tree.
    pub rdom_children: Vec<BlockId>,
    pub visited: bool,
    pub deleted: bool,
    /// Owning function; `None` for top-level code.
    pub scope: Option<FuncId>,
    pub kind: BlockKind,
    pub repeat: Option<Repeat>,
}

impl Block {
    pub fn new(id: BlockId, scope: Option<FuncId>) -> Self {
        Self {
            id,
            instrs: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
            doms: Vec::new(),
            dom_children: Vec::new(),
            rdoms: Vec::new(),
            rdom_children: Vec::new(),
            visited: false,
            deleted: false,
            scope,
            kind: BlockKind::Common,
            repeat: None,
        }
    }
}
