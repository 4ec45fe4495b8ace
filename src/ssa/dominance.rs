//! Dominator and reverse-dominator tree construction.
//!
//! Dominance is computed by brute force, one candidate at a time: mark the
//! candidate visited, run a reachability DFS from the root, and everything
//! the DFS could not reach is dominated by the candidate. This is
//! O(V·(V+E)) per root, which is fine at the block counts this compiler
//! sees, and it needs no auxiliary machinery beyond the shared visited
//! flag. The immediate-dominator tree then falls out of a preorder claim
//! pass over the dominance sets.

use log::debug;

use crate::ir::{BlockId, Program};

/// The DFS preorder forests the dominance computation walked: one tree of
/// blocks per root (over successor edges) and one per exit (over
/// predecessor edges). Later phases reuse these as the per-root block
/// universe.
#[derive(Debug)]
pub struct Forests {
    pub forward: Vec<Vec<BlockId>>,
    pub reverse: Vec<Vec<BlockId>>,
}

/// Compute dominator and reverse-dominator trees for every root and exit.
pub fn build(program: &mut Program) -> Forests {
    for block in &mut program.blocks {
        block.doms.clear();
        block.dom_children.clear();
        block.rdoms.clear();
        block.rdom_children.clear();
    }

    let forward: Vec<_> = program
        .roots
        .clone()
        .into_iter()
        .map(|root| program.forward_order(root))
        .collect();
    let reverse: Vec<_> = program
        .exits
        .clone()
        .into_iter()
        .map(|exit| program.backward_order(exit))
        .collect();

    for forest in &forward {
        compute_tree(program, forest, Direction::Forward);
    }
    for forest in &reverse {
        compute_tree(program, forest, Direction::Backward);
    }

    debug!(
        "dominance: {} forward tree(s), {} reverse tree(s)",
        forward.len(),
        reverse.len()
    );
    Forests { forward, reverse }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

fn compute_tree(program: &mut Program, forest: &[BlockId], direction: Direction) {
    let root = forest[0];

    // The root dominates everything it reaches.
    for &member in &forest[1..] {
        push_dom(program, root, member, direction);
    }

    // Everything unreachable without passing through the candidate is
    // dominated by it. The sets come out in forest preorder, which the
    // claim pass below depends on: a dominator always precedes its
    // dominees.
    for index in 1..forest.len() {
        let candidate = forest[index];
        program.reset_visited();
        program.block_mut(candidate).visited = true;
        reach(program, root, direction);
        for &member in &forest[1..] {
            if !program.block(member).visited {
                push_dom(program, candidate, member, direction);
            }
        }
    }

    program.reset_visited();
    claim(program, root, None, direction);
}

fn push_dom(program: &mut Program, dominator: BlockId, dominee: BlockId, direction: Direction) {
    let block = program.block_mut(dominator);
    match direction {
        Direction::Forward => block.doms.push(dominee),
        Direction::Backward => block.rdoms.push(dominee),
    }
}

fn reach(program: &mut Program, block: BlockId, direction: Direction) {
    program.block_mut(block).visited = true;
    let next = match direction {
        Direction::Forward => program.block(block).succs.clone(),
        Direction::Backward => program.block(block).preds.clone(),
    };
    for edge in next {
        if !program.block(edge).visited {
            reach(program, edge, direction);
        }
    }
}

/// Preorder claim pass: each block becomes the tree parent of exactly the
/// blocks it dominates that have not been claimed by a closer dominator
/// already.
fn claim(program: &mut Program, block: BlockId, parent: Option<BlockId>, direction: Direction) {
    program.block_mut(block).visited = true;
    if let Some(parent) = parent {
        let parent = program.block_mut(parent);
        match direction {
            Direction::Forward => parent.dom_children.push(block),
            Direction::Backward => parent.rdom_children.push(block),
        }
    }
    let dominees = match direction {
        Direction::Forward => program.block(block).doms.clone(),
        Direction::Backward => program.block(block).rdoms.clone(),
    };
    for dominee in dominees {
        if !program.block(dominee).visited {
            claim(program, dominee, Some(block), direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Opcode, SymbolTable};

    /// Build a program from an edge list; block 0 is the root and the
    /// highest-numbered block is the exit (it gets a RET).
    fn graph(blocks: usize, edges: &[(usize, usize)]) -> Program {
        let mut program = Program::default();
        for index in 0..blocks {
            program.blocks.push(Block::new(BlockId(index), None));
            let instr = program.create_instr(Opcode::WriteNl);
            program.block_mut(BlockId(index)).instrs.push(instr);
        }
        for &(from, to) in edges {
            program.block_mut(BlockId(from)).succs.push(BlockId(to));
        }
        let exit = BlockId(blocks - 1);
        let ret = program.create_instr(Opcode::Ret);
        program.block_mut(exit).instrs.push(ret);
        program.roots = vec![BlockId(0)];
        program.exits = vec![exit];
        program.link(&SymbolTable::new()).unwrap();
        program
    }

    fn doms_of(program: &Program, block: usize) -> Vec<usize> {
        let mut doms: Vec<_> = program
            .block(BlockId(block))
            .doms
            .iter()
            .map(|b| b.0)
            .collect();
        doms.sort_unstable();
        doms
    }

    /// Reference definition: A dominates B iff removing A disconnects B
    /// from the root. The root trivially dominates every other block.
    fn brute_force_doms(program: &mut Program, dominator: usize, blocks: usize) -> Vec<usize> {
        if dominator == 0 {
            return (1..blocks).collect();
        }
        let mut dominated = Vec::new();
        for target in 0..blocks {
            if target == dominator {
                continue;
            }
            program.reset_visited();
            program.block_mut(BlockId(dominator)).visited = true;
            reach(program, BlockId(0), Direction::Forward);
            if !program.block(BlockId(target)).visited {
                dominated.push(target);
            }
        }
        dominated
    }

    #[test]
    fn diamond_dominance() {
        // 0 -> 1 -> {2, 3} -> 4 -> 5
        let mut program = graph(
            6,
            &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 5)],
        );
        build(&mut program);

        assert_eq!(vec![1, 2, 3, 4, 5], doms_of(&program, 0));
        assert_eq!(vec![2, 3, 4, 5], doms_of(&program, 1));
        assert!(doms_of(&program, 2).is_empty());
        assert!(doms_of(&program, 3).is_empty());
        assert_eq!(vec![5], doms_of(&program, 4));

        // The tree claims each block for its nearest dominator.
        assert_eq!(vec![BlockId(1)], program.block(BlockId(0)).dom_children);
        let mut children: Vec<_> = program
            .block(BlockId(1))
            .dom_children
            .iter()
            .map(|b| b.0)
            .collect();
        children.sort_unstable();
        assert_eq!(vec![2, 3, 4], children);
    }

    #[test]
    fn loop_dominance_matches_brute_force() {
        // 0 -> 1 -> 2 -> 3 -> 1 (loop), 3 -> 4
        let mut program = graph(5, &[(0, 1), (1, 2), (2, 3), (3, 1), (3, 4)]);
        build(&mut program);

        for dominator in 0..5 {
            let expected = brute_force_doms(&mut program, dominator, 5);
            assert_eq!(expected, doms_of(&program, dominator), "block {}", dominator);
        }
    }

    #[test]
    fn reverse_tree_mirrors_forward_construction() {
        // Diamond again; reverse dominance from the exit.
        let mut program = graph(
            6,
            &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 5)],
        );
        build(&mut program);

        let mut rdoms: Vec<_> = program
            .block(BlockId(4))
            .rdoms
            .iter()
            .map(|b| b.0)
            .collect();
        rdoms.sort_unstable();
        assert_eq!(vec![0, 1, 2, 3], rdoms);
        assert!(program.block(BlockId(2)).rdoms.is_empty());
    }
}
