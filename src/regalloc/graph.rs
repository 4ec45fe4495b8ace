//! The interference graph and its Chaitin-Briggs coloring.

use std::collections::HashMap;

use log::trace;

use crate::ir::{Operand, Slot};

use super::LiveSet;

/// One node per distinct live value (a named variable version or an
/// instruction temporary). Nodes are never removed from the arena; the
/// simplify phase "removes" a node by setting its deleted flag, which
/// keeps neighbor counts consistent while the stack is built.
#[derive(Debug)]
pub(crate) struct GraphNode {
    pub value: Operand,
    pub neighbors: Vec<usize>,
    pub deleted: bool,
    pub troublesome: bool,
    pub spilled: bool,
    pub color: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct InterferenceGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<Operand, usize>,
}

impl InterferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_for(&mut self, value: &Operand) -> usize {
        if let Some(&index) = self.index.get(value) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(GraphNode {
            value: value.clone(),
            neighbors: Vec::new(),
            deleted: false,
            troublesome: false,
            spilled: false,
            color: None,
        });
        self.index.insert(value.clone(), index);
        index
    }

    /// Every pair of values simultaneously live at one program point
    /// interferes.
    pub fn add_clique(&mut self, live: &LiveSet) {
        let members: Vec<usize> = live.iter().map(|value| self.node_for(value)).collect();
        for &a in &members {
            for &b in &members {
                if a != b && !self.nodes[a].neighbors.contains(&b) {
                    self.nodes[a].neighbors.push(b);
                }
            }
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &Operand> {
        self.nodes.iter().map(|node| &node.value)
    }

    pub fn slot_of(&self, value: &Operand) -> Option<Slot> {
        let &index = self.index.get(value)?;
        let node = &self.nodes[index];
        if node.spilled {
            Some(Slot::Spill)
        } else {
            node.color.map(Slot::Reg)
        }
    }

    fn live_degree(&self, index: usize) -> usize {
        self.nodes[index]
            .neighbors
            .iter()
            .filter(|&&n| !self.nodes[n].deleted)
            .count()
    }

    /// Chaitin-Briggs simplify/select with optimistic coloring.
    ///
    /// Simplify: repeatedly push any node with fewer than `registers` live
    /// neighbors; when none exists, force-push the highest-degree node and
    /// mark it troublesome. Select: pop in reverse, assigning the lowest
    /// color no colored neighbor uses; a node with no free color spills.
    pub fn color(&mut self, registers: usize) {
        let mut stack: Vec<usize> = Vec::with_capacity(self.nodes.len());
        while stack.len() < self.nodes.len() {
            let mut max_degree = None;
            let mut max_node = None;
            let mut found = false;
            for index in 0..self.nodes.len() {
                if self.nodes[index].deleted {
                    continue;
                }
                let degree = self.live_degree(index);
                if max_degree.map(|d| degree > d).unwrap_or(true) {
                    max_degree = Some(degree);
                    max_node = Some(index);
                }
                if degree < registers {
                    stack.push(index);
                    self.nodes[index].deleted = true;
                    found = true;
                    break;
                }
            }
            if !found {
                let index = max_node.expect("non-empty graph without a maximum node");
                trace!("regalloc: {} is troublesome", self.nodes[index].value);
                self.nodes[index].troublesome = true;
                self.nodes[index].deleted = true;
                stack.push(index);
            }
        }

        while let Some(index) = stack.pop() {
            self.nodes[index].deleted = false;
            let color = self.next_free_color(index, registers);
            match color {
                Some(color) => self.nodes[index].color = Some(color),
                None => {
                    trace!("regalloc: spilling {}", self.nodes[index].value);
                    self.nodes[index].spilled = true;
                    self.nodes[index].color = None;
                }
            }
        }
    }

    fn next_free_color(&self, index: usize, registers: usize) -> Option<usize> {
        (0..registers).find(|&color| {
            self.nodes[index]
                .neighbors
                .iter()
                .all(|&n| self.nodes[n].color != Some(color))
        })
    }

    /// Check a finished coloring: adjacent nodes either differ in color or
    /// at least one of them spilled.
    #[cfg(test)]
    pub fn is_valid_coloring(&self) -> bool {
        self.nodes.iter().enumerate().all(|(index, node)| {
            node.neighbors.iter().all(|&n| {
                node.spilled
                    || self.nodes[n].spilled
                    || node.color != self.nodes[n].color
                    || index == n
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn clique(graph: &mut InterferenceGraph, names: &[&str]) {
        let live: LiveSet = names.iter().map(|n| Operand::name(*n)).collect();
        graph.add_clique(&live);
    }

    #[test]
    fn small_graph_colors_without_spills() {
        let mut graph = InterferenceGraph::new();
        clique(&mut graph, &["a", "b"]);
        clique(&mut graph, &["b", "c"]);

        graph.color(2);

        assert!(graph.is_valid_coloring());
        assert_ne!(
            graph.slot_of(&Operand::name("a")),
            graph.slot_of(&Operand::name("b"))
        );
        assert!(graph.values().count() == 3);
    }

    #[test]
    fn clique_larger_than_palette_spills() {
        let mut graph = InterferenceGraph::new();
        clique(&mut graph, &["a", "b", "c", "d"]);

        graph.color(2);

        assert!(graph.is_valid_coloring());
        let spilled = ["a", "b", "c", "d"]
            .iter()
            .filter(|n| graph.slot_of(&Operand::name(**n)) == Some(Slot::Spill))
            .count();
        assert_eq!(2, spilled);
    }

    #[test]
    fn coloring_is_a_proper_coloring_on_a_cycle() {
        // Odd cycle: needs three colors, so with three registers no node
        // spills and all adjacent pairs differ.
        let mut graph = InterferenceGraph::new();
        for pair in [["a", "b"], ["b", "c"], ["c", "d"], ["d", "e"], ["e", "a"]] {
            clique(&mut graph, &pair);
        }

        graph.color(3);

        assert!(graph.is_valid_coloring());
        let colors: HashSet<_> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| graph.slot_of(&Operand::name(*n)))
            .collect();
        assert!(!colors.contains(&Some(Slot::Spill)));
    }
}
