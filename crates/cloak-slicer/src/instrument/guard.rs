//! Locating the topmost secret-dependent branch that guards an access.

use super::{Instrumenter, ObjectSets};
use crate::loops::exited_loop;
use cloak_ir::{BlockId, NaturalLoop, NodeId, NodeKey, ProgramGraph};
use std::collections::HashSet;
use tracing::debug;

/// A point the upward search may continue from: a block, a node, or both.
pub type Candidate = (Option<BlockId>, Option<NodeId>);

struct Frame {
    /// Immediate dominator whose branch is accepted once every descent failed.
    dominator: Option<BlockId>,
    pending: Vec<Candidate>,
}

/// Reverse control predecessors of `node` that leave its function: entry pseudo-nodes and
/// nodes owned by another graph.
fn foreign_controllers(graph: &ProgramGraph, node: NodeId) -> Vec<Candidate> {
    let Some(n) = graph.nodes.get(&node) else {
        return Vec::new();
    };
    n.control
        .backward
        .iter()
        .filter_map(|&p| graph.nodes.get(&p))
        .filter(|p| matches!(p.key, NodeKey::Entry(_)) || p.graph != n.graph)
        .map(|p| (p.block, Some(p.id)))
        .collect()
}

fn block_marked(graph: &ProgramGraph, block: Option<BlockId>) -> bool {
    block
        .and_then(|b| graph.blocks.get(&b))
        .map_or(false, |b| b.is_marked())
}

fn node_marked(graph: &ProgramGraph, node: Option<NodeId>) -> bool {
    node.and_then(|n| graph.nodes.get(&n))
        .map_or(false, |n| n.is_marked())
}

impl Instrumenter<'_, '_> {
    fn frame(&self, (block, node): Candidate) -> Frame {
        let graph = &*self.cx.graph;
        let mut dominator = None;
        let mut children = Vec::new();

        if block_marked(graph, block) {
            if let Some(b) = block {
                dominator = graph.idom(b);
                if block_marked(graph, dominator) {
                    children.push((dominator, None));
                }
                if let Some(first) = graph.first_node(b) {
                    children.extend(foreign_controllers(graph, first));
                }
            }
        }
        if node_marked(graph, node) {
            if let Some(n) = node {
                children.extend(foreign_controllers(graph, n));
            }
        }

        children.reverse();
        Frame {
            dominator,
            pending: children,
        }
    }

    /// Branch ending `block` if the block and the branch are both marked.
    fn accept(&self, block: Option<BlockId>) -> Option<NodeId> {
        let graph = &*self.cx.graph;
        if !block_marked(graph, block) {
            return None;
        }
        let last = graph.last_node(block?)?;
        let node = graph.nodes.get(&last)?;
        if !node.is_marked() {
            return None;
        }
        let inst = self.cx.module.insts.get(&node.inst()?)?;
        inst.is_branch().then_some(last)
    }

    /// Search upward from `start` for the outermost guarding branch.
    ///
    /// Descends first (immediate dominator, then cross-function controllers of the block's
    /// first node, then those of the node) and only accepts a candidate's dominator branch
    /// once all its descents failed.
    pub(crate) fn find_guard(&self, start: Candidate) -> Option<NodeId> {
        let mut visited: HashSet<Candidate> = HashSet::new();
        visited.insert(start);
        let mut stack = vec![self.frame(start)];

        while let Some(top) = stack.last_mut() {
            if let Some(child) = top.pending.pop() {
                if visited.insert(child) {
                    let frame = self.frame(child);
                    stack.push(frame);
                }
                continue;
            }
            let done = stack.pop()?;
            if let Some(branch) = self.accept(done.dominator) {
                return Some(branch);
            }
        }
        None
    }

    /// Open at `branch`, unless it is the exit test of a loop around `block`: a start there
    /// would run once per iteration, so the whole loop is wrapped instead.
    fn place_guarded(&mut self, branch: NodeId, block: BlockId, sets: &ObjectSets) {
        let around = self
            .cx
            .graph
            .nodes
            .get(&branch)
            .and_then(|n| n.block)
            .and_then(|b| exited_loop(self.cx.graph, b))
            .filter(|found| found.contains(block));
        match around {
            Some(found) => {
                debug!(branch = %branch, header = %found.header, "guard exits an enclosing loop");
                self.place_loop(&found, sets);
            }
            None => self.place_branch(branch, sets),
        }
    }

    /// Find where to open a transaction covering `block` and place it.
    ///
    /// With `in_loop` set, `block` is the loop header and controllers inside the loop are
    /// ignored; if nothing guards the loop the loop itself is wrapped. Otherwise an
    /// address-dependent access without a guard gets its own block wrapped.
    pub(crate) fn guard_block(
        &mut self,
        block: BlockId,
        in_loop: Option<&NaturalLoop>,
        address_dependent: bool,
        sets: &ObjectSets,
    ) -> bool {
        let controllers = self.cx.graph.reverse_control_dependence(block).to_vec();
        for cd in controllers {
            if !block_marked(self.cx.graph, Some(cd)) {
                continue;
            }
            if in_loop.map_or(false, |l| l.contains(cd)) {
                continue;
            }
            let Some(last) = self.cx.graph.last_node(cd) else {
                continue;
            };
            if !node_marked(self.cx.graph, Some(last)) {
                continue;
            }
            let is_branch = self
                .cx
                .graph
                .nodes
                .get(&last)
                .and_then(|n| n.inst())
                .and_then(|i| self.cx.module.insts.get(&i))
                .map_or(false, |i| i.is_branch());
            if is_branch {
                let branch = self.find_guard((Some(cd), None)).unwrap_or(last);
                self.place_guarded(branch, block, sets);
                return true;
            }
        }

        if let Some(first) = self.cx.graph.first_node(block) {
            for candidate in foreign_controllers(self.cx.graph, first) {
                if let Some(branch) = self.find_guard(candidate) {
                    self.place_guarded(branch, block, sets);
                    return true;
                }
            }
        }

        match in_loop {
            Some(found) => self.place_loop(found, sets),
            None if address_dependent => self.place_block(block, sets),
            None => {}
        }
        false
    }
}
