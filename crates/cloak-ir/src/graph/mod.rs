//! Program dependence graph.
//!
//! One [`DependenceGraph`] per defined function, all living in a single [`ProgramGraph`] arena
//! together with the program-global nodes. Blocks reuse the IR's [`BlockId`]s so a graph block
//! and its IR block are always addressed the same way.

pub mod block;
pub mod node;
pub mod tag;

pub use block::{Block, InstrumentationMarks};
pub use node::{Direction, EdgeKind, EdgeSet, Node, NodeId, NodeKey};
pub use tag::{SliceId, SliceTag, Stage, WalkStamp};

use crate::values::{BlockId, FuncId};
use crate::{IrError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(pub u32);

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenceGraph {
    pub id: GraphId,
    pub func: FuncId,
    pub nodes: Vec<NodeId>,
    pub blocks: Vec<BlockId>,
    pub entry: NodeId,
    pub exit: Option<NodeId>,
    pub entry_block: Option<BlockId>,
    pub tag: SliceTag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramGraph {
    pub nodes: IndexMap<NodeId, Node>,
    pub blocks: IndexMap<BlockId, Block>,
    pub graphs: IndexMap<GraphId, DependenceGraph>,
    pub globals: Vec<NodeId>,
    /// Graph of the program's entry function.
    pub entry_graph: Option<GraphId>,
    next_node: u32,
}

impl ProgramGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Create the graph of `func` together with its entry pseudo-node.
    pub fn add_graph(&mut self, func: FuncId) -> GraphId {
        let id = GraphId(self.graphs.len() as u32);
        let entry = self.fresh_node_id();
        self.nodes
            .insert(entry, Node::new(entry, NodeKey::Entry(func), None, Some(id)));
        self.graphs.insert(
            id,
            DependenceGraph {
                id,
                func,
                nodes: vec![entry],
                blocks: Vec::new(),
                entry,
                exit: None,
                entry_block: None,
                tag: SliceTag::Unmarked,
            },
        );
        if self.entry_graph.is_none() {
            self.entry_graph = Some(id);
        }
        id
    }

    pub fn add_block(&mut self, graph: GraphId, id: BlockId) -> Result<()> {
        let dg = self
            .graphs
            .get_mut(&graph)
            .ok_or(IrError::UnknownGraph(graph))?;
        dg.blocks.push(id);
        if dg.entry_block.is_none() {
            dg.entry_block = Some(id);
        }
        self.blocks.insert(id, Block::new(id, graph));
        Ok(())
    }

    /// Add a node to `graph`, appended to `block` when given.
    pub fn add_node(&mut self, graph: GraphId, key: NodeKey, block: Option<BlockId>) -> Result<NodeId> {
        if !self.graphs.contains_key(&graph) {
            return Err(IrError::UnknownGraph(graph));
        }
        let id = self.fresh_node_id();
        if let Some(b) = block {
            self.blocks
                .get_mut(&b)
                .ok_or(IrError::UnknownBlock(b))?
                .nodes
                .push(id);
        }
        self.nodes.insert(id, Node::new(id, key, block, Some(graph)));
        if let Some(dg) = self.graphs.get_mut(&graph) {
            dg.nodes.push(id);
            if matches!(key, NodeKey::Exit(_)) {
                dg.exit = Some(id);
            }
        }
        Ok(id)
    }

    pub fn add_global_node(&mut self, key: NodeKey) -> NodeId {
        let id = self.fresh_node_id();
        self.nodes.insert(id, Node::new(id, key, None, None));
        self.globals.push(id);
        id
    }

    /// Add the edge `from -> to` of `kind`; the reverse edge is recorded on `to`.
    pub fn add_edge(&mut self, kind: EdgeKind, from: NodeId, to: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&to) {
            return Err(IrError::UnknownNode(to));
        }
        self.nodes
            .get_mut(&from)
            .ok_or(IrError::UnknownNode(from))?
            .edge_set_mut(kind)
            .insert(Direction::Forward, to);
        if let Some(target) = self.nodes.get_mut(&to) {
            target.edge_set_mut(kind).insert(Direction::Backward, from);
        }
        Ok(())
    }

    pub fn add_subgraph(&mut self, call: NodeId, callee: GraphId) -> Result<()> {
        let node = self.nodes.get_mut(&call).ok_or(IrError::UnknownNode(call))?;
        if !node.subgraphs.contains(&callee) {
            node.subgraphs.push(callee);
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(IrError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(IrError::UnknownNode(id))
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(&id).ok_or(IrError::UnknownBlock(id))
    }

    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks.get_mut(&id).ok_or(IrError::UnknownBlock(id))
    }

    pub fn graph(&self, id: GraphId) -> Result<&DependenceGraph> {
        self.graphs.get(&id).ok_or(IrError::UnknownGraph(id))
    }

    pub fn graph_mut(&mut self, id: GraphId) -> Result<&mut DependenceGraph> {
        self.graphs.get_mut(&id).ok_or(IrError::UnknownGraph(id))
    }

    pub fn graph_of_function(&self, func: FuncId) -> Option<GraphId> {
        self.graphs.values().find(|g| g.func == func).map(|g| g.id)
    }

    /// Node standing for `key`, if any.
    pub fn find(&self, key: NodeKey) -> Option<NodeId> {
        self.nodes.values().find(|n| n.key == key).map(|n| n.id)
    }

    /// Node for `key` restricted to `graph`.
    pub fn find_in(&self, graph: GraphId, key: NodeKey) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.key == key && n.graph == Some(graph))
            .map(|n| n.id)
    }

    /// Neighbours of `id` along `kind` edges in `direction`; empty for unknown nodes.
    pub fn neighbors(&self, id: NodeId, kind: EdgeKind, direction: Direction) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| n.edges(kind, direction).to_vec())
            .unwrap_or_default()
    }

    pub fn tag(&self, id: NodeId) -> SliceTag {
        self.nodes.get(&id).map(|n| n.tag).unwrap_or_default()
    }

    pub fn set_tag(&mut self, id: NodeId, tag: SliceTag) -> Result<()> {
        self.node_mut(id)?.tag = tag;
        Ok(())
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).and_then(|b| b.idom)
    }

    pub fn ipostdom(&self, block: BlockId) -> Option<BlockId> {
        self.blocks.get(&block).and_then(|b| b.ipostdom)
    }

    pub fn reverse_control_dependence(&self, block: BlockId) -> &[BlockId] {
        self.blocks
            .get(&block)
            .map(|b| b.control_deps.as_slice())
            .unwrap_or_default()
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.blocks
            .get(&block)
            .map(|b| b.successors.as_slice())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.blocks
            .get(&block)
            .map(|b| b.predecessors.as_slice())
            .unwrap_or_default()
    }

    pub fn first_node(&self, block: BlockId) -> Option<NodeId> {
        self.blocks.get(&block).and_then(|b| b.first_node())
    }

    pub fn last_node(&self, block: BlockId) -> Option<NodeId> {
        self.blocks.get(&block).and_then(|b| b.last_node())
    }

    /// Whether `a` dominates `b` (reflexive), following the immediate-dominator chain.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        let mut steps = 0;
        while let Some(block) = current {
            if block == a {
                return true;
            }
            steps += 1;
            if steps > self.blocks.len() {
                return false;
            }
            current = self.idom(block);
        }
        false
    }

    /// Remove a node and every edge touching it.
    pub fn delete_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.shift_remove(&id).ok_or(IrError::UnknownNode(id))?;
        for kind in EdgeKind::ALL {
            for other in node.edge_set(kind).all() {
                if let Some(neighbor) = self.nodes.get_mut(&other) {
                    neighbor.edge_set_mut(kind).remove(id);
                }
            }
        }
        if let Some(block) = node.block.and_then(|b| self.blocks.get_mut(&b)) {
            block.nodes.retain(|&n| n != id);
        }
        match node.graph.and_then(|g| self.graphs.get_mut(&g)) {
            Some(dg) => {
                dg.nodes.retain(|&n| n != id);
                if dg.exit == Some(id) {
                    dg.exit = None;
                }
            }
            None => self.globals.retain(|&n| n != id),
        }
        Ok(node)
    }

    /// Unlink a block from the CFG and its graph. Nodes still inside it are returned, not deleted.
    pub fn delete_block(&mut self, id: BlockId) -> Result<Block> {
        let block = self.blocks.shift_remove(&id).ok_or(IrError::UnknownBlock(id))?;
        for other in block.predecessors.iter().chain(block.successors.iter()) {
            if let Some(neighbor) = self.blocks.get_mut(other) {
                neighbor.predecessors.retain(|&b| b != id);
                neighbor.successors.retain(|&b| b != id);
            }
        }
        if let Some(dg) = self.graphs.get_mut(&block.graph) {
            dg.blocks.retain(|&b| b != id);
            if dg.entry_block == Some(id) {
                dg.entry_block = None;
            }
        }
        for node in &block.nodes {
            if let Some(node) = self.nodes.get_mut(node) {
                node.block = None;
            }
        }
        Ok(block)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::InstId;

    fn two_node_graph() -> (ProgramGraph, NodeId, NodeId) {
        let mut pg = ProgramGraph::new();
        let g = pg.add_graph(FuncId(0));
        pg.add_block(g, BlockId(0)).unwrap();
        let a = pg.add_node(g, NodeKey::Inst(InstId(0)), Some(BlockId(0))).unwrap();
        let b = pg.add_node(g, NodeKey::Inst(InstId(1)), Some(BlockId(0))).unwrap();
        (pg, a, b)
    }

    #[test]
    fn test_edges_are_recorded_both_ways() {
        let (mut pg, a, b) = two_node_graph();
        pg.add_edge(EdgeKind::Data, a, b).unwrap();
        assert_eq!(pg.neighbors(a, EdgeKind::Data, Direction::Forward), vec![b]);
        assert_eq!(pg.neighbors(b, EdgeKind::Data, Direction::Backward), vec![a]);
        assert!(pg.neighbors(a, EdgeKind::Control, Direction::Forward).is_empty());
    }

    #[test]
    fn test_delete_node_drops_edges() {
        let (mut pg, a, b) = two_node_graph();
        pg.add_edge(EdgeKind::Use, a, b).unwrap();
        pg.delete_node(a).unwrap();
        assert!(pg.neighbors(b, EdgeKind::Use, Direction::Backward).is_empty());
        assert_eq!(pg.block(BlockId(0)).unwrap().nodes, vec![b]);
        assert!(pg.find(NodeKey::Inst(InstId(0))).is_none());
    }

    #[test]
    fn test_dominates_follows_idom_chain() {
        let mut pg = ProgramGraph::new();
        let g = pg.add_graph(FuncId(0));
        for i in 0..3 {
            pg.add_block(g, BlockId(i)).unwrap();
        }
        pg.block_mut(BlockId(1)).unwrap().idom = Some(BlockId(0));
        pg.block_mut(BlockId(2)).unwrap().idom = Some(BlockId(1));
        assert!(pg.dominates(BlockId(0), BlockId(2)));
        assert!(pg.dominates(BlockId(2), BlockId(2)));
        assert!(!pg.dominates(BlockId(2), BlockId(0)));
    }
}
