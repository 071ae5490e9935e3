/*! Graph reduction driven by the slice tags.
 *
 * After marking, everything that does not carry the slice id goes: first whole blocks the CFG
 * walk proves unreachable from the slice, then stray nodes, then blocks left empty. Call
 * subgraphs reachable from kept call nodes are processed the same way, each once per run.
 */

use cloak_ir::{Block, BlockId, GraphId, Module, Node, NodeId, ProgramGraph, SliceId};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlicerStatistics {
    /// Nodes examined.
    pub nodes_total: u64,
    pub nodes_removed: u64,
    pub blocks_removed: u32,
}

impl std::fmt::Display for SlicerStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sliced away {} from {} nodes",
            self.nodes_removed, self.nodes_total
        )
    }
}

/// Decides whether a doomed node or block really goes, and reacts once it went.
pub trait RemovalPolicy {
    fn remove_node(&mut self, _graph: &ProgramGraph, _node: NodeId) -> bool {
        true
    }

    fn remove_block(&mut self, _graph: &ProgramGraph, _block: BlockId) -> bool {
        true
    }

    fn node_removed(&mut self, _node: &Node) {}

    fn block_removed(&mut self, _block: &Block) {}
}

/// Removes from the graph only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRemoval;

impl RemovalPolicy for DefaultRemoval {}

/// Also erases the IR instructions and blocks behind removed nodes.
///
/// Branches into erased blocks are left dangling; the caller is expected to slice with a
/// criterion whose blocks stay connected.
pub struct ModuleRemoval<'m> {
    module: &'m mut Module,
}

impl<'m> ModuleRemoval<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self { module }
    }
}

impl RemovalPolicy for ModuleRemoval<'_> {
    fn node_removed(&mut self, node: &Node) {
        if let Some(inst) = node.inst() {
            if let Err(err) = self.module.remove_inst(inst) {
                debug!(%inst, %err, "instruction already gone");
            }
        }
    }

    fn block_removed(&mut self, block: &Block) {
        if let Err(err) = self.module.remove_block(block.id) {
            debug!(block = %block.id, %err, "block already gone");
        }
    }
}

pub struct Slicer<P: RemovalPolicy = DefaultRemoval> {
    policy: P,
    statistics: SlicerStatistics,
    sliced: HashSet<GraphId>,
}

impl Default for Slicer<DefaultRemoval> {
    fn default() -> Self {
        Self::new(DefaultRemoval)
    }
}

impl<P: RemovalPolicy> Slicer<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            statistics: SlicerStatistics::default(),
            sliced: HashSet::new(),
        }
    }

    /// Slice `root` and every call subgraph reachable from its kept call nodes.
    pub fn slice(&mut self, graph: &mut ProgramGraph, root: GraphId, slice: SliceId) -> SlicerStatistics {
        let mut pending = vec![root];
        self.sliced.insert(root);

        while let Some(current) = pending.pop() {
            for sub in self.slice_graph(graph, current, slice) {
                if self.sliced.insert(sub) {
                    pending.push(sub);
                }
            }
        }
        self.slice_globals(graph, slice);

        info!("{}", self.statistics);
        self.statistics
    }

    /// Reduce one graph; returns the subgraphs of its kept call nodes.
    fn slice_graph(&mut self, graph: &mut ProgramGraph, id: GraphId, slice: SliceId) -> Vec<GraphId> {
        let Some(dg) = graph.graphs.get(&id) else {
            return Vec::new();
        };
        self.statistics.nodes_total += dg.nodes.len() as u64;
        let entry_block = dg.entry_block;

        if let Some(entry) = entry_block {
            for block in doomed_blocks(graph, entry, slice) {
                self.drop_block(graph, block);
            }
        }

        let nodes = graph.graphs.get(&id).map(|g| g.nodes.clone()).unwrap_or_default();
        let mut subgraphs = Vec::new();
        for node in nodes {
            let Some(n) = graph.nodes.get(&node) else {
                continue;
            };
            if n.tag.belongs_to(slice) {
                subgraphs.extend(n.subgraphs.iter().copied());
                continue;
            }
            self.drop_node(graph, node);
        }

        let emptied: Vec<BlockId> = graph
            .graphs
            .get(&id)
            .map(|g| g.blocks.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|b| graph.blocks.get(b).map_or(false, |blk| blk.is_empty()))
            .collect();
        for block in emptied {
            if self.policy.remove_block(graph, block) {
                if let Ok(removed) = graph.delete_block(block) {
                    self.statistics.blocks_removed += 1;
                    self.policy.block_removed(&removed);
                }
            }
        }

        debug!(graph = %id, subgraphs = subgraphs.len(), "graph sliced");
        subgraphs
    }

    fn slice_globals(&mut self, graph: &mut ProgramGraph, slice: SliceId) {
        let globals = graph.globals.clone();
        self.statistics.nodes_total += globals.len() as u64;
        for node in globals {
            if !graph.tag(node).belongs_to(slice) {
                self.drop_node(graph, node);
            }
        }
    }

    fn drop_node(&mut self, graph: &mut ProgramGraph, node: NodeId) {
        if !self.policy.remove_node(graph, node) {
            return;
        }
        if let Ok(removed) = graph.delete_node(node) {
            self.statistics.nodes_removed += 1;
            self.policy.node_removed(&removed);
        }
    }

    /// Remove a doomed block together with its nodes. A block still holding a node the policy
    /// kept stays.
    fn drop_block(&mut self, graph: &mut ProgramGraph, block: BlockId) {
        if !self.policy.remove_block(graph, block) {
            return;
        }
        let nodes = graph.blocks.get(&block).map(|b| b.nodes.clone()).unwrap_or_default();
        for node in nodes {
            self.drop_node(graph, node);
        }
        if graph.blocks.get(&block).map_or(false, |b| !b.is_empty()) {
            debug!(%block, "doomed block keeps vetoed nodes");
            return;
        }
        if let Ok(removed) = graph.delete_block(block) {
            self.statistics.blocks_removed += 1;
            self.policy.block_removed(&removed);
        }
    }
}

/// Blocks reachable from `entry` without passing through a block of `slice`.
fn doomed_blocks(graph: &ProgramGraph, entry: BlockId, slice: SliceId) -> Vec<BlockId> {
    let mut doomed = Vec::new();
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);

    while let Some(block) = queue.pop_front() {
        let in_slice = graph
            .blocks
            .get(&block)
            .map_or(true, |b| b.tag.belongs_to(slice));
        if in_slice {
            continue;
        }
        doomed.push(block);
        for &succ in graph.successors(block) {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    doomed
}
