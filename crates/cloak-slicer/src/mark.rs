//! The marking walk and its three passes.
//!
//! Pass 0 discovers what depends on the seeds and tags it with the slice. Passes 1 and 2
//! revisit the same region to place loop-level and access-level transactions. The buffer-id
//! counter is threaded through: every call takes the last id handed out and returns the new one.

use crate::config::{SliceDirection, SlicerConfig};
use crate::instrument::Instrumenter;
use crate::loops::exited_loop;
use crate::report::Report;
use crate::walk::{NodesWalk, Visit};
use cloak_ir::{
    Module, NodeId, ObjectOrigin, PointsToOracle, ProgramGraph, SliceId, SliceTag, Value,
    WalkStamp,
};
use tracing::{debug, info};

/// Everything a pass reads or rewrites.
pub struct MarkContext<'a> {
    pub module: &'a mut Module,
    pub graph: &'a mut ProgramGraph,
    pub oracle: &'a mut dyn PointsToOracle,
    pub config: &'a SlicerConfig,
    pub report: &'a mut Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Taint discovery.
    Discover,
    /// Loops with a secret-dependent exit.
    LoopPrepass,
    /// Sensitive accesses.
    Instrument,
}

impl Pass {
    pub const ALL: [Pass; 3] = [Pass::Discover, Pass::LoopPrepass, Pass::Instrument];

    pub fn id(self) -> u8 {
        match self {
            Pass::Discover => 0,
            Pass::LoopPrepass => 1,
            Pass::Instrument => 2,
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Discover => write!(f, "discover"),
            Pass::LoopPrepass => write!(f, "loop-prepass"),
            Pass::Instrument => write!(f, "instrument"),
        }
    }
}

pub struct WalkAndMark {
    direction: SliceDirection,
}

impl WalkAndMark {
    pub fn new(direction: SliceDirection) -> Self {
        Self { direction }
    }

    /// Run `pass` of `slice` from `seeds`. Returns the buffer-id counter after the pass.
    pub fn mark(
        &self,
        cx: &mut MarkContext<'_>,
        seeds: &[NodeId],
        slice: SliceId,
        pass: Pass,
        buffers: u32,
    ) -> u32 {
        let stamp = WalkStamp {
            slice,
            pass: pass.id(),
        };
        let mut walk = NodesWalk::new(self.direction, stamp);
        for &seed in seeds {
            walk.enqueue(cx.graph, seed);
        }

        let mut visited = 0usize;
        let mut tool = Instrumenter::new(cx, slice, buffers);
        while let Some(id) = walk.pop() {
            visited += 1;
            let visit = match pass {
                Pass::Discover => self.discover(tool.cx, &mut walk, id, slice),
                Pass::LoopPrepass => tool.loop_prepass(id),
                Pass::Instrument => tool.instrument(id),
            };
            walk.expand(tool.cx.graph, id, visit);
        }
        let buffers = tool.buffers();

        let marked = cx.graph.nodes.values().filter(|n| n.tag.belongs_to(slice)).count();
        cx.report.marked_nodes = marked;
        info!(%pass, %slice, visited, marked, buffers, "pass finished");
        buffers
    }

    fn discover(
        &self,
        cx: &mut MarkContext<'_>,
        walk: &mut NodesWalk,
        id: NodeId,
        slice: SliceId,
    ) -> Visit {
        let Some(node) = cx.graph.nodes.get(&id) else {
            return Visit::Skip;
        };
        if node.is_marked() {
            return Visit::Skip;
        }
        let (block, graph) = (node.block, node.graph);

        let mut control = false;
        if let Some(inst) = node.inst().and_then(|i| cx.module.insts.get(&i)) {
            if let Some(address) = inst.accessed_address() {
                if touches_secret(cx.module, cx.oracle, cx.config, address) {
                    debug!(node = %id, "direct secret access left out of the slice");
                    return Visit::Skip;
                }
            }
            control = inst.is_conditional_branch();
        }

        if control {
            if let Some(found) = block.and_then(|b| exited_loop(cx.graph, b)) {
                debug!(node = %id, header = %found.header, "secret-dependent loop exit");
                for blk in &found.blocks {
                    let nodes = cx
                        .graph
                        .blocks
                        .get(blk)
                        .map(|b| b.nodes.clone())
                        .unwrap_or_default();
                    for nd in nodes {
                        if nd != id && !cx.graph.tag(nd).is_marked() {
                            walk.force(cx.graph, nd);
                        }
                    }
                }
            }
        }

        let tag = if walk.is_forced(id) {
            SliceTag::LoopForced(slice)
        } else {
            SliceTag::discovered(slice)
        };
        if let Some(node) = cx.graph.nodes.get_mut(&id) {
            node.tag = tag;
        }
        if let Some(b) = block.and_then(|b| cx.graph.blocks.get_mut(&b)) {
            if !b.tag.belongs_to(slice) {
                b.tag = SliceTag::discovered(slice);
            }
        }
        if let Some(dg) = graph.and_then(|g| cx.graph.graphs.get_mut(&g)) {
            dg.tag = SliceTag::discovered(slice);
            let entry = dg.entry;
            if self.direction == SliceDirection::Backward {
                walk.enqueue(cx.graph, entry);
            }
        }

        Visit::Expand { control }
    }
}

/// Whether `address` may point into a global carrying the secret annotation.
pub fn touches_secret(
    module: &Module,
    oracle: &dyn PointsToOracle,
    config: &SlicerConfig,
    address: &Value,
) -> bool {
    oracle.targets(address).into_iter().any(|object| match object.origin {
        ObjectOrigin::Global(global) => module
            .globals
            .get(&global)
            .map_or(false, |g| g.has_annotation(&config.secret_annotation)),
        _ => false,
    })
}
