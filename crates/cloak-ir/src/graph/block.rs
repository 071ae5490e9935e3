use super::node::NodeId;
use super::tag::{SliceId, SliceTag};
use super::GraphId;
use crate::values::BlockId;
use serde::{Deserialize, Serialize};

/// Per-block instrumentation bookkeeping, kept apart from the slice tag so that placing a
/// transaction never drops a block out of its slice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationMarks {
    /// A transaction controlled by this block's branch was started in this run.
    pub txn_started: Option<SliceId>,
    /// Transactions closed at the top of this block, by run and opening block.
    pub closes: Vec<(SliceId, BlockId)>,
    /// A loop transaction starts in this pre-header.
    pub loop_txn_started: bool,
    /// Already covered by a code-preload walk.
    pub code_preloaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub graph: GraphId,
    pub nodes: Vec<NodeId>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
    pub idom: Option<BlockId>,
    pub ipostdom: Option<BlockId>,
    /// Blocks whose branch decides whether this block executes.
    pub control_deps: Vec<BlockId>,
    pub tag: SliceTag,
    pub marks: InstrumentationMarks,
}

impl Block {
    pub fn new(id: BlockId, graph: GraphId) -> Self {
        Self {
            id,
            graph,
            nodes: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            idom: None,
            ipostdom: None,
            control_deps: Vec::new(),
            tag: SliceTag::Unmarked,
            marks: InstrumentationMarks::default(),
        }
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    pub fn is_marked(&self) -> bool {
        self.tag.is_marked()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
