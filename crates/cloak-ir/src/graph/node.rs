use super::tag::{SliceTag, WalkStamp};
use super::GraphId;
use crate::values::{BlockId, FuncId, GlobalId, InstId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node stands for in the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Inst(InstId),
    /// Function entry pseudo-node; call sites are its control predecessors.
    Entry(FuncId),
    Exit(FuncId),
    Global(GlobalId),
}

impl NodeKey {
    pub fn as_inst(&self) -> Option<InstId> {
        match self {
            NodeKey::Inst(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, NodeKey::Entry(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Control,
    Data,
    /// Def-use: forward edges run from a definition to its users.
    Use,
    Interference,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Control,
        EdgeKind::Data,
        EdgeKind::Use,
        EdgeKind::Interference,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeSet {
    pub forward: Vec<NodeId>,
    pub backward: Vec<NodeId>,
}

impl EdgeSet {
    pub fn get(&self, direction: Direction) -> &[NodeId] {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut Vec<NodeId> {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }

    pub(crate) fn insert(&mut self, direction: Direction, node: NodeId) {
        let edges = self.get_mut(direction);
        if !edges.contains(&node) {
            edges.push(node);
        }
    }

    pub(crate) fn remove(&mut self, node: NodeId) {
        self.forward.retain(|&n| n != node);
        self.backward.retain(|&n| n != node);
    }

    pub fn all(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.forward.iter().chain(self.backward.iter()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub key: NodeKey,
    pub block: Option<BlockId>,
    /// `None` for program-global nodes.
    pub graph: Option<GraphId>,
    pub tag: SliceTag,
    pub stamp: Option<WalkStamp>,
    pub control: EdgeSet,
    pub data: EdgeSet,
    pub uses: EdgeSet,
    pub interference: EdgeSet,
    pub subgraphs: Vec<GraphId>,
}

impl Node {
    pub fn new(id: NodeId, key: NodeKey, block: Option<BlockId>, graph: Option<GraphId>) -> Self {
        Self {
            id,
            key,
            block,
            graph,
            tag: SliceTag::Unmarked,
            stamp: None,
            control: EdgeSet::default(),
            data: EdgeSet::default(),
            uses: EdgeSet::default(),
            interference: EdgeSet::default(),
            subgraphs: Vec::new(),
        }
    }

    pub fn edges(&self, kind: EdgeKind, direction: Direction) -> &[NodeId] {
        self.edge_set(kind).get(direction)
    }

    pub fn edge_set(&self, kind: EdgeKind) -> &EdgeSet {
        match kind {
            EdgeKind::Control => &self.control,
            EdgeKind::Data => &self.data,
            EdgeKind::Use => &self.uses,
            EdgeKind::Interference => &self.interference,
        }
    }

    pub(crate) fn edge_set_mut(&mut self, kind: EdgeKind) -> &mut EdgeSet {
        match kind {
            EdgeKind::Control => &mut self.control,
            EdgeKind::Data => &mut self.data,
            EdgeKind::Use => &mut self.uses,
            EdgeKind::Interference => &mut self.interference,
        }
    }

    pub fn inst(&self) -> Option<InstId> {
        self.key.as_inst()
    }

    pub fn is_marked(&self) -> bool {
        self.tag.is_marked()
    }
}
