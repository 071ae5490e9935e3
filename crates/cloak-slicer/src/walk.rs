//! FIFO worklist over dependence edges.

use crate::config::SliceDirection;
use cloak_ir::{Direction, EdgeKind, NodeId, ProgramGraph, WalkStamp};
use std::collections::{HashSet, VecDeque};

/// Answer of the per-node callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Neither mark nor expand.
    Skip,
    /// Expand along the selected edges; forward control edges only when `control` is set.
    Expand { control: bool },
}

pub struct NodesWalk {
    direction: SliceDirection,
    stamp: WalkStamp,
    queue: VecDeque<NodeId>,
    forced: HashSet<NodeId>,
}

impl NodesWalk {
    pub fn new(direction: SliceDirection, stamp: WalkStamp) -> Self {
        Self {
            direction,
            stamp,
            queue: VecDeque::new(),
            forced: HashSet::new(),
        }
    }

    /// Queue `node` unless this walk already stamped it. Returns whether it was queued.
    pub fn enqueue(&mut self, graph: &mut ProgramGraph, node: NodeId) -> bool {
        let Some(n) = graph.nodes.get_mut(&node) else {
            return false;
        };
        if n.stamp == Some(self.stamp) {
            return false;
        }
        n.stamp = Some(self.stamp);
        self.queue.push_back(node);
        true
    }

    /// Queue a node pulled in by an enclosing loop. It counts as forced even when a dependence
    /// edge already queued it.
    pub fn force(&mut self, graph: &mut ProgramGraph, node: NodeId) {
        self.enqueue(graph, node);
        self.forced.insert(node);
    }

    pub fn is_forced(&self, node: NodeId) -> bool {
        self.forced.contains(&node)
    }

    pub fn pop(&mut self) -> Option<NodeId> {
        self.queue.pop_front()
    }

    pub fn expand(&mut self, graph: &mut ProgramGraph, node: NodeId, visit: Visit) {
        let Visit::Expand { control } = visit else {
            return;
        };
        let (direction, follow_control) = match self.direction {
            SliceDirection::Forward => (Direction::Forward, control),
            SliceDirection::Backward => (Direction::Backward, true),
        };
        for kind in EdgeKind::ALL {
            if kind == EdgeKind::Control && !follow_control {
                continue;
            }
            for next in graph.neighbors(node, kind, direction) {
                self.enqueue(graph, next);
            }
        }
    }
}
