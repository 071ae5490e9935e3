use crate::graph::ProgramGraph;
use crate::values::BlockId;
use std::collections::BTreeSet;

/// A natural loop recovered on demand from a block's dominator chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// Source of the back edge `latch -> header`.
    pub latch: BlockId,
    pub blocks: BTreeSet<BlockId>,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Blocks outside the loop that `block` can branch to.
    pub fn exits_from(&self, graph: &ProgramGraph, block: BlockId) -> Vec<BlockId> {
        graph
            .successors(block)
            .iter()
            .copied()
            .filter(|s| !self.blocks.contains(s))
            .collect()
    }

    /// `block` sits in the loop and has a successor outside it.
    pub fn is_conditional_exit(&self, graph: &ProgramGraph, block: BlockId) -> bool {
        self.contains(block) && !self.exits_from(graph, block).is_empty()
    }

    /// Immediate dominator of the header.
    pub fn preheader(&self, graph: &ProgramGraph) -> Option<BlockId> {
        graph.idom(self.header)
    }
}

/// Find the loop enclosing `block`.
///
/// Walks up the dominator chain from `block`; at each ancestor `h` looks for a predecessor `p`
/// dominated by `h`. The first such back edge decides the answer: its loop is returned only when
/// it contains `block`.
pub fn enclosing_loop(graph: &ProgramGraph, block: BlockId) -> Option<NaturalLoop> {
    let mut current = Some(block);
    let mut steps = 0;
    while let Some(header) = current {
        for &pred in graph.predecessors(header) {
            if graph.dominates(header, pred) {
                let blocks = collect_loop_blocks(graph, header, pred);
                return blocks.contains(&block).then(|| NaturalLoop {
                    header,
                    latch: pred,
                    blocks,
                });
            }
        }
        steps += 1;
        if steps > graph.blocks.len() {
            break;
        }
        current = graph.idom(header);
    }
    None
}

/// Every block that reaches `latch` backwards without passing through `header`.
fn collect_loop_blocks(graph: &ProgramGraph, header: BlockId, latch: BlockId) -> BTreeSet<BlockId> {
    let mut blocks = BTreeSet::new();
    blocks.insert(header);
    let mut worklist = Vec::new();
    if blocks.insert(latch) {
        worklist.push(latch);
    }

    while let Some(block) = worklist.pop() {
        for &pred in graph.predecessors(block) {
            if blocks.insert(pred) {
                worklist.push(pred);
            }
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::FuncId;

    /// entry(0) -> header(1) -> body(2) -> header(1); header(1) -> exit(3)
    fn simple_loop() -> ProgramGraph {
        let mut pg = ProgramGraph::new();
        let g = pg.add_graph(FuncId(0));
        for i in 0..4 {
            pg.add_block(g, BlockId(i)).unwrap();
        }
        let edges = [(0, 1), (1, 2), (2, 1), (1, 3)];
        for (from, to) in edges {
            pg.block_mut(BlockId(from)).unwrap().successors.push(BlockId(to));
            pg.block_mut(BlockId(to)).unwrap().predecessors.push(BlockId(from));
        }
        pg.block_mut(BlockId(1)).unwrap().idom = Some(BlockId(0));
        pg.block_mut(BlockId(2)).unwrap().idom = Some(BlockId(1));
        pg.block_mut(BlockId(3)).unwrap().idom = Some(BlockId(1));
        pg
    }

    #[test]
    fn test_loop_detection() {
        let pg = simple_loop();
        let found = enclosing_loop(&pg, BlockId(1)).unwrap();
        assert_eq!(found.header, BlockId(1));
        assert_eq!(found.latch, BlockId(2));
        assert_eq!(found.blocks, BTreeSet::from([BlockId(1), BlockId(2)]));
        assert!(found.is_conditional_exit(&pg, BlockId(1)));
        assert!(!found.is_conditional_exit(&pg, BlockId(2)));
        assert_eq!(found.preheader(&pg), Some(BlockId(0)));
    }

    #[test]
    fn test_block_outside_loop() {
        let pg = simple_loop();
        assert!(enclosing_loop(&pg, BlockId(3)).is_none());
        assert!(enclosing_loop(&pg, BlockId(0)).is_none());
    }
}
