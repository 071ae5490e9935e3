//! Loops a branch can leave early.

use cloak_ir::{enclosing_loop, BlockId, NaturalLoop, ProgramGraph};

/// The natural loop that the branch ending `block` conditionally exits, if any.
pub fn exited_loop(graph: &ProgramGraph, block: BlockId) -> Option<NaturalLoop> {
    enclosing_loop(graph, block).filter(|found| found.is_conditional_exit(graph, block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_ir::FuncId;

    /// 0 -> 1 (header) -> 2 (body, may break to 4) -> 3 (latch) -> 1; 1 -> 4
    fn loop_with_break() -> ProgramGraph {
        let mut pg = ProgramGraph::new();
        let g = pg.add_graph(FuncId(0));
        for i in 0..5 {
            pg.add_block(g, BlockId(i)).unwrap();
        }
        for (from, to) in [(0, 1), (1, 2), (1, 4), (2, 3), (2, 4), (3, 1)] {
            pg.block_mut(BlockId(from)).unwrap().successors.push(BlockId(to));
            pg.block_mut(BlockId(to)).unwrap().predecessors.push(BlockId(from));
        }
        for (block, idom) in [(1, 0), (2, 1), (3, 2), (4, 1)] {
            pg.block_mut(BlockId(block)).unwrap().idom = Some(BlockId(idom));
        }
        pg
    }

    #[test]
    fn test_break_is_an_exit() {
        let pg = loop_with_break();
        let found = exited_loop(&pg, BlockId(2)).unwrap();
        assert_eq!(found.header, BlockId(1));
        assert!(found.contains(BlockId(3)));
    }

    #[test]
    fn test_latch_and_outside_are_not() {
        let pg = loop_with_break();
        assert!(exited_loop(&pg, BlockId(3)).is_none());
        assert!(exited_loop(&pg, BlockId(4)).is_none());
    }
}
