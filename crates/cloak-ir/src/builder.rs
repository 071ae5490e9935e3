/*! Assemble a module, its dependence graph and a points-to table in one go.
 *
 * Instructions appended through the builder get a graph node in the same block. Control-flow
 * edges and def-use edges are derived from the instructions when the builder finishes; dominance,
 * control dependence and memory data dependence are whatever the caller declares.
 */

use crate::analysis::{ObjectId, ObjectOrigin, PointsToTable};
use crate::graph::{EdgeKind, GraphId, NodeId, NodeKey, ProgramGraph};
use crate::instructions::{BinaryOp, ComparePredicate, InstKind, Instruction};
use crate::ir_persist::ProgramBundle;
use crate::module::Module;
use crate::types::{Signature, Type};
use crate::values::{BlockId, FuncId, GlobalId, InstId, SourceLocation, Value};
use crate::{IrError, Result};
use std::collections::HashMap;

pub struct ProgramBuilder {
    module: Module,
    graph: ProgramGraph,
    points_to: PointsToTable,
    current: Option<BlockId>,
    nodes: HashMap<InstId, NodeId>,
    global_nodes: HashMap<GlobalId, NodeId>,
    data_deps: Vec<(InstId, InstId)>,
    interference: Vec<(InstId, InstId)>,
    control_deps: Vec<(BlockId, BlockId)>,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module::new(name),
            graph: ProgramGraph::new(),
            points_to: PointsToTable::new(),
            current: None,
            nodes: HashMap::new(),
            global_nodes: HashMap::new(),
            data_deps: Vec::new(),
            interference: Vec::new(),
            control_deps: Vec::new(),
        }
    }

    /// External function without a body.
    pub fn declare(&mut self, name: &str, signature: Signature) -> FuncId {
        self.module.declare_function(name, signature)
    }

    /// Function with a body and its own dependence graph.
    pub fn function(&mut self, name: &str, signature: Signature) -> FuncId {
        let func = self.module.add_function(name, signature);
        self.graph.add_graph(func);
        func
    }

    pub fn global(&mut self, name: &str, size: u32) -> GlobalId {
        let id = self.module.add_global(name, size);
        let node = self.graph.add_global_node(NodeKey::Global(id));
        self.global_nodes.insert(id, node);
        let object = self
            .points_to
            .add_object(ObjectOrigin::Global(id), u64::from(size));
        self.points_to.add_target(Value::Global(id), object);
        id
    }

    pub fn annotate(&mut self, global: GlobalId, annotation: &str) -> Result<()> {
        self.module.annotate_global(global, annotation)
    }

    pub fn block(&mut self, func: FuncId) -> Result<BlockId> {
        let graph = self
            .graph
            .graph_of_function(func)
            .ok_or(IrError::UnknownFunction(func))?;
        let block = self.module.add_block(func)?;
        self.graph.add_block(graph, block)?;
        Ok(block)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    pub fn push(&mut self, kind: InstKind) -> Result<InstId> {
        self.push_at(kind, None)
    }

    pub fn push_at(&mut self, kind: InstKind, location: Option<SourceLocation>) -> Result<InstId> {
        let block = self.current.ok_or(IrError::InvalidInsertPoint)?;
        let graph = self.graph.block(block)?.graph;
        let inst = self
            .module
            .append(Instruction::new(kind, block).with_location(location))?;
        let node = self.graph.add_node(graph, NodeKey::Inst(inst), Some(block))?;
        self.nodes.insert(inst, node);
        Ok(inst)
    }

    pub fn alloca(&mut self, elem: Type, count: u32) -> Result<Value> {
        let inst = self.push(InstKind::Alloca {
            elem,
            count: Value::i64(i64::from(count)),
        })?;
        let size = u64::from(elem.byte_size()) * u64::from(count);
        let object = self.points_to.add_object(ObjectOrigin::Alloca(inst), size);
        self.points_to.add_target(Value::Inst(inst), object);
        Ok(Value::Inst(inst))
    }

    pub fn load(&mut self, addr: Value, ty: Type) -> Result<Value> {
        self.push(InstKind::Load { addr, ty }).map(Value::Inst)
    }

    pub fn store(&mut self, value: Value, addr: Value) -> Result<InstId> {
        self.push(InstKind::Store { value, addr })
    }

    pub fn offset(&mut self, base: Value, offset: Value) -> Result<Value> {
        self.push(InstKind::Offset { base, offset }).map(Value::Inst)
    }

    pub fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Result<Value> {
        self.push(InstKind::Binary { op, left, right }).map(Value::Inst)
    }

    pub fn compare(&mut self, pred: ComparePredicate, left: Value, right: Value) -> Result<Value> {
        self.push(InstKind::Compare { pred, left, right })
            .map(Value::Inst)
    }

    pub fn call(&mut self, callee: FuncId, args: Vec<Value>) -> Result<Value> {
        self.push(InstKind::Call {
            callee: Value::Function(callee),
            args,
        })
        .map(Value::Inst)
    }

    /// Heap allocation call; the returned pointer gets its own memory object.
    pub fn heap_alloc(&mut self, allocator: FuncId, size: Value) -> Result<Value> {
        let bytes = size.as_const_int().unwrap_or(0).max(0) as u64;
        let value = self.call(allocator, vec![size])?;
        if let Value::Inst(inst) = value {
            let object = self.points_to.add_object(ObjectOrigin::HeapCall(inst), bytes);
            self.points_to.add_target(value.clone(), object);
        }
        Ok(value)
    }

    pub fn memcpy(&mut self, dst: Value, src: Value, len: Value) -> Result<InstId> {
        self.push(InstKind::MemCopy { dst, src, len })
    }

    pub fn memset(&mut self, dst: Value, byte: Value, len: Value) -> Result<InstId> {
        self.push(InstKind::MemFill { dst, byte, len })
    }

    pub fn branch(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) -> Result<InstId> {
        self.push(InstKind::Branch {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn jump(&mut self, target: BlockId) -> Result<InstId> {
        self.push(InstKind::Jump { target })
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<InstId> {
        self.push(InstKind::Return { value })
    }

    pub fn set_idom(&mut self, block: BlockId, idom: BlockId) -> Result<()> {
        self.graph.block_mut(block)?.idom = Some(idom);
        Ok(())
    }

    pub fn set_ipostdom(&mut self, block: BlockId, ipostdom: BlockId) -> Result<()> {
        self.graph.block_mut(block)?.ipostdom = Some(ipostdom);
        Ok(())
    }

    /// `dependent` executes depending on the branch that ends `controller`.
    pub fn add_control_dependence(&mut self, dependent: BlockId, controller: BlockId) {
        self.control_deps.push((dependent, controller));
    }

    /// Memory data dependence: `from` writes what `to` reads.
    pub fn add_data_dependence(&mut self, from: InstId, to: InstId) {
        self.data_deps.push((from, to));
    }

    pub fn add_interference(&mut self, a: InstId, b: InstId) {
        self.interference.push((a, b));
    }

    pub fn may_point_to(&mut self, pointer: Value, object: ObjectId) {
        self.points_to.add_target(pointer, object);
    }

    /// Give `pointer` every target `like` already has.
    pub fn alias(&mut self, pointer: Value, like: &Value) {
        use crate::analysis::PointsToOracle;
        for object in self.points_to.points_to(like) {
            self.points_to.add_target(pointer.clone(), object);
        }
    }

    pub fn points_to_mut(&mut self) -> &mut PointsToTable {
        &mut self.points_to
    }

    pub fn node_of(&self, inst: InstId) -> Option<NodeId> {
        self.nodes.get(&inst).copied()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn finish(mut self) -> Result<ProgramBundle> {
        self.link_cfg()?;
        self.link_exits()?;
        self.link_uses()?;
        self.link_control()?;
        self.link_calls()?;

        for (from, to) in std::mem::take(&mut self.data_deps) {
            let (from, to) = (self.node_for(from)?, self.node_for(to)?);
            self.graph.add_edge(EdgeKind::Data, from, to)?;
        }
        for (a, b) in std::mem::take(&mut self.interference) {
            let (a, b) = (self.node_for(a)?, self.node_for(b)?);
            self.graph.add_edge(EdgeKind::Interference, a, b)?;
        }

        if let Some(main) = self.module.function_by_name("main").map(|f| f.id) {
            if let Some(graph) = self.graph.graph_of_function(main) {
                self.graph.entry_graph = Some(graph);
            }
        }

        Ok(ProgramBundle {
            module: self.module,
            graph: self.graph,
            points_to: self.points_to,
        })
    }

    fn node_for(&self, inst: InstId) -> Result<NodeId> {
        self.nodes
            .get(&inst)
            .copied()
            .ok_or(IrError::UnknownInstruction(inst))
    }

    fn link_cfg(&mut self) -> Result<()> {
        let blocks: Vec<BlockId> = self.graph.blocks.keys().copied().collect();
        for block in blocks {
            let successors = match self.module.terminator(block) {
                Some(term) => self.module.inst(term)?.successors(),
                None => Vec::new(),
            };
            for succ in successors {
                let from = self.graph.block_mut(block)?;
                if !from.successors.contains(&succ) {
                    from.successors.push(succ);
                }
                let to = self.graph.block_mut(succ)?;
                if !to.predecessors.contains(&block) {
                    to.predecessors.push(block);
                }
            }
        }
        Ok(())
    }

    /// Every return feeds the function's exit node.
    fn link_exits(&mut self) -> Result<()> {
        let graphs: Vec<(GraphId, FuncId)> = self.graph.graphs.values().map(|g| (g.id, g.func)).collect();
        for (graph, func) in graphs {
            let exit = self.graph.add_node(graph, NodeKey::Exit(func), None)?;
            let returns: Vec<InstId> = self
                .module
                .function(func)?
                .blocks
                .iter()
                .filter_map(|b| self.module.terminator(*b))
                .filter(|t| self.module.insts.get(t).map_or(false, |i| i.is_return()))
                .collect();
            for ret in returns {
                let node = self.node_for(ret)?;
                self.graph.add_edge(EdgeKind::Data, node, exit)?;
            }
        }
        Ok(())
    }

    fn link_uses(&mut self) -> Result<()> {
        let mut edges = Vec::new();
        for (&id, inst) in &self.module.insts {
            let user = self.node_for(id)?;
            for operand in inst.operands() {
                let def = match operand {
                    Value::Inst(def) => self.nodes.get(def).copied(),
                    Value::Global(g) => self.global_nodes.get(g).copied(),
                    _ => None,
                };
                if let Some(def) = def {
                    edges.push((def, user));
                }
            }
        }
        for (def, user) in edges {
            self.graph.add_edge(EdgeKind::Use, def, user)?;
        }
        Ok(())
    }

    fn link_control(&mut self) -> Result<()> {
        for (dependent, controller) in std::mem::take(&mut self.control_deps) {
            let block = self.graph.block_mut(dependent)?;
            if !block.control_deps.contains(&controller) {
                block.control_deps.push(controller);
            }
            let Some(branch) = self.graph.last_node(controller) else {
                continue;
            };
            let targets = self.graph.block(dependent)?.nodes.clone();
            for target in targets {
                self.graph.add_edge(EdgeKind::Control, branch, target)?;
            }
        }

        // Blocks no branch controls run whenever the function is entered.
        let uncontrolled: Vec<(NodeId, Vec<NodeId>)> = self
            .graph
            .blocks
            .values()
            .filter(|b| b.control_deps.is_empty())
            .filter_map(|b| {
                let entry = self.graph.graphs.get(&b.graph)?.entry;
                Some((entry, b.nodes.clone()))
            })
            .collect();
        for (entry, targets) in uncontrolled {
            for target in targets {
                self.graph.add_edge(EdgeKind::Control, entry, target)?;
            }
        }
        Ok(())
    }

    /// Call sites control their callee's entry; arguments flow into parameter users and the
    /// callee's returns flow back into the call.
    fn link_calls(&mut self) -> Result<()> {
        let calls: Vec<(InstId, FuncId)> = self
            .module
            .insts
            .iter()
            .filter_map(|(&id, inst)| inst.called_function().map(|f| (id, f)))
            .collect();

        for (call, callee) in calls {
            let Some(sub) = self.graph.graph_of_function(callee) else {
                continue;
            };
            let call_node = self.node_for(call)?;
            let entry = self.graph.graph(sub)?.entry;
            self.graph.add_edge(EdgeKind::Control, call_node, entry)?;
            self.graph.add_subgraph(call_node, sub)?;

            let mut param_users = Vec::new();
            let mut returns = Vec::new();
            for &block in &self.module.function(callee)?.blocks {
                for &inst in &self.module.block(block)?.insts {
                    let instruction = self.module.inst(inst)?;
                    if instruction
                        .operands()
                        .iter()
                        .any(|v| matches!(v, Value::Param { func, .. } if *func == callee))
                    {
                        param_users.push(inst);
                    }
                    if instruction.is_return() {
                        returns.push(inst);
                    }
                }
            }
            for user in param_users {
                let node = self.node_for(user)?;
                self.graph.add_edge(EdgeKind::Data, call_node, node)?;
            }
            for ret in returns {
                let node = self.node_for(ret)?;
                self.graph.add_edge(EdgeKind::Data, node, call_node)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PointsToOracle;
    use crate::graph::Direction;

    #[test]
    fn test_cfg_and_use_edges_are_derived() {
        let mut b = ProgramBuilder::new("m");
        let main = b.function("main", Signature::default());
        let entry = b.block(main).unwrap();
        let exit = b.block(main).unwrap();

        b.position_at_end(entry);
        let slot = b.alloca(Type::i32(), 1).unwrap();
        let value = b.load(slot.clone(), Type::i32()).unwrap();
        b.jump(exit).unwrap();
        b.position_at_end(exit);
        b.ret(Some(value.clone())).unwrap();

        let alloca_node = b.node_of(slot.as_inst().unwrap()).unwrap();
        let load_node = b.node_of(value.as_inst().unwrap()).unwrap();
        let bundle = b.finish().unwrap();

        assert_eq!(bundle.graph.successors(entry), &[exit]);
        assert_eq!(bundle.graph.predecessors(exit), &[entry]);
        assert_eq!(
            bundle.graph.neighbors(alloca_node, EdgeKind::Use, Direction::Forward),
            vec![load_node]
        );
        assert_eq!(bundle.points_to.targets(&slot)[0].size, 4);
        let g = bundle.graph.entry_graph.unwrap();
        assert!(bundle.graph.graph(g).unwrap().exit.is_some());
    }

    #[test]
    fn test_calls_link_subgraphs() {
        let mut b = ProgramBuilder::new("m");
        let helper = b.function("helper", Signature::default());
        let hb = b.block(helper).unwrap();
        b.position_at_end(hb);
        b.ret(None).unwrap();

        let main = b.function("main", Signature::default());
        let mb = b.block(main).unwrap();
        b.position_at_end(mb);
        let call = b.call(helper, vec![]).unwrap().as_inst().unwrap();
        b.ret(None).unwrap();

        let call_node = b.node_of(call).unwrap();
        let bundle = b.finish().unwrap();
        let node = bundle.graph.node(call_node).unwrap();
        let helper_graph = bundle.graph.graph_of_function(helper).unwrap();

        assert_eq!(node.subgraphs, vec![helper_graph]);
        assert_eq!(
            bundle.graph.entry_graph,
            bundle.graph.graph_of_function(main)
        );
        let entry = bundle.graph.graph(helper_graph).unwrap().entry;
        assert_eq!(
            bundle.graph.neighbors(entry, EdgeKind::Control, Direction::Backward),
            vec![call_node]
        );
    }
}
