use cloak_ir::{
    enclosing_loop, ComparePredicate, Direction, EdgeKind, NodeKey, ObjectOrigin, PointsToOracle,
    ProgramBuilder, Signature, Type, Value,
};
use pretty_assertions::assert_eq;

#[test]
fn test_uncontrolled_blocks_hang_off_the_entry() {
    let mut b = ProgramBuilder::new("entry");
    let main = b.function("main", Signature::default());
    let head = b.block(main).unwrap();
    let tail = b.block(main).unwrap();
    b.position_at_end(head);
    let first = b.jump(tail).unwrap();
    b.position_at_end(tail);
    let ret = b.ret(None).unwrap();
    let first_node = b.node_of(first).unwrap();
    let ret_node = b.node_of(ret).unwrap();
    let bundle = b.finish().unwrap();

    let graph = bundle.graph.entry_graph.unwrap();
    let entry = bundle.graph.graph(graph).unwrap().entry;
    assert_eq!(
        bundle.graph.neighbors(entry, EdgeKind::Control, Direction::Forward),
        vec![first_node, ret_node]
    );
    let exit = bundle.graph.graph(graph).unwrap().exit.unwrap();
    assert_eq!(
        bundle.graph.neighbors(exit, EdgeKind::Data, Direction::Backward),
        vec![ret_node]
    );
}

#[test]
fn test_declared_control_dependence_links_the_branch() {
    let mut b = ProgramBuilder::new("control");
    let flag = b.global("flag", 1);
    let main = b.function("main", Signature::default());
    let blocks: Vec<_> = (0..3).map(|_| b.block(main).unwrap()).collect();

    b.position_at_end(blocks[0]);
    let v = b.load(Value::Global(flag), Type::Bool).unwrap();
    let c = b.compare(ComparePredicate::Eq, v, Value::int(1, 1)).unwrap();
    let br = b.branch(c, blocks[1], blocks[2]).unwrap();
    b.position_at_end(blocks[1]);
    let inner = b.jump(blocks[2]).unwrap();
    b.position_at_end(blocks[2]);
    b.ret(None).unwrap();
    b.add_control_dependence(blocks[1], blocks[0]);
    let (br, inner) = (b.node_of(br).unwrap(), b.node_of(inner).unwrap());
    let bundle = b.finish().unwrap();

    assert_eq!(
        bundle.graph.neighbors(inner, EdgeKind::Control, Direction::Backward),
        vec![br]
    );
    assert_eq!(bundle.graph.reverse_control_dependence(blocks[1]), &[blocks[0]]);
    assert_eq!(bundle.graph.successors(blocks[0]), &[blocks[1], blocks[2]]);
    assert_eq!(bundle.graph.predecessors(blocks[2]), &[blocks[0], blocks[1]]);
}

#[test]
fn test_memory_objects_per_origin() {
    let mut b = ProgramBuilder::new("objects");
    let table = b.global("table", 32);
    let malloc = b.declare("malloc", Signature::new(vec![Type::i64()], Type::Ptr));
    let main = b.function("main", Signature::default());
    let entry = b.block(main).unwrap();
    b.position_at_end(entry);
    let slot = b.alloca(Type::i32(), 4).unwrap();
    let heap = b.heap_alloc(malloc, Value::i64(24)).unwrap();
    let alias = b.offset(heap.clone(), Value::i64(8)).unwrap();
    b.alias(alias.clone(), &heap);
    b.ret(None).unwrap();
    let bundle = b.finish().unwrap();

    let origins = |pointer: &Value| -> Vec<(ObjectOrigin, u64)> {
        bundle
            .points_to
            .targets(pointer)
            .into_iter()
            .map(|o| (o.origin, o.size))
            .collect()
    };
    assert_eq!(origins(&Value::Global(table)), vec![(ObjectOrigin::Global(table), 32)]);
    assert_eq!(
        origins(&slot),
        vec![(ObjectOrigin::Alloca(slot.as_inst().unwrap()), 16)]
    );
    assert_eq!(origins(&alias), origins(&heap));
    assert_eq!(
        origins(&heap),
        vec![(ObjectOrigin::HeapCall(heap.as_inst().unwrap()), 24)]
    );
    assert!(bundle.graph.find(NodeKey::Global(table)).is_some());
}

#[test]
fn test_loop_is_found_from_its_body() {
    let mut b = ProgramBuilder::new("loop");
    let main = b.function("main", Signature::default());
    let blocks: Vec<_> = (0..4).map(|_| b.block(main).unwrap()).collect();
    let (pre, header, body, exit) = (blocks[0], blocks[1], blocks[2], blocks[3]);

    b.position_at_end(pre);
    b.jump(header).unwrap();
    b.position_at_end(header);
    b.branch(Value::int(1, 1), body, exit).unwrap();
    b.position_at_end(body);
    b.jump(header).unwrap();
    b.position_at_end(exit);
    b.ret(None).unwrap();
    b.set_idom(header, pre).unwrap();
    b.set_idom(body, header).unwrap();
    b.set_idom(exit, header).unwrap();
    let bundle = b.finish().unwrap();

    let found = enclosing_loop(&bundle.graph, body).unwrap();
    assert_eq!(found.header, header);
    assert_eq!(found.latch, body);
    assert_eq!(found.preheader(&bundle.graph), Some(pre));
    assert!(found.is_conditional_exit(&bundle.graph, header));
    assert!(enclosing_loop(&bundle.graph, exit).is_none());
}
