use super::Instrumenter;
use crate::config::RuntimeCall;
use crate::errors::Diagnostic;
use crate::report::{BufferKind, BufferRecord};
use cloak_ir::{
    CursorPosition, GlobalId, InstId, InstKind, MemoryObject, ModuleCursor, NodeId, NodeKey,
    ObjectOrigin, Stage, Type, Value,
};
use indexmap::IndexSet;
use std::collections::BTreeSet;
use tracing::debug;

/// Objects a transaction region has to preload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSets {
    /// Buffer ids of stack objects.
    pub allocs: BTreeSet<u32>,
    /// Buffer ids of heap objects.
    pub mallocs: BTreeSet<u32>,
    pub globals: IndexSet<GlobalId>,
}

impl ObjectSets {
    pub fn is_empty(&self) -> bool {
        self.allocs.is_empty() && self.mallocs.is_empty() && self.globals.is_empty()
    }
}

impl Instrumenter<'_, '_> {
    /// Resolve what `pointers` may point to and collect it into `sets`.
    ///
    /// A secret global or an excluded global among the targets stops resolution for this
    /// access; whatever was collected before stays.
    pub(crate) fn resolve_objects(&mut self, access: NodeId, pointers: &[Value], sets: &mut ObjectSets) {
        let owner = self.cx.graph.nodes.get(&access).and_then(|n| n.graph);

        for pointer in pointers {
            let targets = self.cx.oracle.points_to(pointer);
            if targets.is_empty() {
                self.cx.report.push_diagnostic(Diagnostic::OracleMiss {
                    site: access.to_string(),
                    pointer: pointer.to_string(),
                });
                continue;
            }

            for target in targets {
                let Some(object) = self.cx.oracle.object(target).cloned() else {
                    continue;
                };
                match object.origin {
                    ObjectOrigin::Global(global) => {
                        let Some(gv) = self.cx.module.globals.get(&global) else {
                            continue;
                        };
                        if gv.has_annotation(&self.cx.config.secret_annotation) {
                            debug!(access = %access, global = %gv.name, "secret operand");
                            return;
                        }
                        if self.cx.config.is_excluded_global(&gv.name) {
                            return;
                        }
                        sets.globals.insert(global);
                    }
                    ObjectOrigin::Alloca(site) => {
                        let local = owner.and_then(|g| self.cx.graph.find_in(g, NodeKey::Inst(site)));
                        if let Some(local) = local {
                            self.advance(local, Stage::ObjectResolved);
                            continue;
                        }
                        sets.allocs.insert(self.buffer_stack_object(&object, site));
                    }
                    ObjectOrigin::HeapCall(site) => {
                        let is_allocator = self
                            .cx
                            .module
                            .callee_name(site)
                            .map_or(false, |name| self.cx.config.is_heap_allocator(name));
                        if !is_allocator {
                            continue;
                        }
                        let local = owner.and_then(|g| self.cx.graph.find_in(g, NodeKey::Inst(site)));
                        if let Some(local) = local {
                            self.advance(local, Stage::ObjectResolved);
                        }
                        sets.mallocs.insert(self.buffer_heap_object(&object, site));
                    }
                    ObjectOrigin::Function(_) | ObjectOrigin::Unknown => {}
                }
            }
        }
    }

    fn next_buffer_id(&mut self, object: &MemoryObject) -> (u32, bool) {
        if let Some(id) = object.buffer_id {
            return (id, false);
        }
        self.buffers += 1;
        let id = self.buffers;
        if let Some(target) = self.cx.oracle.object_mut(object.id) {
            target.buffer_id = Some(id);
        }
        (id, true)
    }

    /// Stack objects register themselves right after the allocation and leave the registry
    /// before their function returns.
    fn buffer_stack_object(&mut self, object: &MemoryObject, site: InstId) -> u32 {
        let (id, fresh) = self.next_buffer_id(object);
        if !fresh {
            return id;
        }
        self.cx.report.buffers.push(BufferRecord {
            id,
            kind: BufferKind::Stack,
            object: object.id,
            site,
        });

        if let Err(err) = self.emit_push_alloc_stack(id, site) {
            self.gap(site, format!("pushAllocStack not emitted: {err}"));
        }

        let func = match self.cx.module.function_of(site) {
            Ok(func) => func,
            Err(err) => {
                self.gap(site, err.to_string());
                return id;
            }
        };
        match self.cx.module.return_instruction(func) {
            Some(ret) => {
                if let Err(err) =
                    self.emit(CursorPosition::Before(ret), RuntimeCall::PopAllocStack, vec![Value::i32(id.into())])
                {
                    self.gap(site, format!("popAllocStack not emitted: {err}"));
                }
            }
            None => self.gap(site, "function of the allocation has no return"),
        }
        id
    }

    fn emit_push_alloc_stack(&mut self, id: u32, site: InstId) -> cloak_ir::Result<()> {
        let (elem, count) = match &self.cx.module.inst(site)?.kind {
            InstKind::Alloca { elem, count } => (*elem, count.clone()),
            _ => (Type::Int(8), Value::i64(1)),
        };

        let name = self.cx.config.runtime.name(RuntimeCall::PushAllocStack).to_string();
        let push = self
            .cx
            .module
            .declare_function(&name, RuntimeCall::PushAllocStack.signature());
        let mut cursor = ModuleCursor::at(self.cx.module, CursorPosition::After(site));
        let count = match count.as_const_int() {
            Some(n) => Value::i64(n),
            None => Value::Inst(cursor.insert(InstKind::Cast {
                value: count,
                to: Type::i64(),
            })?),
        };
        cursor.call(
            push,
            vec![
                Value::i32(id.into()),
                count,
                Value::i32(elem.byte_size().into()),
                Value::Inst(site),
            ],
        )?;
        Ok(())
    }

    /// Heap objects register right after the allocation call; size is the constant first
    /// argument or 0.
    fn buffer_heap_object(&mut self, object: &MemoryObject, site: InstId) -> u32 {
        let (id, fresh) = self.next_buffer_id(object);
        if !fresh {
            return id;
        }
        self.cx.report.buffers.push(BufferRecord {
            id,
            kind: BufferKind::Heap,
            object: object.id,
            site,
        });

        let size = self
            .cx
            .module
            .insts
            .get(&site)
            .and_then(|i| i.call_args().first())
            .and_then(|v| v.as_const_int())
            .unwrap_or(0);
        let args = vec![Value::i32(id.into()), Value::i32(size), Value::Inst(site)];
        if let Err(err) = self.emit(CursorPosition::After(site), RuntimeCall::InsertMallocSet, args) {
            self.gap(site, format!("insertMallocSet not emitted: {err}"));
        }
        id
    }
}
