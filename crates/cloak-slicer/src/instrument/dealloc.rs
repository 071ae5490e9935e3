use super::emit_runtime_call;
use crate::config::RuntimeCall;
use crate::errors::Diagnostic;
use crate::mark::MarkContext;
use cloak_ir::{CursorPosition, InstId, ObjectOrigin, Value};
use tracing::debug;

/// Unregister buffered heap objects right before they are freed.
///
/// Every call to a configured deallocator whose pointer may target a buffered heap object gets
/// an `eraseMallocSet(id, ptr)` in front of it. Returns the number of calls emitted.
pub fn track_deallocations(cx: &mut MarkContext<'_>) -> usize {
    let frees: Vec<(InstId, Value)> = cx
        .module
        .insts
        .iter()
        .filter(|&(&id, _)| {
            cx.module
                .callee_name(id)
                .map_or(false, |name| cx.config.is_heap_deallocator(name))
        })
        .filter_map(|(&id, inst)| Some((id, inst.call_args().first()?.clone())))
        .collect();

    let mut emitted = 0;
    for (call, pointer) in frees {
        let buffers: Vec<u32> = cx
            .oracle
            .targets(&pointer)
            .into_iter()
            .filter(|object| match object.origin {
                ObjectOrigin::HeapCall(site) => cx
                    .module
                    .callee_name(site)
                    .map_or(false, |name| cx.config.is_heap_allocator(name)),
                _ => false,
            })
            .filter_map(|object| object.buffer_id)
            .collect();

        for id in buffers {
            let args = vec![Value::i32(id.into()), pointer.clone()];
            match emit_runtime_call(cx.module, cx.config, CursorPosition::Before(call), RuntimeCall::EraseMallocSet, args) {
                Ok(erase) => {
                    debug!(buffer = id, free = %call, "heap buffer released");
                    cx.report.releases.push(erase);
                    emitted += 1;
                }
                Err(err) => cx
                    .report
                    .push_diagnostic(Diagnostic::gap(call, format!("eraseMallocSet not emitted: {err}"))),
            }
        }
    }
    emitted
}
