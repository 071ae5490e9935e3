/*! Transactional instrumentation driven by the slice marks.
 *
 * Passes 1 and 2 of the marking walk land here: sensitive accesses have the memory objects
 * they may touch resolved (and buffered), the topmost secret-dependent branch guarding them is
 * located, and a transaction with preloads is placed around it.
 */

pub mod dealloc;
pub mod guard;
pub mod objects;
pub mod placement;

pub use dealloc::track_deallocations;
pub use objects::ObjectSets;

use crate::config::{RuntimeCall, SlicerConfig};
use crate::errors::Diagnostic;
use crate::loops::exited_loop;
use crate::mark::MarkContext;
use crate::report::PreloadKind;
use crate::walk::Visit;
use cloak_ir::{
    CursorPosition, InstId, IrError, Module, ModuleCursor, NodeId, SliceId, SliceTag, Stage, Value,
};
use std::collections::HashSet;
use tracing::debug;

/// Insert a call to a runtime primitive, declaring it on first use.
pub(crate) fn emit_runtime_call(
    module: &mut Module,
    config: &SlicerConfig,
    position: CursorPosition,
    call: RuntimeCall,
    args: Vec<Value>,
) -> Result<InstId, IrError> {
    let callee = module.declare_function(config.runtime.name(call), call.signature());
    ModuleCursor::at(module, position).call(callee, args)
}

pub struct Instrumenter<'c, 'a> {
    pub(crate) cx: &'c mut MarkContext<'a>,
    pub(crate) slice: SliceId,
    pub(crate) buffers: u32,
    preloaded: HashSet<(InstId, PreloadKind)>,
}

impl<'c, 'a> Instrumenter<'c, 'a> {
    pub fn new(cx: &'c mut MarkContext<'a>, slice: SliceId, buffers: u32) -> Self {
        Self {
            cx,
            slice,
            buffers,
            preloaded: HashSet::new(),
        }
    }

    pub fn buffers(&self) -> u32 {
        self.buffers
    }

    /// Pass 1: a marked conditional branch that exits its loop gets the whole loop wrapped.
    pub fn loop_prepass(&mut self, id: NodeId) -> Visit {
        let expand = Visit::Expand { control: true };
        let Some(inst) = self.marked_inst(id) else {
            return expand;
        };
        let is_conditional = self
            .cx
            .module
            .insts
            .get(&inst)
            .map_or(false, |i| i.is_conditional_branch());
        if !is_conditional {
            return expand;
        }
        let Some(block) = self.cx.graph.nodes.get(&id).and_then(|n| n.block) else {
            return expand;
        };
        let Some(found) = exited_loop(self.cx.graph, block) else {
            return expand;
        };
        debug!(branch = %inst, header = %found.header, "conditional exit of a loop");

        let mut sets = ObjectSets::default();
        for &blk in &found.blocks {
            let nodes = self
                .cx
                .graph
                .blocks
                .get(&blk)
                .map(|b| b.nodes.clone())
                .unwrap_or_default();
            for nd in nodes {
                let pointers: Vec<Value> = self
                    .cx
                    .graph
                    .nodes
                    .get(&nd)
                    .and_then(|n| n.inst())
                    .and_then(|i| self.cx.module.insts.get(&i))
                    .filter(|i| i.is_load_or_store())
                    .and_then(|i| i.accessed_address().cloned())
                    .into_iter()
                    .collect();
                if !pointers.is_empty() {
                    self.resolve_objects(nd, &pointers, &mut sets);
                }
                if let Some(node) = self.cx.graph.nodes.get_mut(&nd) {
                    node.tag = SliceTag::Unmarked;
                }
            }
        }

        self.guard_block(found.header, Some(&found), false, &sets);
        expand
    }

    /// Pass 2: a marked load, store, copy or fill triggers placement.
    pub fn instrument(&mut self, id: NodeId) -> Visit {
        let expand = Visit::Expand { control: true };
        let Some(inst) = self.marked_inst(id) else {
            return expand;
        };
        let Some(instruction) = self.cx.module.insts.get(&inst) else {
            return expand;
        };
        if !instruction.is_load_or_store() && !instruction.is_bulk_memory() {
            return expand;
        }
        let pointers: Vec<Value> = instruction.touched_pointers().into_iter().cloned().collect();
        let Some(block) = self.cx.graph.nodes.get(&id).and_then(|n| n.block) else {
            return expand;
        };

        self.advance(id, Stage::AccessSeen);
        let mut sets = ObjectSets::default();
        self.resolve_objects(id, &pointers, &mut sets);
        let address_dependent = pointers
            .iter()
            .any(|pointer| self.address_dependency(id, pointer));

        self.guard_block(block, None, address_dependent, &sets);
        expand
    }

    /// Look for a marked neighbour that computes `address`: a reverse data edge or an operand
    /// definition. A hit is moved to `AddressResolved`.
    pub(crate) fn address_dependency(&mut self, id: NodeId, address: &Value) -> bool {
        let Some(target) = address.as_inst() else {
            return false;
        };
        let Some(node) = self.cx.graph.nodes.get(&id) else {
            return false;
        };
        let candidates: Vec<NodeId> = node
            .data
            .backward
            .iter()
            .chain(node.uses.backward.iter())
            .copied()
            .collect();

        let resolved = SliceTag::Tainted(self.slice, Stage::ObjectResolved);
        for candidate in candidates {
            let Some(other) = self.cx.graph.nodes.get_mut(&candidate) else {
                continue;
            };
            if !other.tag.is_marked() || other.tag == resolved {
                continue;
            }
            if other.inst() == Some(target) {
                other.tag = SliceTag::Tainted(self.slice, Stage::AddressResolved);
                debug!(access = %id, address = %target, "address dependency");
                return true;
            }
        }
        false
    }

    fn marked_inst(&self, id: NodeId) -> Option<InstId> {
        let node = self.cx.graph.nodes.get(&id)?;
        if !node.is_marked() {
            return None;
        }
        node.inst()
    }

    pub(crate) fn advance(&mut self, id: NodeId, stage: Stage) {
        if let Some(node) = self.cx.graph.nodes.get_mut(&id) {
            node.tag.advance(self.slice, stage);
        }
    }

    pub(crate) fn emit(
        &mut self,
        position: CursorPosition,
        call: RuntimeCall,
        args: Vec<Value>,
    ) -> Result<InstId, IrError> {
        emit_runtime_call(self.cx.module, self.cx.config, position, call, args)
    }

    pub(crate) fn gap(&mut self, site: impl std::fmt::Display, reason: impl Into<String>) {
        self.cx.report.push_diagnostic(Diagnostic::gap(site, reason));
    }

    /// Whether an object preload at `anchor` was already emitted and duplicates are unwanted.
    pub(crate) fn already_preloaded(&mut self, anchor: InstId, kind: &PreloadKind) -> bool {
        if !self.cx.config.dedup_preloads {
            return false;
        }
        !self.preloaded.insert((anchor, kind.clone()))
    }
}
