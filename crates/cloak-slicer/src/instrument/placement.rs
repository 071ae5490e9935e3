//! Transaction boundaries and preload emission.
//!
//! Every region is laid out as `start, code preloads, object preloads, anchor`, where the
//! anchor is the instruction the region opens before. The closing anchor is always resolved
//! before anything is inserted, so a failed placement never leaves an unmatched start.

use super::{Instrumenter, ObjectSets};
use crate::config::RuntimeCall;
use crate::report::{PreloadKind, PreloadRecord, TransactionKind, TransactionRecord};
use cloak_ir::{BlockId, CursorPosition, InstId, NaturalLoop, NodeId, Stage, Value};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info};

impl Instrumenter<'_, '_> {
    /// Open a transaction at `branch` and close it where the branch's arms reconverge.
    pub(crate) fn place_branch(&mut self, branch: NodeId, sets: &ObjectSets) {
        let Some((inst, block)) = self
            .cx
            .graph
            .nodes
            .get(&branch)
            .and_then(|n| Some((n.inst()?, n.block?)))
        else {
            return;
        };
        let anchor = match self.cx.module.first_non_phi_from(inst) {
            Ok(anchor) => anchor,
            Err(err) => return self.gap(branch, err.to_string()),
        };

        if self.fresh_region(block) {
            if sets.is_empty() {
                return;
            }
            let Some(post) = self.cx.graph.ipostdom(block) else {
                return self.gap(block, "branch block has no immediate post-dominator");
            };
            let end_anchor = match self.cx.module.first_non_phi(post) {
                Ok(end_anchor) => end_anchor,
                Err(err) => return self.gap(post, err.to_string()),
            };

            self.set_started(block);
            if let Some(outer) = self.enclosing_region(post, block) {
                debug!(block = %block, opened_at = %outer, "branch already inside a transaction");
            } else {
                let Some(start) = self.open(anchor) else {
                    return;
                };
                let end = self.close(end_anchor);
                self.record_close(post, block);
                self.mark_placed(block);
                info!(block = %block, start = %start, "transaction placed at secret branch");
                self.cx.report.transactions.push(TransactionRecord {
                    slice: self.slice,
                    kind: TransactionKind::Branch,
                    block,
                    start,
                    end,
                });
                if self.cx.config.preload_code {
                    self.preload_code(block, post, anchor);
                }
            }
        }
        self.preload_objects(anchor, sets);
    }

    /// Open a transaction in the loop's pre-header and close it at the exit confluence.
    pub(crate) fn place_loop(&mut self, found: &NaturalLoop, sets: &ObjectSets) {
        let Some(preheader) = found.preheader(self.cx.graph) else {
            return self.gap(found.header, "loop header has no immediate dominator");
        };
        let anchor = match self.cx.module.first_non_phi(preheader) {
            Ok(anchor) => anchor,
            Err(err) => return self.gap(preheader, err.to_string()),
        };

        let started = self
            .cx
            .graph
            .blocks
            .get(&preheader)
            .map_or(false, |b| b.marks.loop_txn_started);
        if !started {
            if sets.is_empty() {
                return;
            }
            let Some(exit) = self.exit_confluence(preheader, found) else {
                return self.gap(preheader, "loop has no exit confluence");
            };
            let end_anchor = match self.cx.module.first_non_phi(exit) {
                Ok(end_anchor) => end_anchor,
                Err(err) => return self.gap(exit, err.to_string()),
            };

            if let Some(b) = self.cx.graph.blocks.get_mut(&preheader) {
                b.marks.loop_txn_started = true;
            }
            if let Some(outer) = self.enclosing_region(exit, preheader) {
                debug!(preheader = %preheader, opened_at = %outer, "loop already inside a transaction");
            } else {
                let Some(start) = self.open(anchor) else {
                    return;
                };
                let end = self.close(end_anchor);
                self.record_close(exit, preheader);
                self.mark_placed(found.header);
                info!(preheader = %preheader, exit = %exit, "transaction placed around loop");
                self.cx.report.transactions.push(TransactionRecord {
                    slice: self.slice,
                    kind: TransactionKind::Loop,
                    block: preheader,
                    start,
                    end,
                });
                if self.cx.config.preload_code {
                    self.preload_code(preheader, exit, anchor);
                }
            }
        }
        self.preload_objects(anchor, sets);
    }

    /// Wrap a single block: open before its first real instruction, close before its last node.
    ///
    /// The close sits inside the block itself, so it is not recorded as a confluence other
    /// regions could share.
    pub(crate) fn place_block(&mut self, block: BlockId, sets: &ObjectSets) {
        let anchor = match self.cx.module.first_non_phi(block) {
            Ok(anchor) => anchor,
            Err(err) => return self.gap(block, err.to_string()),
        };

        if self.fresh_region(block) {
            if sets.is_empty() {
                return;
            }
            let end_anchor = self
                .cx
                .graph
                .last_node(block)
                .and_then(|n| self.cx.graph.nodes.get(&n))
                .and_then(|n| n.inst());
            let Some(end_anchor) = end_anchor.filter(|&e| e != anchor) else {
                return self.gap(block, "block has no instruction to wrap");
            };

            self.set_started(block);
            let Some(start) = self.open(anchor) else {
                return;
            };
            let end = self.close(end_anchor);
            self.mark_placed(block);
            info!(block = %block, start = %start, "transaction placed around address-dependent block");
            self.cx.report.transactions.push(TransactionRecord {
                slice: self.slice,
                kind: TransactionKind::Block,
                block,
                start,
                end,
            });
        }
        self.preload_objects(anchor, sets);
    }

    /// Walk immediate post-dominators from the pre-header until leaving the loop.
    fn exit_confluence(&self, preheader: BlockId, found: &NaturalLoop) -> Option<BlockId> {
        let mut current = preheader;
        for _ in 0..=self.cx.graph.blocks.len() {
            let next = self.cx.graph.ipostdom(current)?;
            if !found.contains(next) {
                return Some(next);
            }
            current = next;
        }
        None
    }

    fn fresh_region(&self, block: BlockId) -> bool {
        self.cx
            .graph
            .blocks
            .get(&block)
            .map_or(false, |b| b.marks.txn_started != Some(self.slice) && !b.marks.code_preloaded)
    }

    /// Opening block of a region of this run that already closes at `confluence` and
    /// dominates `opener`. A region opened at `opener` would lie inside it.
    fn enclosing_region(&self, confluence: BlockId, opener: BlockId) -> Option<BlockId> {
        let block = self.cx.graph.blocks.get(&confluence)?;
        block
            .marks
            .closes
            .iter()
            .filter(|(slice, _)| *slice == self.slice)
            .map(|&(_, from)| from)
            .find(|&from| self.cx.graph.dominates(from, opener))
    }

    fn record_close(&mut self, confluence: BlockId, opener: BlockId) {
        if let Some(b) = self.cx.graph.blocks.get_mut(&confluence) {
            b.marks.closes.push((self.slice, opener));
        }
    }

    fn mark_placed(&mut self, block: BlockId) {
        if let Some(b) = self.cx.graph.blocks.get_mut(&block) {
            if b.tag.belongs_to(self.slice) {
                b.tag.advance(self.slice, Stage::Placed);
            }
        }
    }

    fn set_started(&mut self, block: BlockId) {
        if let Some(b) = self.cx.graph.blocks.get_mut(&block) {
            b.marks.txn_started = Some(self.slice);
        }
    }

    fn open(&mut self, anchor: InstId) -> Option<InstId> {
        match self.emit(CursorPosition::Before(anchor), RuntimeCall::StartTransaction, vec![]) {
            Ok(start) => Some(start),
            Err(err) => {
                self.gap(anchor, format!("startTransaction not emitted: {err}"));
                None
            }
        }
    }

    fn close(&mut self, anchor: InstId) -> Option<InstId> {
        match self.emit(CursorPosition::Before(anchor), RuntimeCall::EndTransaction, vec![]) {
            Ok(end) => Some(end),
            Err(err) => {
                self.gap(anchor, format!("endTransaction not emitted: {err}"));
                None
            }
        }
    }

    /// Preload the code of every function the region `start..end` may run.
    ///
    /// Blocks are visited breadth-first from `start`, never entering `end`; each block is
    /// covered once across all regions.
    fn preload_code(&mut self, start: BlockId, end: BlockId, anchor: InstId) {
        let already = self
            .cx
            .graph
            .blocks
            .get(&start)
            .map_or(true, |b| b.marks.code_preloaded);
        if already {
            return;
        }

        let mut functions = HashSet::new();
        let enclosing = self
            .cx
            .module
            .blocks
            .get(&start)
            .and_then(|b| self.cx.module.functions.get(&b.func))
            .map(|f| f.name.clone());
        if let Some(name) = enclosing {
            if !self.cx.config.is_debug_intrinsic(&name) && functions.insert(name.clone()) {
                self.preload_function(anchor, name);
            }
        }
        if let Some(b) = self.cx.graph.blocks.get_mut(&start) {
            b.marks.code_preloaded = true;
        }

        let mut seen: HashSet<BlockId> = HashSet::from([start, end]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let fresh = match self.cx.graph.blocks.get_mut(&current) {
                Some(b) if !b.marks.code_preloaded => {
                    b.marks.code_preloaded = true;
                    true
                }
                _ => false,
            };
            if fresh {
                self.preload_calls(current, anchor, &mut functions);
            }
            for &succ in self.cx.graph.successors(current) {
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
    }

    /// Preload every function called from `block`, following defined callees.
    fn preload_calls(&mut self, block: BlockId, anchor: InstId, functions: &mut HashSet<String>) {
        let mut pending = vec![block];
        let mut scanned = HashSet::new();
        while let Some(current) = pending.pop() {
            if !scanned.insert(current) {
                continue;
            }
            let callees: Vec<_> = self
                .cx
                .module
                .blocks
                .get(&current)
                .map(|b| {
                    b.insts
                        .iter()
                        .filter_map(|i| self.cx.module.insts.get(i)?.called_function())
                        .collect()
                })
                .unwrap_or_default();

            for callee in callees {
                let Some(function) = self.cx.module.functions.get(&callee) else {
                    continue;
                };
                let name = function.name.clone();
                let body = function.blocks.clone();
                if self.cx.config.is_debug_intrinsic(&name) || self.cx.config.runtime.contains(&name) {
                    continue;
                }
                if !functions.insert(name.clone()) {
                    continue;
                }
                self.preload_function(anchor, name);
                pending.extend(body.into_iter().rev());
            }
        }
    }

    fn preload_function(&mut self, anchor: InstId, name: String) {
        let text = self.cx.module.string_constant(&name);
        match self.emit(CursorPosition::Before(anchor), RuntimeCall::PreloadInstAddr, vec![text]) {
            Ok(call) => self.cx.report.preloads.push(PreloadRecord {
                kind: PreloadKind::Code(name),
                call,
            }),
            Err(err) => self.gap(anchor, format!("preloadInstAddr not emitted: {err}")),
        }
    }

    /// One preload per stack buffer, heap buffer and global, right before `anchor`.
    pub(crate) fn preload_objects(&mut self, anchor: InstId, sets: &ObjectSets) {
        let mut plan: Vec<(PreloadKind, RuntimeCall, Vec<Value>)> = Vec::new();
        for &id in &sets.allocs {
            plan.push((
                PreloadKind::Stack(id),
                RuntimeCall::IterateAllocStack,
                vec![Value::i32(id.into())],
            ));
        }
        for &id in &sets.mallocs {
            plan.push((
                PreloadKind::Heap(id),
                RuntimeCall::IterateMallocSet,
                vec![Value::i32(id.into())],
            ));
        }
        for &global in &sets.globals {
            let size = self.cx.module.globals.get(&global).map_or(0, |g| g.size);
            plan.push((
                PreloadKind::Global(global),
                RuntimeCall::IterateGlobal,
                vec![Value::i32(size.into()), Value::Global(global)],
            ));
        }

        for (kind, call, args) in plan {
            if self.already_preloaded(anchor, &kind) {
                continue;
            }
            match self.emit(CursorPosition::Before(anchor), call, args) {
                Ok(inst) => self.cx.report.preloads.push(PreloadRecord { kind, call: inst }),
                Err(err) => self.gap(anchor, format!("preload not emitted: {err}")),
            }
        }
    }
}
