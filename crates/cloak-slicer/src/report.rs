use crate::errors::Diagnostic;
use crate::slicer::SlicerStatistics;
use cloak_ir::{BlockId, GlobalId, InstId, NodeId, ObjectId, SliceId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Opened at a secret-dependent branch, closed where its arms reconverge.
    Branch,
    /// Opened in a loop pre-header, closed at the loop's exit confluence.
    Loop,
    /// Wraps a single block holding an address-dependent access.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub slice: SliceId,
    pub kind: TransactionKind,
    /// Block whose entry or branch the transaction starts at.
    pub block: BlockId,
    pub start: InstId,
    /// `None` when the closing call could not be emitted; a structural gap says why.
    pub end: Option<InstId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadKind {
    Stack(u32),
    Heap(u32),
    Global(GlobalId),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadRecord {
    pub kind: PreloadKind,
    pub call: InstId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Stack,
    Heap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferRecord {
    pub id: u32,
    pub kind: BufferKind,
    pub object: ObjectId,
    /// Allocation site the bookkeeping call follows.
    pub site: InstId,
}

/// What a pipeline run did to the program.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub slice: Option<SliceId>,
    pub seeds: Vec<NodeId>,
    pub marked_nodes: usize,
    pub transactions: Vec<TransactionRecord>,
    pub preloads: Vec<PreloadRecord>,
    pub buffers: Vec<BufferRecord>,
    /// `eraseMallocSet` calls placed before deallocations.
    pub releases: Vec<InstId>,
    pub next_buffer_id: u32,
    pub statistics: Option<SlicerStatistics>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::StructuralGap { .. } => tracing::warn!("{}", diagnostic),
            Diagnostic::OracleMiss { .. } => tracing::debug!("{}", diagnostic),
            Diagnostic::UsageError { .. } => tracing::error!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn transactions_of(&self, kind: TransactionKind) -> impl Iterator<Item = &TransactionRecord> {
        self.transactions.iter().filter(move |t| t.kind == kind)
    }

    pub fn structural_gaps(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_structural_gap()).count()
    }
}
