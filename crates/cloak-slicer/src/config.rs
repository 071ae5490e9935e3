use anyhow::Context;
use cloak_ir::{Signature, Type};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceDirection {
    /// Follow dependents: what the seeds influence.
    Forward,
    /// Follow dependencies: what influences the seeds.
    Backward,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerConfig {
    /// Overrides the criterion's natural direction when set.
    pub direction: Option<SliceDirection>,
    pub secret_annotation: String,
    pub heap_allocators: Vec<String>,
    pub heap_deallocators: Vec<String>,
    /// Globals whose name contains one of these never get preloaded.
    pub excluded_globals: Vec<String>,
    pub debug_intrinsic_prefix: String,
    /// Calls always added to a call-site criterion.
    pub assume_intrinsics: Vec<String>,
    pub preload_code: bool,
    pub dedup_preloads: bool,
    pub runtime: RuntimeSymbols,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            direction: None,
            secret_annotation: "secret".to_string(),
            heap_allocators: vec!["malloc".to_string()],
            heap_deallocators: vec!["free".to_string()],
            excluded_globals: vec![".str.".to_string()],
            debug_intrinsic_prefix: "llvm.dbg.".to_string(),
            assume_intrinsics: vec!["klee_assume".to_string()],
            preload_code: true,
            dedup_preloads: false,
            runtime: RuntimeSymbols::default(),
        }
    }
}

impl SlicerConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid slicer configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn is_heap_allocator(&self, name: &str) -> bool {
        self.heap_allocators.iter().any(|n| n == name)
    }

    pub fn is_heap_deallocator(&self, name: &str) -> bool {
        self.heap_deallocators.iter().any(|n| n == name)
    }

    pub fn is_excluded_global(&self, name: &str) -> bool {
        self.excluded_globals.iter().any(|p| name.contains(p.as_str()))
    }

    pub fn is_debug_intrinsic(&self, name: &str) -> bool {
        !self.debug_intrinsic_prefix.is_empty() && name.starts_with(&self.debug_intrinsic_prefix)
    }
}

/// Names of the runtime entry points the instrumented program links against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSymbols {
    pub start_transaction: String,
    pub end_transaction: String,
    pub push_alloc_stack: String,
    pub pop_alloc_stack: String,
    pub insert_malloc_set: String,
    pub erase_malloc_set: String,
    pub iterate_alloc_stack: String,
    pub iterate_malloc_set: String,
    pub iterate_global: String,
    pub preload_inst_addr: String,
}

impl Default for RuntimeSymbols {
    fn default() -> Self {
        Self {
            start_transaction: "startTransaction".to_string(),
            end_transaction: "endTransaction".to_string(),
            push_alloc_stack: "pushAllocStack".to_string(),
            pop_alloc_stack: "popAllocStack".to_string(),
            insert_malloc_set: "insertMallocSet".to_string(),
            erase_malloc_set: "eraseMallocSet".to_string(),
            iterate_alloc_stack: "iterateAllocStack".to_string(),
            iterate_malloc_set: "iterateMallocSet".to_string(),
            iterate_global: "iterateGlobal".to_string(),
            preload_inst_addr: "preloadInstAddr".to_string(),
        }
    }
}

/// One runtime primitive, used to look up its name and signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeCall {
    StartTransaction,
    EndTransaction,
    PushAllocStack,
    PopAllocStack,
    InsertMallocSet,
    EraseMallocSet,
    IterateAllocStack,
    IterateMallocSet,
    IterateGlobal,
    PreloadInstAddr,
}

impl RuntimeCall {
    pub fn signature(self) -> Signature {
        match self {
            RuntimeCall::StartTransaction | RuntimeCall::EndTransaction => Signature::void(vec![]),
            RuntimeCall::PushAllocStack => {
                Signature::void(vec![Type::i32(), Type::i64(), Type::i32(), Type::Ptr])
            }
            RuntimeCall::PopAllocStack
            | RuntimeCall::IterateAllocStack
            | RuntimeCall::IterateMallocSet => Signature::void(vec![Type::i32()]),
            RuntimeCall::InsertMallocSet => Signature::void(vec![Type::i32(), Type::i32(), Type::Ptr]),
            RuntimeCall::EraseMallocSet => Signature::new(vec![Type::i32(), Type::Ptr], Type::Bool),
            RuntimeCall::IterateGlobal => Signature::void(vec![Type::i32(), Type::Ptr]),
            RuntimeCall::PreloadInstAddr => Signature::void(vec![Type::Ptr]),
        }
    }
}

impl RuntimeSymbols {
    pub fn name(&self, call: RuntimeCall) -> &str {
        match call {
            RuntimeCall::StartTransaction => &self.start_transaction,
            RuntimeCall::EndTransaction => &self.end_transaction,
            RuntimeCall::PushAllocStack => &self.push_alloc_stack,
            RuntimeCall::PopAllocStack => &self.pop_alloc_stack,
            RuntimeCall::InsertMallocSet => &self.insert_malloc_set,
            RuntimeCall::EraseMallocSet => &self.erase_malloc_set,
            RuntimeCall::IterateAllocStack => &self.iterate_alloc_stack,
            RuntimeCall::IterateMallocSet => &self.iterate_malloc_set,
            RuntimeCall::IterateGlobal => &self.iterate_global,
            RuntimeCall::PreloadInstAddr => &self.preload_inst_addr,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        [
            &self.start_transaction,
            &self.end_transaction,
            &self.push_alloc_stack,
            &self.pop_alloc_stack,
            &self.insert_malloc_set,
            &self.erase_malloc_set,
            &self.iterate_alloc_stack,
            &self.iterate_malloc_set,
            &self.iterate_global,
            &self.preload_inst_addr,
        ]
        .iter()
        .any(|n| n.as_str() == name)
    }
}
