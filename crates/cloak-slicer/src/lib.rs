/*! Secret-dependence marking, transactional instrumentation and slicing.
 *
 * Code whose control flow or addresses depend on a secret leaks it through the cache. This crate
 * finds that code by walking the program dependence graph from the secret, wraps every
 * secret-dependent region in a transaction that first preloads everything the region may touch,
 * and can reduce the program to the computed slice.
 */

pub mod config;
pub mod errors;
pub mod instrument;
pub mod loops;
pub mod mark;
pub mod pipeline;
pub mod report;
pub mod slicer;
pub mod walk;

pub use config::{RuntimeCall, RuntimeSymbols, SliceDirection, SlicerConfig};
pub use errors::Diagnostic;
pub use instrument::{track_deallocations, Instrumenter, ObjectSets};
pub use mark::{MarkContext, Pass, WalkAndMark};
pub use pipeline::{instrument, seeds, slice, Criterion};
pub use report::{
    BufferKind, BufferRecord, PreloadKind, PreloadRecord, Report, TransactionKind, TransactionRecord,
};
pub use slicer::{DefaultRemoval, ModuleRemoval, RemovalPolicy, Slicer, SlicerStatistics};
pub use walk::{NodesWalk, Visit};
