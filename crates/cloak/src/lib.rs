/*! Shield secret-dependent code from cache-timing observation.
 *
 * Single import for the whole pipeline: the IR and dependence-graph model, bundle persistence,
 * and the slicer that marks, instruments and reduces programs.
 */

pub use cloak_ir as ir;
pub use cloak_slicer as slicer;

pub use cloak_ir::{
    load_bundle, save_bundle, Module, NodeId, PointsToTable, ProgramBuilder, ProgramBundle,
    ProgramGraph, SliceId,
};

pub use cloak_slicer::{
    instrument, slice, Criterion, Diagnostic, Report, SliceDirection, SlicerConfig,
    SlicerStatistics,
};
