/*! IR, dependence graph and points-to model consumed by the cloak slicer.
 *
 * The slicer never builds these structures itself: a front end lowers a program into a
 * [`Module`], computes the dependence graph and points-to facts, and hands them over as a
 * [`ProgramBundle`]. This crate holds the data model plus the insertion primitives the
 * instrumenter uses to rewrite the module in place.
 */

pub mod analysis;
pub mod builder;
pub mod cursor;
pub mod graph;
pub mod instructions;
pub mod ir_persist;
pub mod module;
pub mod types;
pub mod values;

pub use analysis::{
    enclosing_loop, MemoryObject, NaturalLoop, ObjectId, ObjectOrigin, PointsToOracle, PointsToTable,
};
pub use builder::ProgramBuilder;
pub use cursor::{CursorPosition, ModuleCursor};
pub use graph::{
    Block, DependenceGraph, Direction, EdgeKind, GraphId, InstrumentationMarks, Node, NodeId, NodeKey,
    ProgramGraph, SliceId, SliceTag, Stage, WalkStamp,
};
pub use instructions::{BinaryOp, ComparePredicate, InstKind, Instruction};
pub use ir_persist::{load_bundle, save_bundle, ProgramBundle};
pub use module::{BasicBlock, Function, Global, Module};
pub use types::{Signature, Type};
pub use values::{BlockId, FuncId, GlobalId, InstId, SourceLocation, StrId, Value};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(InstId),
    #[error("Unknown block: {0}")]
    UnknownBlock(BlockId),
    #[error("Unknown function: {0}")]
    UnknownFunction(FuncId),
    #[error("Unknown global: {0}")]
    UnknownGlobal(GlobalId),
    #[error("Unknown graph node: {0}")]
    UnknownNode(NodeId),
    #[error("Unknown dependence graph: {0}")]
    UnknownGraph(GraphId),
    #[error("Cursor has no insertion point")]
    InvalidInsertPoint,
    #[error("Block {0} has no instruction to insert before")]
    NoInsertPoint(BlockId),
}

pub type Result<T> = std::result::Result<T, IrError>;
