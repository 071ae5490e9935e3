/*! Analysis results the slicer consumes.
 *
 * Points-to facts are supplied from outside through [`PointsToOracle`]; natural loops are
 * recovered on demand from the dominator pointers already stored in the graph.
 */

pub mod alias;
pub mod loops;

pub use alias::{MemoryObject, ObjectId, ObjectOrigin, PointsToOracle, PointsToTable};
pub use loops::{enclosing_loop, NaturalLoop};
