//! Pipe definitions.
//!
//! A pipe is an ordered chain of steps fed either by its own head or by the
//! items of a parent pipe. Steps are transform stages or fork steps that
//! forward items to other pipes.

mod definition;
mod fork;
mod stage;

pub use definition::{clone_pipes, ParametrizedFactory, Pipe, SourceFactory, Step};
pub use fork::{ForkRoute, ForkStep};
pub use stage::{ItemContext, Stage, StageFn};
