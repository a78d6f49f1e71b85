//! Items, sources and copy semantics.
//!
//! This module provides:
//! - The tagged `Item` model (values, nested sequences, streams, deferred tasks)
//! - Stage and deferred task outputs
//! - The `Source` trait and stock sources

mod data;
mod item;
mod source;

pub use data::DataItem;
pub use item::{BlockingTask, Deferred, DeferredResult, Item, Meta, Output, Pull};
pub use source::{BoxSource, FnSource, ItemIterSource, IterSource, Source, StreamSource};
