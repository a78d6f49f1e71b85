//! # Extractflow
//!
//! A lazy extraction scheduler for nested data pipelines.
//!
//! Extractflow drives items from one or more sources through chains of
//! transform steps, with support for:
//!
//! - **Nested sources**: stages may return sequences or streams that are
//!   flattened into the output
//! - **Deferred work**: blocking calls and futures run on a bounded worker pool
//! - **Fairness**: round robin across sources, or fifo to drain the newest first
//! - **Forks**: dependent pipes receive every item of their parent
//! - **Cleanup**: every source is closed exactly once, whatever ends iteration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use extractflow::prelude::*;
//! use std::sync::Arc;
//!
//! let users = Arc::new(Pipe::from_iter("users", vec![1_i64, 2, 3]));
//! let posts = Arc::new(Pipe::transformer(
//!     "posts",
//!     Arc::clone(&users),
//!     Stage::defer("fetch_posts", |user| Ok(user * 100)),
//! ));
//!
//! let iter = PipeIterator::from_pipes(&[users, posts], true, &ExtractConfig::default())?;
//! for finished in iter {
//!     let finished = finished?;
//!     println!("{}: {}", finished.pipe_name(), finished.item);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod items;
pub mod iterator;
pub mod observability;
pub mod pipe;
pub mod pool;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ExtractConfig, NextItemMode};
    pub use crate::errors::{ExtractError, ExtractionKind};
    pub use crate::items::{
        DataItem, Deferred, DeferredResult, FnSource, Item, ItemIterSource, IterSource, Meta,
        Output, Pull, Source, StreamSource,
    };
    pub use crate::iterator::{ExtractStats, FinishedItem, PipeIterator};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipe::{clone_pipes, ItemContext, Pipe, Stage};
    pub use crate::pool::{FuturesPool, PoolMetrics};
}
