//! Source cursors and the items moving between them.

use crate::errors::{ExtractError, ExtractionKind};
use crate::items::{BoxSource, Item, Meta, Pull};
use crate::pipe::Pipe;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// An item on its way through a pipe.
///
/// `step` is the index of the next step the item enters; an item with
/// `step == pipe.len()` has passed every step.
pub struct PendingItem<T> {
    /// The item.
    pub item: Item<T>,
    /// Index of the next step.
    pub step: usize,
    /// The pipe the item travels through.
    pub pipe: Arc<Pipe<T>>,
    /// Metadata propagated to later stages.
    pub meta: Option<Meta>,
}

impl<T: Debug> Debug for PendingItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingItem")
            .field("item", &self.item)
            .field("step", &self.step)
            .field("pipe", &self.pipe.name())
            .field("meta", &self.meta)
            .finish()
    }
}

/// A concrete value that passed every step of its pipe.
pub struct FinishedItem<T> {
    /// The value.
    pub item: T,
    /// Metadata attached by the last stage that set any.
    pub meta: Option<Meta>,
    /// The pipe that produced the value.
    pub pipe: Arc<Pipe<T>>,
}

impl<T> FinishedItem<T> {
    /// Returns the name of the pipe that produced the value.
    #[must_use]
    pub fn pipe_name(&self) -> &str {
        self.pipe.name()
    }

    /// Returns the value, dropping metadata and pipe.
    pub fn into_item(self) -> T {
        self.item
    }
}

impl<T: Debug> Debug for FinishedItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishedItem")
            .field("item", &self.item)
            .field("meta", &self.meta)
            .field("pipe", &self.pipe.name())
            .finish()
    }
}

/// Where a deferred task came from; the result re-enters the pipe here.
pub(crate) struct TaskOrigin<T> {
    pub step: usize,
    pub pipe: Arc<Pipe<T>>,
    pub meta: Option<Meta>,
}

pub(crate) enum CursorSource<T> {
    /// A pipe head, nested sequence or stream.
    User(BoxSource<T>),
    /// Items already routed to their pipes by a fork step.
    Routed(VecDeque<PendingItem<T>>),
}

pub(crate) enum Pulled<T> {
    Ready(PendingItem<T>),
    Pending,
    Exhausted,
}

impl<T: Debug> Debug for Pulled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(pending) => f.debug_tuple("Ready").field(pending).finish(),
            Self::Pending => f.write_str("Pending"),
            Self::Exhausted => f.write_str("Exhausted"),
        }
    }
}

/// A live source together with where its items enter a pipe.
pub(crate) struct SourceCursor<T> {
    source: CursorSource<T>,
    step: usize,
    pipe: Arc<Pipe<T>>,
    meta: Option<Meta>,
}

impl<T> SourceCursor<T> {
    pub fn new(source: BoxSource<T>, step: usize, pipe: Arc<Pipe<T>>, meta: Option<Meta>) -> Self {
        Self {
            source: CursorSource::User(source),
            step,
            pipe,
            meta,
        }
    }

    pub fn routed(items: VecDeque<PendingItem<T>>, step: usize, pipe: Arc<Pipe<T>>) -> Self {
        Self {
            source: CursorSource::Routed(items),
            step,
            pipe,
            meta: None,
        }
    }

    pub fn pipe_name(&self) -> &str {
        self.pipe.name()
    }

    pub const fn step(&self) -> usize {
        self.step
    }

    pub fn pull(&mut self) -> Result<Pulled<T>, ExtractError> {
        let source = match &mut self.source {
            CursorSource::Routed(items) => {
                return Ok(items.pop_front().map_or(Pulled::Exhausted, Pulled::Ready));
            }
            CursorSource::User(source) => source,
        };
        let pulled = source.next_item().map_err(|e| {
            ExtractError::wrap(
                e,
                self.pipe.name(),
                self.pipe.producer_name(self.step),
                ExtractionKind::Generator,
            )
        })?;
        Ok(match pulled {
            Pull::Item(item) => Pulled::Ready(PendingItem {
                item,
                step: self.step,
                pipe: Arc::clone(&self.pipe),
                meta: self.meta.clone(),
            }),
            Pull::WithMeta(item, meta) => Pulled::Ready(PendingItem {
                item,
                step: self.step,
                pipe: Arc::clone(&self.pipe),
                meta: Some(meta),
            }),
            Pull::Pending => Pulled::Pending,
            Pull::Exhausted => Pulled::Exhausted,
        })
    }

    /// Closes the underlying source; failures are logged, never raised.
    pub fn close(&mut self) {
        match &mut self.source {
            CursorSource::User(source) => {
                if let Err(e) = source.close() {
                    warn!(
                        pipe = %self.pipe.name(),
                        step = self.step,
                        error = %e,
                        "Failed to close source"
                    );
                }
            }
            CursorSource::Routed(items) => items.clear(),
        }
    }
}
