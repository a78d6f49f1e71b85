//! The tagged item model flowing through pipes.

use super::source::{BoxSource, IterSource};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use std::fmt::Debug;
use std::future::Future;

/// Metadata travelling with an item from stage to stage.
pub type Meta = serde_json::Value;

/// Result of a deferred task; processed like a stage output.
pub type DeferredResult<T> = anyhow::Result<Output<T>>;

/// A blocking deferred task.
pub type BlockingTask<T> = Box<dyn FnOnce() -> DeferredResult<T> + Send>;

/// A value produced by a source or a stage.
///
/// The scheduler dispatches on the variant: concrete values advance through
/// the remaining stages, sequences and streams become new sources, deferred
/// tasks go to the worker pool.
pub enum Item<T> {
    /// A concrete value.
    Value(T),
    /// A nested lazy sequence, flattened at the step it was produced.
    Sequence(BoxSource<T>),
    /// An async sequence, pulled one element at a time through the pool.
    Stream(BoxStream<'static, anyhow::Result<Item<T>>>),
    /// Work executed off the scheduler thread.
    Deferred(Deferred<T>),
}

/// Work that is executed by the worker pool.
pub enum Deferred<T> {
    /// Runs on a blocking worker thread.
    Blocking(BlockingTask<T>),
    /// Runs on the pool's async workers.
    Future(BoxFuture<'static, DeferredResult<T>>),
}

impl<T: Send + 'static> Item<T> {
    /// Wraps a concrete value.
    pub const fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Creates a nested sequence from any iterator of values.
    pub fn sequence<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::Sequence(Box::new(IterSource::new(iter.into_iter())))
    }

    /// Creates a nested sequence from a source.
    pub fn source(source: impl super::Source<T> + 'static) -> Self {
        Self::Sequence(Box::new(source))
    }

    /// Creates an async sequence of values.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::Stream(stream.map(|value| Ok(Self::Value(value))).boxed())
    }

    /// Creates an async sequence of fallible values.
    pub fn try_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        Self::Stream(stream.map(|value| value.map(Self::Value)).boxed())
    }

    /// Defers a blocking computation of a value.
    pub fn blocking<F>(task: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::Deferred(Deferred::Blocking(Box::new(move || {
            task().map(Output::value)
        })))
    }

    /// Defers a future producing a value.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Deferred(Deferred::Future(
            async move { future.await.map(Output::value) }.boxed(),
        ))
    }

    /// Returns the variant name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Sequence(_) => "sequence",
            Self::Stream(_) => "stream",
            Self::Deferred(_) => "deferred",
        }
    }

    /// Returns true if the item is a concrete value.
    #[must_use]
    pub const fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Returns the concrete value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<T> for Item<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: Debug> Debug for Item<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Sequence(_) => f.write_str("Sequence(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Deferred(Deferred::Blocking(_)) => f.write_str("Deferred(Blocking)"),
            Self::Deferred(Deferred::Future(_)) => f.write_str("Deferred(Future)"),
        }
    }
}

/// What a stage (or a resolved deferred task) hands to the next stage.
pub enum Output<T> {
    /// Drop the item.
    Skip,
    /// Advance the item with unchanged metadata.
    Item(Item<T>),
    /// Advance the item and replace the metadata.
    WithMeta(Item<T>, Meta),
}

impl<T> Output<T> {
    /// Advances a concrete value.
    pub const fn value(value: T) -> Self {
        Self::Item(Item::Value(value))
    }

    /// Advances a concrete value with new metadata.
    pub const fn value_with_meta(value: T, meta: Meta) -> Self {
        Self::WithMeta(Item::Value(value), meta)
    }

    /// Returns true if the item is dropped.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

impl<T: Debug> Debug for Output<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => f.write_str("Skip"),
            Self::Item(item) => f.debug_tuple("Item").field(item).finish(),
            Self::WithMeta(item, meta) => f.debug_tuple("WithMeta").field(item).field(meta).finish(),
        }
    }
}

impl<T> From<Option<T>> for Output<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Skip, Self::value)
    }
}

impl<T> From<Item<T>> for Output<T> {
    fn from(item: Item<T>) -> Self {
        Self::Item(item)
    }
}

/// Result of pulling from a source.
pub enum Pull<T> {
    /// An item, keeping the cursor's metadata.
    Item(Item<T>),
    /// An item with its own metadata.
    WithMeta(Item<T>, Meta),
    /// Nothing available right now; try other sources.
    Pending,
    /// The source is done.
    Exhausted,
}

impl<T> Pull<T> {
    /// Pulls a concrete value.
    pub const fn value(value: T) -> Self {
        Self::Item(Item::Value(value))
    }
}

impl<T: Debug> Debug for Pull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Item(item) => f.debug_tuple("Item").field(item).finish(),
            Self::WithMeta(item, meta) => f.debug_tuple("WithMeta").field(item).field(meta).finish(),
            Self::Pending => f.write_str("Pending"),
            Self::Exhausted => f.write_str("Exhausted"),
        }
    }
}
