//! Transform stages.

use crate::items::{DataItem, Item, Meta, Output};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Context handed to a stage together with the item.
///
/// Carries what the stage may need to know about where the item is, instead
/// of any ambient per-thread state.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    /// Name of the pipe the item travels through.
    pub pipe_name: &'a str,
    /// Name of the stage being applied.
    pub stage_name: &'a str,
    /// Index of the stage being applied.
    pub step: usize,
    /// Metadata attached to the item.
    pub meta: Option<&'a Meta>,
}

/// Signature of a stage function.
pub type StageFn<T> = dyn Fn(T, &ItemContext<'_>) -> anyhow::Result<Output<T>> + Send + Sync;

/// A named transform applied to every item reaching it.
pub struct Stage<T> {
    name: Arc<str>,
    func: Arc<StageFn<T>>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            func: Arc::clone(&self.func),
        }
    }
}

impl<T: DataItem> Stage<T> {
    /// Creates a stage from a full stage function.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T, &ItemContext<'_>) -> anyhow::Result<Output<T>> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            func: Arc::new(func),
        }
    }

    /// Creates a stage mapping every value.
    pub fn map<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::new(name, move |item, _| Ok(Output::value(func(item))))
    }

    /// Creates a stage mapping every value with a fallible function.
    pub fn try_map<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::new(name, move |item, _| func(item).map(Output::value))
    }

    /// Creates a stage keeping only values matching the predicate.
    pub fn filter<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::new(name, move |item, _| {
            Ok(if predicate(&item) {
                Output::value(item)
            } else {
                Output::Skip
            })
        })
    }

    /// Creates a stage that maps and drops values in one go.
    pub fn filter_map<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> Option<T> + Send + Sync + 'static,
    {
        Self::new(name, move |item, _| Ok(func(item).into()))
    }

    /// Creates a stage expanding every value into a nested sequence.
    pub fn flat_map<F, I>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(name, move |item, _| Ok(Output::Item(Item::sequence(func(item)))))
    }

    /// Creates a stage whose work runs on a blocking pool worker.
    pub fn defer<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, move |item, _| {
            let func = Arc::clone(&func);
            Ok(Output::Item(Item::blocking(move || func(item))))
        })
    }

    /// Creates a stage whose work is a future run by the pool.
    pub fn defer_async<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(name, move |item, _| Ok(Output::Item(Item::future(func(item)))))
    }
}

impl<T> Stage<T> {
    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the stage to an item.
    pub fn call(&self, item: T, ctx: &ItemContext<'_>) -> anyhow::Result<Output<T>> {
        (self.func)(item, ctx)
    }
}

impl<T> Debug for Stage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}
