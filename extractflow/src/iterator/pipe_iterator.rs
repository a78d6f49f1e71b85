//! The extraction scheduler.

use super::cursor::{FinishedItem, PendingItem, Pulled, SourceCursor, TaskOrigin};
use super::fork_plan::ForkPlan;
use super::stats::ExtractStats;
use crate::config::{ExtractConfig, NextItemMode};
use crate::errors::{ExtractError, ExtractionKind};
use crate::items::{DataItem, Item, Output, StreamSource};
use crate::pipe::{ForkRoute, ItemContext, Pipe, Step};
use crate::pool::{FuturesPool, PoolPoll, Resolved};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// What became of an item after one round of processing.
enum Progress<T> {
    /// The item passed every step.
    Finished(FinishedItem<T>),
    /// The item moved on to its next step.
    Next(PendingItem<T>),
    /// The item was dropped, registered as a source or submitted to the pool.
    Consumed,
}

/// Drives a forest of pipes and yields their finished items one at a time.
///
/// Items are pulled from the registered sources, advanced through their
/// pipe's steps depth first, and handed to the caller once they passed the
/// last step. Nested sequences and streams become new sources, deferred
/// tasks go to a bounded [`FuturesPool`]. Any error closes the iterator.
///
/// # Example
///
/// ```rust,ignore
/// use extractflow::prelude::*;
///
/// let pipe = Pipe::from_iter("numbers", vec![1_i64, 2, 3])
///     .with_stage(Stage::map("double", |x| x * 2));
/// let items: Vec<i64> = PipeIterator::from_pipe(&pipe, &ExtractConfig::default())?
///     .map(|r| r.map(FinishedItem::into_item))
///     .collect::<Result<_, _>>()?;
/// ```
pub struct PipeIterator<T> {
    sources: Vec<SourceCursor<T>>,
    initial_sources_count: usize,
    current_source_index: usize,
    next_item_mode: NextItemMode,
    fifo_switch_threshold: usize,
    pool: FuturesPool<T, TaskOrigin<T>>,
    stats: ExtractStats,
    closed: bool,
}

impl<T: DataItem> PipeIterator<T> {
    fn new(roots: Vec<Arc<Pipe<T>>>, config: &ExtractConfig) -> Result<Self, ExtractError> {
        config.validate()?;
        let mut sources = Vec::with_capacity(roots.len());
        for root in roots {
            match root.evaluate_head() {
                Ok(head) => sources.push(SourceCursor::new(head, 0, root, None)),
                Err(e) => {
                    sources.iter_mut().for_each(SourceCursor::close);
                    return Err(e);
                }
            }
        }
        info!(
            sources = sources.len(),
            mode = config.next_item_mode.as_str(),
            max_parallel_items = config.max_parallel_items,
            workers = config.workers,
            "Created pipe iterator"
        );
        Ok(Self {
            initial_sources_count: sources.len(),
            stats: ExtractStats {
                sources_added: sources.len() as u64,
                ..ExtractStats::default()
            },
            sources,
            current_source_index: 0,
            next_item_mode: config.next_item_mode,
            fifo_switch_threshold: config.effective_fifo_switch_threshold(),
            pool: FuturesPool::from_config(config),
            closed: false,
        })
    }

    /// Creates an iterator over a single pipe.
    ///
    /// A dependent pipe is first joined with its ancestors into one pipe.
    /// The pipe is cloned, so the same pipe can be extracted again as long as
    /// its head is re-evaluable.
    pub fn from_pipe(pipe: &Pipe<T>, config: &ExtractConfig) -> Result<Self, ExtractError> {
        let pipe = Arc::new(pipe.full_pipe()?);
        Self::new(vec![pipe], config)
    }

    /// Creates an iterator over several pipes.
    ///
    /// Dependent pipes are fed through fork steps added to clones of their
    /// parents; every root pipe becomes one source. With `yield_parents`, a
    /// requested parent also yields its own items.
    pub fn from_pipes(
        pipes: &[Arc<Pipe<T>>],
        yield_parents: bool,
        config: &ExtractConfig,
    ) -> Result<Self, ExtractError> {
        let roots = ForkPlan::build(pipes, yield_parents, config.copy_on_fork)?.into_roots();
        Self::new(roots, config)
    }

    /// Returns the next finished item, or `None` at the end of the stream.
    ///
    /// Errors close the iterator before they are returned; once closed, the
    /// iterator reports the end of the stream.
    pub fn next_item(&mut self) -> Result<Option<FinishedItem<T>>, ExtractError> {
        if self.closed {
            return Ok(None);
        }
        match self.advance() {
            Ok(Some(finished)) => {
                self.stats.items_yielded += 1;
                Ok(Some(finished))
            }
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "Extraction failed, closing pipe iterator");
                self.close();
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<FinishedItem<T>>, ExtractError> {
        let mut pending: Option<PendingItem<T>> = None;
        loop {
            let current = match pending.take() {
                Some(current) => current,
                None => match self.acquire()? {
                    Some(current) => current,
                    None if self.sources.is_empty() && self.pool.is_empty() => return Ok(None),
                    None => continue,
                },
            };
            match self.process(current)? {
                Progress::Finished(finished) => return Ok(Some(finished)),
                Progress::Next(next) => pending = Some(next),
                Progress::Consumed => {}
            }
        }
    }

    /// Finds the next item to process: a resolved task first, then a source
    /// item, then a bounded wait on the pool.
    fn acquire(&mut self) -> Result<Option<PendingItem<T>>, ExtractError> {
        if let Some(resolved) = self.pool.resolve_next_future_no_wait() {
            return Self::resolved(resolved);
        }
        if let Some(pending) = self.get_source_item()? {
            return Ok(Some(pending));
        }
        match self.pool.resolve_next_future(None) {
            PoolPoll::Ready(resolved) => Self::resolved(resolved),
            PoolPoll::TimedOut => Ok(None),
            PoolPoll::Idle => {
                if !self.sources.is_empty() {
                    self.pool.sleep();
                }
                Ok(None)
            }
        }
    }

    fn resolved(resolved: Resolved<T, TaskOrigin<T>>) -> Result<Option<PendingItem<T>>, ExtractError> {
        let TaskOrigin { step, pipe, meta } = resolved.context;
        let output = resolved.result.map_err(|e| {
            ExtractError::wrap(e, pipe.name(), pipe.producer_name(step), ExtractionKind::Future)
        })?;
        Ok(match output {
            Output::Skip => None,
            Output::Item(item) => Some(PendingItem {
                item,
                step,
                pipe,
                meta,
            }),
            Output::WithMeta(item, meta) => Some(PendingItem {
                item,
                step,
                pipe,
                meta: Some(meta),
            }),
        })
    }

    fn process(&mut self, pending: PendingItem<T>) -> Result<Progress<T>, ExtractError> {
        let PendingItem {
            item,
            step,
            pipe,
            meta,
        } = pending;
        let value = match item {
            Item::Value(value) => value,
            Item::Sequence(source) => {
                self.add_source(SourceCursor::new(source, step, pipe, meta));
                return Ok(Progress::Consumed);
            }
            Item::Stream(stream) => {
                let source = Box::new(StreamSource::new(stream));
                self.add_source(SourceCursor::new(source, step, pipe, meta));
                return Ok(Progress::Consumed);
            }
            Item::Deferred(task) => {
                trace!(pipe = %pipe.name(), step, "Submitting deferred task");
                self.pool.submit(task, TaskOrigin { step, pipe, meta })?;
                self.stats.tasks_submitted += 1;
                return Ok(Progress::Consumed);
            }
        };

        let len = pipe.len();
        if step == len {
            return Ok(Progress::Finished(FinishedItem {
                item: value,
                meta,
                pipe,
            }));
        }
        match pipe.step(step) {
            Some(Step::Transform(stage)) => {
                let ctx = ItemContext {
                    pipe_name: pipe.name(),
                    stage_name: stage.name(),
                    step,
                    meta: meta.as_ref(),
                };
                let output = stage
                    .call(value, &ctx)
                    .map_err(|e| ExtractError::wrap(e, pipe.name(), stage.name(), ExtractionKind::Transform))?;
                Ok(match output {
                    Output::Skip => Progress::Consumed,
                    Output::Item(item) => Progress::Next(PendingItem {
                        item,
                        step: step + 1,
                        pipe,
                        meta,
                    }),
                    Output::WithMeta(item, meta) => Progress::Next(PendingItem {
                        item,
                        step: step + 1,
                        pipe,
                        meta: Some(meta),
                    }),
                })
            }
            Some(Step::Fork(fork)) => {
                let routed: VecDeque<PendingItem<T>> = fork
                    .split(value)
                    .into_iter()
                    .map(|(value, route)| match route {
                        ForkRoute::Pipe { pipe: target, step } => PendingItem {
                            item: Item::Value(value),
                            step: *step,
                            pipe: Arc::clone(target),
                            meta: meta.clone(),
                        },
                        ForkRoute::Parent => PendingItem {
                            item: Item::Value(value),
                            step: len,
                            pipe: Arc::clone(&pipe),
                            meta: meta.clone(),
                        },
                    })
                    .collect();
                if !routed.is_empty() {
                    self.add_source(SourceCursor::routed(routed, step, pipe));
                }
                Ok(Progress::Consumed)
            }
            None => Err(ExtractError::item_processing(
                pipe.name(),
                format!("item at step {step} is past the last step of a pipe with {len} steps"),
            )),
        }
    }

    fn add_source(&mut self, cursor: SourceCursor<T>) {
        debug!(
            pipe = %cursor.pipe_name(),
            step = cursor.step(),
            sources = self.sources.len() + 1,
            "Registered source"
        );
        self.sources.push(cursor);
        self.stats.sources_added += 1;
    }

    fn use_fifo(&mut self, sources_count: usize) -> bool {
        if self.next_item_mode == NextItemMode::Fifo {
            return true;
        }
        let nested = sources_count.saturating_sub(self.initial_sources_count);
        if nested >= self.fifo_switch_threshold {
            trace!(nested, threshold = self.fifo_switch_threshold, "Too many nested sources, selecting fifo");
            self.stats.fifo_switches += 1;
            return true;
        }
        false
    }

    /// Pulls one item from the sources.
    ///
    /// Returns `None` when there are no sources or a full round over them
    /// produced nothing.
    fn get_source_item(&mut self) -> Result<Option<PendingItem<T>>, ExtractError> {
        'select: loop {
            let sources_count = self.sources.len();
            if sources_count == 0 {
                return Ok(None);
            }
            self.current_source_index = if self.use_fifo(sources_count) {
                sources_count - 1
            } else {
                (self.current_source_index + sources_count - 1) % sources_count
            };

            let first_evaluated = self.current_source_index;
            loop {
                let index = self.current_source_index;
                match self.sources[index].pull()? {
                    Pulled::Ready(pending) => {
                        self.stats.items_pulled += 1;
                        return Ok(Some(pending));
                    }
                    Pulled::Pending => {
                        self.current_source_index = (index + sources_count - 1) % sources_count;
                        if self.current_source_index == first_evaluated {
                            return Ok(None);
                        }
                    }
                    Pulled::Exhausted => {
                        let mut cursor = self.sources.remove(index);
                        cursor.close();
                        if index < self.initial_sources_count {
                            self.initial_sources_count -= 1;
                        }
                        self.stats.sources_exhausted += 1;
                        debug!(
                            pipe = %cursor.pipe_name(),
                            sources = self.sources.len(),
                            "Source exhausted"
                        );
                        continue 'select;
                    }
                }
            }
        }
    }

    /// Runs `f` on the iterator and closes it afterwards, whatever `f` returns.
    pub fn scope<R>(mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let result = f(&mut self);
        self.close();
        result
    }
}

impl<T> PipeIterator<T> {
    /// Returns the iteration statistics.
    #[must_use]
    pub const fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    /// Returns the pool metrics.
    #[must_use]
    pub fn pool_metrics(&self) -> &crate::pool::PoolMetrics {
        self.pool.metrics()
    }

    /// Returns the number of live sources.
    #[must_use]
    pub fn sources_count(&self) -> usize {
        self.sources.len()
    }

    /// Returns true once the iterator was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the pool, then every open source, and clears all state.
    ///
    /// Failures to close a source are logged. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pool.close();
        let open_sources = self.sources.len();
        for mut cursor in self.sources.drain(..) {
            if catch_unwind(AssertUnwindSafe(|| cursor.close())).is_err() {
                warn!(pipe = %cursor.pipe_name(), "Source panicked while closing");
            }
        }
        self.initial_sources_count = 0;
        self.current_source_index = 0;
        info!(
            open_sources,
            items_yielded = self.stats.items_yielded,
            tasks_submitted = self.stats.tasks_submitted,
            "Closed pipe iterator"
        );
    }
}

impl<T> Drop for PipeIterator<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: DataItem> Iterator for PipeIterator<T> {
    type Item = Result<FinishedItem<T>, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}

impl<T: DataItem> FusedIterator for PipeIterator<T> {}
