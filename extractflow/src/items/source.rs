//! Sources: the lazy sequences the scheduler pulls raw items from.

use super::item::{Deferred, Item, Output, Pull};
use futures::stream::{BoxStream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;

/// A lazily-produced sequence of items.
///
/// `next_item` is only ever called from the scheduler thread. A source that is
/// in the middle of producing an item cannot be interrupted: `close` asks it to
/// release its resources and is called at most once per cursor, after which
/// the source is dropped.
pub trait Source<T>: Send {
    /// Pulls the next item.
    fn next_item(&mut self) -> anyhow::Result<Pull<T>>;

    /// Releases resources held by the source.
    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A boxed source.
pub type BoxSource<T> = Box<dyn Source<T>>;

/// A source over an iterator of values.
pub struct IterSource<I> {
    iter: Option<I>,
}

impl<I> IterSource<I> {
    /// Creates a new iterator source.
    pub const fn new(iter: I) -> Self {
        Self { iter: Some(iter) }
    }
}

impl<I, T> Source<T> for IterSource<I>
where
    I: Iterator<Item = T> + Send,
{
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        Ok(self
            .iter
            .as_mut()
            .and_then(Iterator::next)
            .map_or(Pull::Exhausted, Pull::value))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.iter = None;
        Ok(())
    }
}

/// A source over an iterator of already tagged items.
pub struct ItemIterSource<I> {
    iter: Option<I>,
}

impl<I> ItemIterSource<I> {
    /// Creates a new item iterator source.
    pub const fn new(iter: I) -> Self {
        Self { iter: Some(iter) }
    }
}

impl<I, T> Source<T> for ItemIterSource<I>
where
    I: Iterator<Item = Item<T>> + Send,
{
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        Ok(self
            .iter
            .as_mut()
            .and_then(Iterator::next)
            .map_or(Pull::Exhausted, Pull::Item))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.iter = None;
        Ok(())
    }
}

/// A source driven by a closure, for generator-like producers.
pub struct FnSource<F> {
    func: F,
    done: bool,
}

impl<F> FnSource<F> {
    /// Creates a new closure source.
    pub const fn new(func: F) -> Self {
        Self { func, done: false }
    }
}

impl<F, T> Source<T> for FnSource<F>
where
    F: FnMut() -> anyhow::Result<Pull<T>> + Send,
{
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        if self.done {
            return Ok(Pull::Exhausted);
        }
        let pulled = (self.func)()?;
        if matches!(pulled, Pull::Exhausted) {
            self.done = true;
        }
        Ok(pulled)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.done = true;
        Ok(())
    }
}

struct StreamState<T> {
    stream: Option<BoxStream<'static, anyhow::Result<Item<T>>>>,
    fetched: Option<anyhow::Result<Item<T>>>,
    in_flight: bool,
    done: bool,
}

/// Adapts an async stream to the pull model.
///
/// Each pull without a fetched element hands out one deferred future that
/// awaits the next element and parks it in the source; the future itself
/// resolves to a skipped item. While it is in flight the source reports
/// `Pending`, so at most one element is fetched at a time and elements come
/// out of the source in stream order.
pub struct StreamSource<T> {
    state: Arc<Mutex<StreamState<T>>>,
}

impl<T> StreamSource<T> {
    /// Wraps a stream.
    pub fn new(stream: BoxStream<'static, anyhow::Result<Item<T>>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                stream: Some(stream),
                fetched: None,
                in_flight: false,
                done: false,
            })),
        }
    }
}

impl<T: Send + 'static> Source<T> for StreamSource<T> {
    fn next_item(&mut self) -> anyhow::Result<Pull<T>> {
        let mut state = self.state.lock();
        if let Some(fetched) = state.fetched.take() {
            return fetched.map(Pull::Item);
        }
        if state.in_flight {
            return Ok(Pull::Pending);
        }
        if state.done {
            return Ok(Pull::Exhausted);
        }
        let Some(mut stream) = state.stream.take() else {
            state.done = true;
            return Ok(Pull::Exhausted);
        };
        state.in_flight = true;

        let shared = Arc::clone(&self.state);
        let fetch = async move {
            let next = stream.next().await;
            let mut state = shared.lock();
            state.in_flight = false;
            match next {
                // Closed while fetching.
                Some(_) if state.done => {}
                Some(fetched) => {
                    state.fetched = Some(fetched);
                    state.stream = Some(stream);
                }
                None => state.done = true,
            }
            Ok::<_, anyhow::Error>(Output::Skip)
        };
        Ok(Pull::Item(Item::Deferred(Deferred::Future(fetch.boxed()))))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.done = true;
        state.stream = None;
        state.fetched = None;
        Ok(())
    }
}
