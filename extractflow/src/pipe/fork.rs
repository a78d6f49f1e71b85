//! Fork steps: forwarding one item to several pipes.

use super::Pipe;
use crate::items::DataItem;
use std::sync::Arc;

/// Where a fork step forwards an item.
pub enum ForkRoute<T> {
    /// Enter `pipe` at `step`.
    Pipe {
        /// The target pipe.
        pipe: Arc<Pipe<T>>,
        /// Index of the first stage the item enters.
        step: usize,
    },
    /// Finish the item as an output of the forking pipe itself.
    Parent,
}

impl<T> Clone for ForkRoute<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Pipe { pipe, step } => Self::Pipe {
                pipe: Arc::clone(pipe),
                step: *step,
            },
            Self::Parent => Self::Parent,
        }
    }
}

impl<T> std::fmt::Debug for ForkRoute<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipe { pipe, step } => f
                .debug_struct("Pipe")
                .field("pipe", &pipe.name())
                .field("step", step)
                .finish(),
            Self::Parent => f.write_str("Parent"),
        }
    }
}

impl<T> ForkRoute<T> {
    fn same_target(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pipe { pipe: a, step: sa }, Self::Pipe { pipe: b, step: sb }) => {
                a.id() == b.id() && sa == sb
            }
            (Self::Parent, Self::Parent) => true,
            _ => false,
        }
    }
}

/// A step that forwards every item reaching it to all of its routes.
pub struct ForkStep<T> {
    routes: Vec<ForkRoute<T>>,
    copy_on_fork: bool,
}

impl<T> Clone for ForkStep<T> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            copy_on_fork: self.copy_on_fork,
        }
    }
}

impl<T> std::fmt::Debug for ForkStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkStep")
            .field("routes", &self.routes)
            .field("copy_on_fork", &self.copy_on_fork)
            .finish()
    }
}

impl<T> ForkStep<T> {
    /// Creates a fork step with no routes.
    #[must_use]
    pub const fn new(copy_on_fork: bool) -> Self {
        Self {
            routes: Vec::new(),
            copy_on_fork,
        }
    }

    /// Adds a route unless an identical one is already present.
    pub fn add_route(&mut self, route: ForkRoute<T>) -> &mut Self {
        if !self.routes.iter().any(|r| r.same_target(&route)) {
            self.routes.push(route);
        }
        self
    }

    /// Returns the routes in order.
    #[must_use]
    pub fn routes(&self) -> &[ForkRoute<T>] {
        &self.routes
    }

    /// Returns true if later routes receive independent copies.
    #[must_use]
    pub const fn copy_on_fork(&self) -> bool {
        self.copy_on_fork
    }

    /// Returns true if the step routes to the pipe with the given id.
    #[must_use]
    pub fn has_pipe(&self, id: uuid::Uuid) -> bool {
        self.routes
            .iter()
            .any(|r| matches!(r, ForkRoute::Pipe { pipe, .. } if pipe.id() == id))
    }
}

impl<T: DataItem> ForkStep<T> {
    /// Splits one item into one value per route.
    ///
    /// The first route receives the original. Every other route receives a
    /// `deep_copy` when `copy_on_fork` is set, a `share` otherwise.
    pub fn split(&self, item: T) -> Vec<(T, &ForkRoute<T>)> {
        let Some((first, rest)) = self.routes.split_first() else {
            return Vec::new();
        };
        let mut copies: Vec<(T, &ForkRoute<T>)> = rest
            .iter()
            .map(|route| {
                let copy = if self.copy_on_fork {
                    item.deep_copy()
                } else {
                    item.share()
                };
                (copy, route)
            })
            .collect();
        copies.insert(0, (item, first));
        copies
    }
}
