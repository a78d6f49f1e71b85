//! The pipe: an optional head, ordered steps and an optional parent.

use super::fork::{ForkRoute, ForkStep};
use super::stage::Stage;
use crate::errors::{ExtractError, ExtractionKind};
use crate::items::{BoxSource, DataItem, IterSource, Meta, Source};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

/// Creates a fresh source every time a pipe is evaluated.
pub type SourceFactory<T> = Arc<dyn Fn() -> anyhow::Result<BoxSource<T>> + Send + Sync>;

/// Creates a source from bound arguments.
pub type ParametrizedFactory<T> = Arc<dyn Fn(&Meta) -> anyhow::Result<BoxSource<T>> + Send + Sync>;

/// Where a pipe gets its raw items from.
pub(crate) enum Head<T> {
    Empty,
    Factory(SourceFactory<T>),
    Parametrized {
        name: String,
        factory: ParametrizedFactory<T>,
    },
    Once(Arc<Mutex<Option<BoxSource<T>>>>),
}

impl<T> Clone for Head<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Factory(f) => Self::Factory(Arc::clone(f)),
            Self::Parametrized { name, factory } => Self::Parametrized {
                name: name.clone(),
                factory: Arc::clone(factory),
            },
            Self::Once(slot) => Self::Once(Arc::clone(slot)),
        }
    }
}

impl<T> Head<T> {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Factory(_) => "factory",
            Self::Parametrized { .. } => "parametrized",
            Self::Once(_) => "once",
        }
    }
}

/// A step of a pipe.
pub enum Step<T> {
    /// A transform stage.
    Transform(Stage<T>),
    /// Forwards items to other pipes.
    Fork(ForkStep<T>),
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Transform(stage) => Self::Transform(stage.clone()),
            Self::Fork(fork) => Self::Fork(fork.clone()),
        }
    }
}

impl<T> Debug for Step<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transform(stage) => stage.fmt(f),
            Self::Fork(fork) => fork.fmt(f),
        }
    }
}

impl<T> Step<T> {
    /// Returns the step name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Transform(stage) => stage.name(),
            Self::Fork(_) => "fork",
        }
    }

    /// Returns true for a fork step.
    #[must_use]
    pub const fn is_fork(&self) -> bool {
        matches!(self, Self::Fork(_))
    }
}

/// An ordered chain of stages fed by a head or by a parent pipe.
///
/// A pipe with a parent is a dependent (transformer) pipe: its step 0
/// consumes the parent's items. Such a pipe cannot be evaluated directly;
/// the scheduler either materializes it with [`Pipe::full_pipe`] or feeds it
/// through a fork step of the parent.
pub struct Pipe<T> {
    id: Uuid,
    name: String,
    pub(crate) head: Head<T>,
    steps: Vec<Step<T>>,
    parent: Option<Arc<Pipe<T>>>,
}

impl<T> Debug for Pipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("head", &self.head.kind())
            .field("steps", &self.steps)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl<T> Pipe<T> {
    fn with_head(name: impl Into<String>, head: Head<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            head,
            steps: Vec::new(),
            parent: None,
        }
    }

    /// Creates an empty pipe with no data.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_head(name, Head::Empty)
    }

    /// Creates a pipe whose head calls `factory` on every evaluation.
    pub fn from_factory<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<BoxSource<T>> + Send + Sync + 'static,
    {
        Self::with_head(name, Head::Factory(Arc::new(factory)))
    }

    /// Creates a pipe over a one-shot source.
    ///
    /// The source is shared by clones of the pipe and can be evaluated once.
    pub fn from_source(name: impl Into<String>, source: impl Source<T> + 'static) -> Self {
        let source: BoxSource<T> = Box::new(source);
        Self::with_head(name, Head::Once(Arc::new(Mutex::new(Some(source)))))
    }

    /// Creates a pipe whose head must be bound to arguments before use.
    pub fn parametrized<F>(name: impl Into<String>, head_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Meta) -> anyhow::Result<BoxSource<T>> + Send + Sync + 'static,
    {
        Self::with_head(
            name,
            Head::Parametrized {
                name: head_name.into(),
                factory: Arc::new(factory),
            },
        )
    }

    /// Creates a dependent pipe whose first stage consumes `parent`'s items.
    #[must_use]
    pub fn transformer(name: impl Into<String>, parent: Arc<Self>, stage: Stage<T>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            head: Head::Empty,
            steps: vec![Step::Transform(stage)],
            parent: Some(parent),
        }
    }

    /// Binds a parametrized head to its arguments.
    pub fn bind(&mut self, args: Meta) -> Result<&mut Self, ExtractError>
    where
        T: 'static,
    {
        let Head::Parametrized { factory, .. } = &self.head else {
            return Err(ExtractError::create_pipe(
                &self.name,
                format!("head of kind '{}' is not parametrized", self.head.kind()),
            ));
        };
        let factory = Arc::clone(factory);
        self.head = Head::Factory(Arc::new(move || factory(&args)));
        Ok(self)
    }

    /// Replaces the head with a new factory.
    pub fn replace_head<F>(&mut self, factory: F) -> Result<&mut Self, ExtractError>
    where
        F: Fn() -> anyhow::Result<BoxSource<T>> + Send + Sync + 'static,
    {
        if self.parent.is_some() {
            return Err(ExtractError::create_pipe(
                &self.name,
                "a dependent pipe takes its data from its parent and has no head",
            ));
        }
        self.head = Head::Factory(Arc::new(factory));
        Ok(self)
    }

    /// Appends a stage, keeping a trailing fork step last.
    #[must_use]
    pub fn with_stage(mut self, stage: Stage<T>) -> Self {
        self.append_stage(stage);
        self
    }

    /// Appends a stage, keeping a trailing fork step last.
    pub fn append_stage(&mut self, stage: Stage<T>) -> &mut Self {
        let index = if self.steps.last().is_some_and(Step::is_fork) {
            self.steps.len() - 1
        } else {
            self.steps.len()
        };
        self.steps.insert(index, Step::Transform(stage));
        self
    }

    /// Inserts a stage at `index`.
    pub fn insert_stage(&mut self, index: usize, stage: Stage<T>) -> Result<&mut Self, ExtractError> {
        if index > self.steps.len() {
            return Err(ExtractError::create_pipe(
                &self.name,
                format!("cannot insert at {index}, pipe has {} steps", self.steps.len()),
            ));
        }
        if index == self.steps.len() && self.steps.last().is_some_and(Step::is_fork) {
            return Err(ExtractError::create_pipe(
                &self.name,
                "cannot insert a stage after a fork step",
            ));
        }
        self.steps.insert(index, Step::Transform(stage));
        Ok(self)
    }

    /// Removes and returns the step at `index`.
    pub fn remove_stage(&mut self, index: usize) -> Result<Step<T>, ExtractError> {
        if index >= self.steps.len() {
            return Err(ExtractError::create_pipe(
                &self.name,
                format!("cannot remove step {index}, pipe has {} steps", self.steps.len()),
            ));
        }
        if index == 0 && self.parent.is_some() {
            return Err(ExtractError::create_pipe(
                &self.name,
                "step 0 of a dependent pipe consumes the parent's data and cannot be removed",
            ));
        }
        Ok(self.steps.remove(index))
    }

    /// Forwards every item reaching the end of this pipe to `child` at `child_step`.
    pub fn fork(
        &mut self,
        child: Arc<Self>,
        child_step: usize,
        copy_on_fork: bool,
    ) -> Result<&mut Self, ExtractError> {
        self.ensure_forkable()?;
        if child_step > child.len() {
            return Err(ExtractError::create_pipe(
                &self.name,
                format!(
                    "cannot fork to step {child_step} of pipe '{}' with {} steps",
                    child.name,
                    child.len()
                ),
            ));
        }
        self.add_fork_route(
            ForkRoute::Pipe {
                pipe: child,
                step: child_step,
            },
            copy_on_fork,
        );
        Ok(self)
    }

    /// Finishes every item reaching the end of this pipe as an output of this pipe,
    /// in addition to the other fork routes.
    pub fn fork_to_self(&mut self, copy_on_fork: bool) -> Result<&mut Self, ExtractError> {
        self.ensure_forkable()?;
        self.add_fork_route(ForkRoute::Parent, copy_on_fork);
        Ok(self)
    }

    fn ensure_forkable(&self) -> Result<(), ExtractError> {
        if self.is_empty() {
            return Err(ExtractError::create_pipe(&self.name, "cannot fork an empty pipe"));
        }
        Ok(())
    }

    pub(crate) fn add_fork_route(&mut self, route: ForkRoute<T>, copy_on_fork: bool) {
        let mut fork = match self.steps.pop() {
            Some(Step::Fork(fork)) => fork,
            Some(step) => {
                self.steps.push(step);
                ForkStep::new(copy_on_fork)
            }
            None => ForkStep::new(copy_on_fork),
        };
        fork.add_route(route);
        self.steps.push(Step::Fork(fork));
    }

    /// Returns a standalone pipe from the root ancestor down to this pipe.
    ///
    /// The head is the root's head; the steps are every ancestor's transform
    /// stages followed by this pipe's steps. Ancestor fork steps are left
    /// out so every item flows down to this pipe.
    pub fn full_pipe(&self) -> Result<Self, ExtractError> {
        let Some(parent) = &self.parent else {
            return Ok(self.duplicate());
        };
        if self.steps.is_empty() {
            return Err(ExtractError::create_pipe(
                &self.name,
                "dependent pipe has no stage to consume its parent's data",
            ));
        }
        let ancestors = parent.full_pipe()?;
        if !ancestors.is_data_bound() {
            return Err(ExtractError::PipeNotBoundToData {
                pipe: self.name.clone(),
                has_parent: true,
            });
        }
        let steps = ancestors
            .steps
            .into_iter()
            .filter(|step| !step.is_fork())
            .chain(self.steps.iter().cloned())
            .collect();
        Ok(Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            head: ancestors.head,
            steps,
            parent: None,
        })
    }

    /// Returns true if a head is present here or up the parent chain.
    #[must_use]
    pub fn is_data_bound(&self) -> bool {
        self.parent
            .as_ref()
            .map_or_else(|| !matches!(self.head, Head::Empty), |p| p.is_data_bound())
    }

    /// Turns the head into a live source.
    pub fn evaluate_head(&self) -> Result<BoxSource<T>, ExtractError> {
        match &self.head {
            Head::Empty => Err(ExtractError::PipeNotBoundToData {
                pipe: self.name.clone(),
                has_parent: self.parent.is_some(),
            }),
            Head::Factory(factory) => {
                factory().map_err(|e| ExtractError::wrap(e, &self.name, "head", ExtractionKind::Factory))
            }
            Head::Parametrized { name, .. } => Err(ExtractError::ParametrizedResourceUnbound {
                pipe: self.name.clone(),
                head: name.clone(),
            }),
            Head::Once(slot) => slot.lock().take().ok_or_else(|| ExtractError::PipeGenInvalid {
                pipe: self.name.clone(),
                message: "one-shot source was already consumed".to_string(),
            }),
        }
    }

    /// Returns the pipe id; fresh for every construction and clone.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the pipe name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parent pipe.
    #[must_use]
    pub const fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Returns true for a dependent pipe.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns true if the pipe has a head (bound or not).
    #[must_use]
    pub const fn has_head(&self) -> bool {
        !matches!(self.head, Head::Empty)
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipe has neither a head nor steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && !self.has_head()
    }

    /// Returns the steps in order.
    #[must_use]
    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }

    /// Returns the step at `index`.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<&Step<T>> {
        self.steps.get(index)
    }

    /// Returns the name of whatever produced an item that is about to enter `step`.
    #[must_use]
    pub fn producer_name(&self, step: usize) -> &str {
        step.checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .map_or("head", Step::name)
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            head: self.head.clone(),
            steps: self.steps.clone(),
            parent: self.parent.clone(),
        }
    }

    pub(crate) fn from_parts(
        name: String,
        head: Head<T>,
        steps: Vec<Step<T>>,
        parent: Option<Arc<Self>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            head,
            steps,
            parent,
        }
    }

    /// Clones this pipe and its whole ancestor chain.
    #[must_use]
    pub fn clone_chain(self: &Arc<Self>) -> Arc<Self> {
        clone_memo(self, &mut HashMap::new())
    }
}

impl<T: DataItem> Pipe<T> {
    /// Creates a pipe over a re-iterable collection.
    pub fn from_iter<I>(name: impl Into<String>, data: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_factory(name, move || {
            Ok(Box::new(IterSource::new(data.clone().into_iter())) as BoxSource<T>)
        })
    }
}

fn clone_memo<T>(pipe: &Arc<Pipe<T>>, memo: &mut HashMap<Uuid, Arc<Pipe<T>>>) -> Arc<Pipe<T>> {
    if let Some(cloned) = memo.get(&pipe.id) {
        return Arc::clone(cloned);
    }
    let parent = pipe.parent.as_ref().map(|p| clone_memo(p, memo));
    let mut copy = pipe.duplicate();
    copy.parent = parent;
    let copy = Arc::new(copy);
    memo.insert(pipe.id, Arc::clone(&copy));
    copy
}

/// Clones a set of pipes together with their ancestors.
///
/// Clones whose originals shared an ancestor share the cloned ancestor.
/// Returns the clones in input order and a map from original id to clone,
/// covering every cloned ancestor.
pub fn clone_pipes<T>(pipes: &[Arc<Pipe<T>>]) -> (Vec<Arc<Pipe<T>>>, HashMap<Uuid, Arc<Pipe<T>>>) {
    let mut memo = HashMap::new();
    let cloned = pipes.iter().map(|p| clone_memo(p, &mut memo)).collect();
    (cloned, memo)
}
