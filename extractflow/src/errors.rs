//! Error types for the extraction scheduler.
//!
//! Configuration errors are raised while pipes are built or evaluated,
//! processing errors while items flow through stages. Every error that
//! originates in user code is tagged with the pipe (and step) it came from.

use std::collections::HashMap;
use thiserror::Error;

/// Where a wrapped user error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// A transform stage.
    Transform,
    /// A source (the pipe head or a nested sequence).
    Generator,
    /// A deferred task executed by the worker pool.
    Future,
    /// A head factory invoked while evaluating a pipe.
    Factory,
}

impl ExtractionKind {
    /// Returns the kind as a lowercase string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transform => "transform",
            Self::Generator => "generator",
            Self::Future => "future",
            Self::Factory => "factory",
        }
    }
}

impl std::fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parent_hint(has_parent: &bool) -> &'static str {
    if *has_parent {
        " (its parent chain has no data)"
    } else {
        ""
    }
}

/// The main error type for extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A pipe could not be created or modified.
    #[error("Pipe '{pipe}': {message}")]
    CreatePipe {
        /// The pipe name.
        pipe: String,
        /// What went wrong.
        message: String,
    },

    /// A pipe has neither a head nor a bound parent.
    #[error("Pipe '{pipe}' is not bound to data{}", parent_hint(.has_parent))]
    PipeNotBoundToData {
        /// The pipe name.
        pipe: String,
        /// Whether the pipe is a dependent pipe.
        has_parent: bool,
    },

    /// The pipe head is a parametrized factory that was never bound.
    #[error("Pipe '{pipe}' has a parametrized head '{head}' that must be bound before extraction")]
    ParametrizedResourceUnbound {
        /// The pipe name.
        pipe: String,
        /// Name of the unbound head.
        head: String,
    },

    /// The pipe head cannot produce a source.
    #[error("Pipe '{pipe}' head cannot be iterated: {message}")]
    PipeGenInvalid {
        /// The pipe name.
        pipe: String,
        /// What is wrong with the head.
        message: String,
    },

    /// Invalid extraction configuration.
    #[error("Invalid extract configuration: {0}")]
    InvalidConfig(String),

    /// User code failed while processing an item.
    #[error("Pipe '{pipe}' failed in {kind} '{step_name}': {source}")]
    ResourceExtraction {
        /// The pipe name.
        pipe: String,
        /// The stage (or source) name.
        step_name: String,
        /// Where the error was raised.
        kind: ExtractionKind,
        /// The original error.
        #[source]
        source: anyhow::Error,
    },

    /// An item broke a scheduler invariant; signals a bug in stage composition.
    #[error("Pipe '{pipe}' item processing error: {message}")]
    PipeItemProcessing {
        /// The pipe name.
        pipe: String,
        /// Description of the violation.
        message: String,
    },

    /// The iterator or pool was already closed.
    #[error("Extraction already closed")]
    Closed,

    /// The worker runtime could not be started.
    #[error("Worker runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ExtractError {
    /// Creates a pipe creation error.
    #[must_use]
    pub fn create_pipe(pipe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CreatePipe {
            pipe: pipe.into(),
            message: message.into(),
        }
    }

    /// Creates an item processing (invariant violation) error.
    #[must_use]
    pub fn item_processing(pipe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PipeItemProcessing {
            pipe: pipe.into(),
            message: message.into(),
        }
    }

    /// Wraps a user error with pipe context.
    ///
    /// Errors that already are an `ExtractError` carry their own context and
    /// are returned unchanged.
    #[must_use]
    pub fn wrap(
        error: anyhow::Error,
        pipe: &str,
        step_name: &str,
        kind: ExtractionKind,
    ) -> Self {
        match error.downcast::<Self>() {
            Ok(extract_error) => extract_error,
            Err(source) => Self::ResourceExtraction {
                pipe: pipe.to_string(),
                step_name: step_name.to_string(),
                kind,
                source,
            },
        }
    }

    /// Returns true for errors raised while building or evaluating pipes.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CreatePipe { .. }
                | Self::PipeNotBoundToData { .. }
                | Self::ParametrizedResourceUnbound { .. }
                | Self::PipeGenInvalid { .. }
                | Self::InvalidConfig(_)
        )
    }

    /// Returns the name of the pipe the error is attributed to, if any.
    #[must_use]
    pub fn pipe_name(&self) -> Option<&str> {
        match self {
            Self::CreatePipe { pipe, .. }
            | Self::PipeNotBoundToData { pipe, .. }
            | Self::ParametrizedResourceUnbound { pipe, .. }
            | Self::PipeGenInvalid { pipe, .. }
            | Self::ResourceExtraction { pipe, .. }
            | Self::PipeItemProcessing { pipe, .. } => Some(pipe),
            Self::InvalidConfig(_) | Self::Closed | Self::Runtime(_) => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let error_type = match self {
            Self::CreatePipe { .. } => "CreatePipe",
            Self::PipeNotBoundToData { .. } => "PipeNotBoundToData",
            Self::ParametrizedResourceUnbound { .. } => "ParametrizedResourceUnbound",
            Self::PipeGenInvalid { .. } => "PipeGenInvalid",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::ResourceExtraction { .. } => "ResourceExtraction",
            Self::PipeItemProcessing { .. } => "PipeItemProcessing",
            Self::Closed => "Closed",
            Self::Runtime(_) => "Runtime",
        };
        map.insert("type".to_string(), serde_json::json!(error_type));

        if let Some(pipe) = self.pipe_name() {
            map.insert("pipe".to_string(), serde_json::json!(pipe));
        }
        if let Self::ResourceExtraction {
            step_name, kind, ..
        } = self
        {
            map.insert("step".to_string(), serde_json::json!(step_name));
            map.insert("kind".to_string(), serde_json::json!(kind.as_str()));
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}
