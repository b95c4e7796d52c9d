//! Error types for dispatch operations.

use crate::callback::Callback;
use crate::coerce::CoercionError;
use crate::event::Event;
use crate::value::Args;
use herald_config::ConfigError;
use std::sync::Arc;
use thiserror::Error;

/// Error type produced by callback actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum EventError {
    /// An event with this name (compared case-insensitively) already exists
    #[error("Event '{0}' already exists")]
    EventAlreadyExists(String),

    /// The event is already held by this manager
    #[error("Event '{0}' is already registered")]
    EventAlreadyRegistered(String),

    /// No event matched the lookup
    #[error("Event '{0}' cannot be found")]
    EventNotFound(String),

    /// A command with this name (compared case-insensitively) already exists
    #[error("Command '{0}' already exists")]
    CommandAlreadyExists(String),

    /// The command is already held by this manager
    #[error("Command '{0}' is already registered")]
    CommandAlreadyRegistered(String),

    /// No command matched the lookup
    #[error("Command '{0}' cannot be found")]
    CommandNotFound(String),

    #[error("Cannot add multiple callbacks on event '{0}'")]
    MultipleCallbacksNotAllowed(String),

    #[error("Callback '{callback}' is already registered on event '{event}'")]
    CallbackAlreadyRegistered { callback: String, event: String },

    #[error("Callback '{callback}' is not registered on event '{event}'")]
    CallbackNotRegistered { callback: String, event: String },

    /// A bound callback was declared without a receiver parameter
    #[error("Callback '{0}' requires a bound instance but its signature has no receiver")]
    MissingReceiver(String),

    #[error("Callback '{0}' requires a bound instance and none was supplied")]
    MissingBoundInstance(String),

    #[error("Callback '{0}' is already bound to an instance")]
    AlreadyBound(String),

    /// Only callbacks built with a receiver can be bound
    #[error("Callback '{0}' does not take a bound instance")]
    NotBindable(String),

    /// The event no longer belongs to a manager
    #[error("Event '{0}' is not attached to an event manager")]
    Detached(String),

    #[error("Argument coercion failed: {0}")]
    Coercion(#[from] CoercionError),

    /// The wrapped action returned an error
    #[error("Callback '{callback}' failed: {source}")]
    CallbackFailed {
        callback: String,
        #[source]
        source: BoxError,
    },

    /// A callback task panicked
    #[error("Callback task failed: {0}")]
    TaskFailed(String),

    /// Several callbacks of one raise failed, in scheduling order
    #[error("{} callbacks failed", .0.len())]
    Multiple(Vec<EventError>),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EventError {
    /// Collapse the failures of one raise.
    pub(crate) fn from_failures(mut failures: Vec<EventError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(EventError::Multiple(failures)),
        }
    }

    /// Every leaf error, flattening [`EventError::Multiple`].
    pub fn failures(&self) -> Vec<&EventError> {
        match self {
            EventError::Multiple(errors) => errors.iter().flat_map(|e| e.failures()).collect(),
            other => vec![other],
        }
    }
}

/// The context an error-handler callback receives.
///
/// The error-handler event is raised with `(error, event, callback, args...)`;
/// this view decodes that shape.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub error: Arc<EventError>,
    /// `None` when the failing callback was invoked outside of an event
    pub event: Option<Event>,
    pub callback: Callback,
    /// The arguments the failing callback was invoked with
    pub args: Args,
}

impl ErrorContext {
    /// Decode handler arguments; `None` if they do not have the routed shape.
    pub fn from_args(args: &Args) -> Option<Self> {
        let positional = args.positional();
        if positional.len() < 3 {
            return None;
        }

        let error = positional[0].downcast_arc::<EventError>()?;
        let event = positional[1].downcast_ref::<Event>().cloned();
        let callback = positional[2].downcast_ref::<Callback>()?.clone();
        let original = Args::from_parts(positional[3..].to_vec(), args.keyword().clone());

        Some(Self {
            error,
            event,
            callback,
            args: original,
        })
    }
}
