//! Commands: events created around one initial callback.

use crate::callback::Callback;
use crate::error::Result;
use crate::event::{DEFAULT_PRIORITY, Event};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Options for [`crate::EventManager::create_command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// Command name; defaults to the callback name
    pub name: Option<String>,
    pub handle_errors: bool,
    pub allow_multiple_callbacks: bool,
    /// Priority of the initial callback
    pub priority: i32,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            name: None,
            handle_errors: true,
            allow_multiple_callbacks: true,
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl CommandOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// An event addressed by command name.
///
/// The underlying event is named `<command:{name}>`. Renaming the command
/// through the manager changes [`Command::command_name`] only. Derefs to
/// [`Event`] for callback management and raising.
#[derive(Clone)]
pub struct Command {
    inner: Arc<CommandInner>,
}

struct CommandInner {
    command_name: RwLock<String>,
    event: Event,
    initial_callback: Callback,
}

impl Command {
    /// Create a detached command; see [`crate::EventManager::add_command`].
    pub fn new(name: impl Into<String>, callback: Callback, options: &CommandOptions) -> Result<Self> {
        let name = name.into();
        let event = Event::new(
            format!("<command:{}>", name),
            options.handle_errors,
            options.allow_multiple_callbacks,
        );
        let initial_callback = event.add_callback(callback, options.priority)?;

        Ok(Self {
            inner: Arc::new(CommandInner {
                command_name: RwLock::new(name),
                event,
                initial_callback,
            }),
        })
    }

    pub fn command_name(&self) -> String {
        self.inner.command_name.read().clone()
    }

    pub(crate) fn set_command_name(&self, name: String) {
        *self.inner.command_name.write() = name;
    }

    /// The callback the command was created with.
    pub fn initial_callback(&self) -> &Callback {
        &self.inner.initial_callback
    }

    pub fn event(&self) -> &Event {
        &self.inner.event
    }
}

impl Deref for Command {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.inner.event
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Command {}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command_name", &*self.inner.command_name.read())
            .field("event", &self.inner.event)
            .finish()
    }
}
