//! The event manager: a registry of named events and commands.

use crate::callback::{Callback, CallbackBuilder};
use crate::command::{Command, CommandOptions};
use crate::error::{BoxError, EventError, Result};
use crate::event::Event;
use crate::settings::DispatchSettings;
use crate::value::Args;
use herald_config::ConfigManager;
use herald_log::{debug, info};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

/// Registry of uniquely named events and commands.
///
/// Every manager owns an error-handler event. Events created with
/// `handle_errors` route their callback failures there instead of
/// failing the raise.
///
/// ```rust
/// use herald_events::{args, EventManager};
///
/// # tokio_test::block_on(async {
/// let manager = EventManager::new();
/// let event = manager.create_event("ready", true, true).unwrap();
/// event
///     .create_callback(manager.callback("greet", |_args| async { Ok(()) }), 1)
///     .unwrap();
///
/// manager.raise_event("READY", args![], false).await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    events: RwLock<Vec<Event>>,
    commands: RwLock<Vec<Command>>,
    error_handler: Event,
    settings: DispatchSettings,
}

fn names_match(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

impl EventManager {
    pub fn new() -> Self {
        Self::with_settings(DispatchSettings::default())
    }

    pub fn with_settings(settings: DispatchSettings) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let error_handler = Event::new(settings.error_handler_name.clone(), false, true);
            error_handler.set_manager(weak.clone());

            ManagerInner {
                events: RwLock::new(vec![error_handler.clone()]),
                commands: RwLock::new(Vec::new()),
                error_handler,
                settings,
            }
        });

        debug!(
            "Created event manager with error handler '{}'",
            inner.error_handler.name()
        );
        Self { inner }
    }

    /// Build a manager from the dispatch settings held in `config`.
    pub fn from_config(config: &ConfigManager) -> Result<Self> {
        Ok(Self::with_settings(DispatchSettings::load(config)?))
    }

    pub(crate) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.inner.settings
    }

    /// The event every handled callback error is raised on, with
    /// `(error, event, callback, args...)`. See [`crate::ErrorContext`].
    pub fn error_handler(&self) -> Event {
        self.inner.error_handler.clone()
    }

    /// A callback builder seeded with the configured callback defaults.
    pub fn callback<F, Fut>(&self, name: impl Into<String>, f: F) -> CallbackBuilder
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        Callback::builder(name, f).options(self.inner.settings.callback.clone())
    }

    /// Registered events in registration order, the error handler included.
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.read().clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.commands.read().clone()
    }

    /// Create and register an event.
    ///
    /// Names are unique within the manager, compared case-insensitively.
    pub fn create_event(
        &self,
        name: impl Into<String>,
        handle_errors: bool,
        allow_multiple_callbacks: bool,
    ) -> Result<Event> {
        let name = name.into();
        let mut events = self.inner.events.write();

        if events.iter().any(|e| names_match(e.name(), &name, false)) {
            return Err(EventError::EventAlreadyExists(name));
        }

        let event = Event::new(name, handle_errors, allow_multiple_callbacks);
        event.set_manager(self.downgrade());
        events.push(event.clone());

        debug!("Created event '{}'", event.name());
        Ok(event)
    }

    /// First event whose name matches.
    pub fn get_event(&self, name: &str, case_sensitive: bool) -> Option<Event> {
        self.inner
            .events
            .read()
            .iter()
            .find(|e| names_match(e.name(), name, case_sensitive))
            .cloned()
    }

    /// Look up an event by name and raise it.
    pub async fn raise_event(&self, name: &str, args: Args, case_sensitive: bool) -> Result<()> {
        let event = self
            .get_event(name, case_sensitive)
            .ok_or_else(|| EventError::EventNotFound(name.to_string()))?;
        event.raise(args).await
    }

    /// Register an event created elsewhere, taking it from its previous manager.
    pub fn add_event(&self, event: &Event) -> Result<()> {
        {
            let mut events = self.inner.events.write();
            if events.contains(event) {
                return Err(EventError::EventAlreadyRegistered(event.name().to_string()));
            }
            if events.iter().any(|e| names_match(e.name(), event.name(), false)) {
                return Err(EventError::EventAlreadyExists(event.name().to_string()));
            }
            events.push(event.clone());
        }

        // Only one registry lock is held at a time.
        if let Some(previous) = event.manager().filter(|m| m != self) {
            previous.detach_event(event);
        }
        event.set_manager(self.downgrade());
        debug!("Added event '{}'", event.name());
        Ok(())
    }

    /// Unregister an event. It keeps its callbacks but no longer routes errors.
    pub fn remove_event(&self, event: &Event) -> Result<()> {
        if !self.detach_event(event) {
            return Err(EventError::EventNotFound(event.name().to_string()));
        }
        event.set_manager(Weak::new());
        debug!("Removed event '{}'", event.name());
        Ok(())
    }

    pub fn remove_event_by_name(&self, name: &str) -> Result<Event> {
        let event = self
            .get_event(name, true)
            .ok_or_else(|| EventError::EventNotFound(name.to_string()))?;
        self.remove_event(&event)?;
        Ok(event)
    }

    fn detach_event(&self, event: &Event) -> bool {
        let mut events = self.inner.events.write();
        let before = events.len();
        events.retain(|e| e != event);
        events.len() != before
    }

    /// Create and register a command around `callback`.
    ///
    /// The command name defaults to the callback name and must be unique
    /// among this manager's commands, compared case-insensitively.
    pub fn create_command(
        &self,
        callback: CallbackBuilder,
        options: CommandOptions,
    ) -> Result<Command> {
        let callback = callback.build()?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| callback.name().to_string());

        let mut commands = self.inner.commands.write();
        if commands
            .iter()
            .any(|c| names_match(&c.command_name(), &name, false))
        {
            return Err(EventError::CommandAlreadyExists(name));
        }

        let command = Command::new(name, callback, &options)?;
        command.set_manager(self.downgrade());
        commands.push(command.clone());

        debug!("Created command '{}'", command.command_name());
        Ok(command)
    }

    /// First command whose command name matches.
    pub fn get_command(&self, name: &str, case_sensitive: bool) -> Option<Command> {
        self.inner
            .commands
            .read()
            .iter()
            .find(|c| names_match(&c.command_name(), name, case_sensitive))
            .cloned()
    }

    /// Look up a command by name and raise it.
    pub async fn invoke_command(&self, name: &str, args: Args, case_sensitive: bool) -> Result<()> {
        let command = self
            .get_command(name, case_sensitive)
            .ok_or_else(|| EventError::CommandNotFound(name.to_string()))?;
        command.raise(args).await
    }

    /// Rename a command. Its event name is unchanged.
    pub fn replace_command_name(&self, name: &str, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        let commands = self.inner.commands.read();

        let command = commands
            .iter()
            .find(|c| c.command_name() == name)
            .ok_or_else(|| EventError::CommandNotFound(name.to_string()))?;

        if commands
            .iter()
            .any(|c| c != command && names_match(&c.command_name(), &new_name, false))
        {
            return Err(EventError::CommandAlreadyExists(new_name));
        }

        info!("Renamed command '{}' to '{}'", name, new_name);
        command.set_command_name(new_name);
        Ok(())
    }

    /// Register a command created elsewhere, taking it from its previous manager.
    pub fn add_command(&self, command: &Command) -> Result<()> {
        {
            let mut commands = self.inner.commands.write();
            if commands.contains(command) {
                return Err(EventError::CommandAlreadyRegistered(command.command_name()));
            }
            if commands
                .iter()
                .any(|c| names_match(&c.command_name(), &command.command_name(), false))
            {
                return Err(EventError::CommandAlreadyExists(command.command_name()));
            }
            commands.push(command.clone());
        }

        if let Some(previous) = command.manager().filter(|m| m != self) {
            previous.detach_command(command);
        }
        command.set_manager(self.downgrade());
        debug!("Added command '{}'", command.command_name());
        Ok(())
    }

    pub fn remove_command(&self, command: &Command) -> Result<()> {
        if !self.detach_command(command) {
            return Err(EventError::CommandNotFound(command.command_name()));
        }
        command.set_manager(Weak::new());
        debug!("Removed command '{}'", command.command_name());
        Ok(())
    }

    pub fn remove_command_by_name(&self, name: &str) -> Result<Command> {
        let command = self
            .get_command(name, true)
            .ok_or_else(|| EventError::CommandNotFound(name.to_string()))?;
        self.remove_command(&command)?;
        Ok(command)
    }

    fn detach_command(&self, command: &Command) -> bool {
        let mut commands = self.inner.commands.write();
        let before = commands.len();
        commands.retain(|c| c != command);
        commands.len() != before
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EventManager {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("events", &self.inner.events.read().len())
            .field("commands", &self.inner.commands.read().len())
            .field("error_handler", &self.inner.error_handler.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::error::ErrorContext;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_error_handler_is_registered() {
        let manager = EventManager::new();
        let handler = manager.error_handler();

        assert_eq!(handler.name(), "<error_handler>");
        assert!(!handler.handle_errors());
        assert_eq!(manager.get_event("<error_handler>", true), Some(handler));
    }

    #[test]
    fn test_duplicate_event_name_case_insensitive() {
        let manager = EventManager::new();
        manager.create_event("x", true, true).unwrap();

        assert!(matches!(
            manager.create_event("x", true, true),
            Err(EventError::EventAlreadyExists(_))
        ));
        assert!(matches!(
            manager.create_event("X", true, true),
            Err(EventError::EventAlreadyExists(_))
        ));
    }

    #[test]
    fn test_lookup_case_sensitivity() {
        let manager = EventManager::new();
        let event = manager.create_event("x", true, true).unwrap();

        assert_eq!(manager.get_event("X", false), Some(event));
        assert!(manager.get_event("X", true).is_none());
    }

    #[tokio::test]
    async fn test_raise_unknown_event() {
        let manager = EventManager::new();
        let err = manager.raise_event("missing", args![], true).await.unwrap_err();
        assert!(matches!(err, EventError::EventNotFound(ref name) if name == "missing"));
    }

    #[test]
    fn test_siblings_are_registered_and_cached() {
        let manager = EventManager::new();
        let event = manager.create_event("save", false, true).unwrap();

        let before = event.before().unwrap();
        assert_eq!(before.name(), "<before:save>");
        assert!(!before.handle_errors());
        assert_eq!(event.before().unwrap(), before);

        let after = event.after(true).unwrap();
        assert_eq!(after.name(), "<after:save>");
        assert!(event.pass_extra_on_after());
        assert_eq!(event.after(false).unwrap(), after);
        assert!(!event.pass_extra_on_after());

        assert_eq!(manager.get_event("<after:save>", true), Some(after));
    }

    #[tokio::test]
    async fn test_handled_error_is_routed() {
        let manager = EventManager::new();
        let event = manager.create_event("job", true, true).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager
            .error_handler()
            .create_callback(
                Callback::builder("collect", move |args: Args| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(ErrorContext::from_args(&args));
                        Ok(())
                    }
                }),
                1,
            )
            .unwrap();

        let failing = event
            .create_callback(
                Callback::builder("fails", |_args| async { Err("nope".into()) }),
                1,
            )
            .unwrap();

        event.raise(args!["payload"].kwarg("k", 1)).await.unwrap();

        let context = rx.recv().await.unwrap().unwrap();
        assert_eq!(context.callback, failing);
        assert_eq!(context.event, Some(event));
        assert_eq!(context.args.positional(), args!["payload"].positional());
        assert_eq!(context.args.kw("k"), Some(&crate::Value::Int(1)));
        assert!(matches!(*context.error, EventError::CallbackFailed { .. }));
    }

    #[tokio::test]
    async fn test_refused_error_propagates() {
        let manager = EventManager::new();
        let event = manager.create_event("strict", true, true).unwrap();
        event
            .create_callback(
                Callback::builder("fails", |_args| async { Err("nope".into()) })
                    .refuse_error_handling(),
                1,
            )
            .unwrap();

        assert!(event.raise(args![]).await.is_err());
    }

    #[tokio::test]
    async fn test_continue_on_error_loops_past_handled_failures() {
        for continue_on_error in [false, true] {
            let manager = EventManager::new();
            let event = manager.create_event("looping", true, true).unwrap();
            let calls = Arc::new(Mutex::new(0u32));
            let slot: Arc<std::sync::OnceLock<Callback>> = Arc::new(std::sync::OnceLock::new());
            let (counter, handle) = (calls.clone(), slot.clone());

            let mut builder = Callback::builder("sentinel", move |_args| {
                let (counter, handle) = (counter.clone(), handle.clone());
                async move {
                    let call = {
                        let mut calls = counter.lock();
                        *calls += 1;
                        *calls
                    };
                    match call {
                        3 => Err("sentinel".into()),
                        4 => {
                            if let Some(callback) = handle.get() {
                                callback.disable();
                            }
                            Ok(())
                        }
                        _ => Ok(()),
                    }
                }
            })
            .repeat(0, Duration::ZERO);
            if continue_on_error {
                builder = builder.continue_on_error();
            }

            let callback = event.create_callback(builder, 1).unwrap();
            slot.set(callback).unwrap();

            event.raise(args![]).await.unwrap();
            let expected = if continue_on_error { 4 } else { 3 };
            assert_eq!(*calls.lock(), expected);
        }
    }

    #[tokio::test]
    async fn test_commands() {
        let manager = EventManager::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let store = calls.clone();

        let command = manager
            .create_command(
                manager.callback("ping", move |args: Args| {
                    let store = store.clone();
                    async move {
                        store.lock().push(args.get(0).cloned());
                        Ok(())
                    }
                }),
                CommandOptions::default(),
            )
            .unwrap();

        assert_eq!(command.command_name(), "ping");
        assert_eq!(command.name(), "<command:ping>");
        assert!(manager.get_event("<command:ping>", true).is_none());

        manager.invoke_command("PING", args![7], false).await.unwrap();
        assert_eq!(*calls.lock(), vec![Some(crate::Value::Int(7))]);

        let duplicate = manager.create_command(
            manager.callback("Ping", |_args| async { Ok(()) }),
            CommandOptions::default(),
        );
        assert!(matches!(duplicate, Err(EventError::CommandAlreadyExists(_))));

        assert!(matches!(
            manager.invoke_command("pong", args![], true).await,
            Err(EventError::CommandNotFound(_))
        ));
    }

    #[test]
    fn test_replace_command_name() {
        let manager = EventManager::new();
        let ping = manager
            .create_command(
                manager.callback("ping", |_args| async { Ok(()) }),
                CommandOptions::default(),
            )
            .unwrap();
        manager
            .create_command(
                manager.callback("pong", |_args| async { Ok(()) }),
                CommandOptions::default(),
            )
            .unwrap();

        assert!(matches!(
            manager.replace_command_name("ping", "PONG"),
            Err(EventError::CommandAlreadyExists(_))
        ));
        assert!(matches!(
            manager.replace_command_name("nope", "x"),
            Err(EventError::CommandNotFound(_))
        ));

        manager.replace_command_name("ping", "echo").unwrap();
        assert_eq!(manager.get_command("echo", true), Some(ping.clone()));
        assert_eq!(ping.name(), "<command:ping>");
    }

    #[test]
    fn test_transfer_event_between_managers() {
        let first = EventManager::new();
        let second = EventManager::new();
        let event = first.create_event("moving", true, true).unwrap();

        second.add_event(&event).unwrap();
        assert!(first.get_event("moving", true).is_none());
        assert_eq!(event.manager(), Some(second.clone()));
        assert!(matches!(
            second.add_event(&event),
            Err(EventError::EventAlreadyRegistered(_))
        ));

        second.remove_event(&event).unwrap();
        assert!(!event.is_attached());
        assert!(matches!(
            second.remove_event_by_name("moving"),
            Err(EventError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_add_event_rejects_name_collision() {
        let manager = EventManager::new();
        manager.create_event("taken", true, true).unwrap();

        let outsider = Event::new("TAKEN", true, true);
        assert!(matches!(
            manager.add_event(&outsider),
            Err(EventError::EventAlreadyExists(_))
        ));
    }

    #[test]
    fn test_concurrent_adds_register_one_event_per_name() {
        let manager = EventManager::new();
        let barrier = std::sync::Barrier::new(8);

        let added = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let manager = &manager;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let event = Event::new(if i % 2 == 0 { "race" } else { "RACE" }, true, true);
                        barrier.wait();
                        manager.add_event(&event).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(added, 1);
        let names: Vec<String> = manager
            .events()
            .iter()
            .map(|e| e.name().to_lowercase())
            .filter(|n| n == "race")
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_transfer_command_between_managers() {
        let first = EventManager::new();
        let second = EventManager::new();
        let command = first
            .create_command(
                first.callback("move", |_args| async { Ok(()) }),
                CommandOptions::default(),
            )
            .unwrap();

        second.add_command(&command).unwrap();
        assert!(first.get_command("move", true).is_none());
        assert_eq!(command.manager(), Some(second.clone()));

        let removed = second.remove_command_by_name("move").unwrap();
        assert_eq!(removed, command);
        assert!(second.commands().is_empty());
    }

    #[test]
    fn test_callback_defaults_from_settings() {
        let mut settings = DispatchSettings::default();
        settings.callback.loop_count = 5;
        settings.default_priority = 9;
        let manager = EventManager::with_settings(settings);

        let event = manager.create_event("seeded", true, true).unwrap();
        let callback = manager
            .callback("cb", |_args| async { Ok(()) })
            .build()
            .unwrap();
        event.attach(callback.clone()).unwrap();

        assert_eq!(callback.options().loop_count, 5);
        assert_eq!(event.priorities(), vec![9]);
    }
}
