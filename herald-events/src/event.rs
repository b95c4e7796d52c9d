//! Events: priority-ordered callback collections.
//!
//! Raising an event runs its `before` sibling to completion, starts every
//! callback as a concurrent task in descending priority order, waits for all
//! of them, then raises its `after` sibling.
//!
//! Callback tasks are driven by the raise itself, so their start order does
//! not depend on the runtime flavor, and dropping a raise cancels them.

use crate::callback::{Callback, CallbackBuilder};
use crate::error::{EventError, Result};
use crate::manager::{EventManager, ManagerInner};
use crate::value::{Args, Value};
use futures::FutureExt;
use futures::future::{AbortHandle, Abortable, BoxFuture, join_all};
use herald_log::{debug, error};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Priority used when neither the caller nor a manager picks one.
pub const DEFAULT_PRIORITY: i32 = 1;

/// A named, priority-ordered collection of callbacks.
///
/// `Event` is a handle; clones refer to the same event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    name: String,
    handle_errors: bool,
    allow_multiple_callbacks: bool,
    buckets: RwLock<BTreeMap<i32, Vec<Callback>>>,
    before: Mutex<Option<Event>>,
    after: Mutex<Option<Event>>,
    pass_extra_on_after: AtomicBool,
    manager: RwLock<Weak<ManagerInner>>,
    next_raise: AtomicU64,
    // Abort handles of in-flight raises, keyed by raise
    tasks: Mutex<HashMap<u64, Vec<AbortHandle>>>,
}

impl Event {
    /// Create an event that belongs to no manager.
    ///
    /// Detached events can be raised, but route no errors and cannot create
    /// `before`/`after` siblings until added to a manager.
    pub fn new(name: impl Into<String>, handle_errors: bool, allow_multiple_callbacks: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                name: name.into(),
                handle_errors,
                allow_multiple_callbacks,
                buckets: RwLock::new(BTreeMap::new()),
                before: Mutex::new(None),
                after: Mutex::new(None),
                pass_extra_on_after: AtomicBool::new(false),
                manager: RwLock::new(Weak::new()),
                next_raise: AtomicU64::new(0),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether callback errors are routed to the manager's error handler.
    pub fn handle_errors(&self) -> bool {
        self.inner.handle_errors
    }

    pub fn allow_multiple_callbacks(&self) -> bool {
        self.inner.allow_multiple_callbacks
    }

    /// The owning manager, if it is still alive.
    pub fn manager(&self) -> Option<EventManager> {
        self.inner.manager.read().upgrade().map(EventManager::from_inner)
    }

    pub fn is_attached(&self) -> bool {
        self.inner.manager.read().strong_count() > 0
    }

    pub(crate) fn set_manager(&self, manager: Weak<ManagerInner>) {
        *self.inner.manager.write() = manager;
    }

    /// Register `callback` at `priority`.
    ///
    /// Fails if the callback is already registered here, or if the event
    /// takes a single callback and already has one.
    pub fn add_callback(&self, callback: Callback, priority: i32) -> Result<Callback> {
        let mut buckets = self.inner.buckets.write();

        if !self.inner.allow_multiple_callbacks && buckets.values().any(|b| !b.is_empty()) {
            return Err(EventError::MultipleCallbacksNotAllowed(self.inner.name.clone()));
        }

        if buckets.values().flatten().any(|c| *c == callback) {
            return Err(EventError::CallbackAlreadyRegistered {
                callback: callback.name().to_string(),
                event: self.inner.name.clone(),
            });
        }

        buckets.entry(priority).or_default().push(callback.clone());
        debug!(
            "Registered callback '{}' on event '{}' at priority {}",
            callback.name(),
            self.inner.name,
            priority
        );
        Ok(callback)
    }

    /// Register `callback` at the manager's default priority.
    pub fn attach(&self, callback: Callback) -> Result<Callback> {
        let priority = self
            .manager()
            .map_or(DEFAULT_PRIORITY, |m| m.settings().default_priority);
        self.add_callback(callback, priority)
    }

    /// Build a callback and register it at `priority`.
    pub fn create_callback(&self, builder: CallbackBuilder, priority: i32) -> Result<Callback> {
        self.add_callback(builder.build()?, priority)
    }

    pub fn remove_callback(&self, callback: &Callback) -> Result<()> {
        let mut buckets = self.inner.buckets.write();

        let found = buckets.iter().find_map(|(priority, bucket)| {
            bucket
                .iter()
                .position(|c| c == callback)
                .map(|index| (*priority, index))
        });

        let (priority, index) = found.ok_or_else(|| EventError::CallbackNotRegistered {
            callback: callback.name().to_string(),
            event: self.inner.name.clone(),
        })?;

        if let Some(bucket) = buckets.get_mut(&priority) {
            bucket.remove(index);
            if bucket.is_empty() {
                buckets.remove(&priority);
            }
        }

        debug!(
            "Removed callback '{}' from event '{}'",
            callback.name(),
            self.inner.name
        );
        Ok(())
    }

    /// Registered callbacks, highest priority first, then in insertion order.
    pub fn callbacks(&self) -> Vec<Callback> {
        self.inner
            .buckets
            .read()
            .values()
            .rev()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn callback_count(&self) -> usize {
        self.inner.buckets.read().values().map(Vec::len).sum()
    }

    pub fn has_callbacks(&self) -> bool {
        self.callback_count() > 0
    }

    pub fn contains(&self, callback: &Callback) -> bool {
        self.inner
            .buckets
            .read()
            .values()
            .flatten()
            .any(|c| c == callback)
    }

    /// Occupied priorities, highest first.
    pub fn priorities(&self) -> Vec<i32> {
        self.inner.buckets.read().keys().rev().copied().collect()
    }

    /// The `<before:name>` sibling, created on first use.
    pub fn before(&self) -> Result<Event> {
        let mut slot = self.inner.before.lock();
        if let Some(event) = slot.as_ref() {
            return Ok(event.clone());
        }

        let event = self.sibling(format!("<before:{}>", self.inner.name))?;
        *slot = Some(event.clone());
        Ok(event)
    }

    /// The `<after:name>` sibling, created on first use.
    ///
    /// With `pass_extra`, after-callbacks receive the elapsed seconds of the
    /// main fan-out as their first argument. The flag is updated on every call.
    pub fn after(&self, pass_extra: bool) -> Result<Event> {
        let mut slot = self.inner.after.lock();
        let event = match slot.as_ref() {
            Some(event) => event.clone(),
            None => {
                let event = self.sibling(format!("<after:{}>", self.inner.name))?;
                *slot = Some(event.clone());
                event
            }
        };

        self.inner
            .pass_extra_on_after
            .store(pass_extra, Ordering::SeqCst);
        Ok(event)
    }

    /// The before sibling if it was created.
    pub fn before_event(&self) -> Option<Event> {
        self.inner.before.lock().clone()
    }

    /// The after sibling if it was created.
    pub fn after_event(&self) -> Option<Event> {
        self.inner.after.lock().clone()
    }

    pub fn pass_extra_on_after(&self) -> bool {
        self.inner.pass_extra_on_after.load(Ordering::SeqCst)
    }

    fn sibling(&self, name: String) -> Result<Event> {
        let manager = self
            .manager()
            .ok_or_else(|| EventError::Detached(self.inner.name.clone()))?;

        match manager.get_event(&name, true) {
            Some(existing) => Ok(existing),
            None => manager.create_event(name, self.inner.handle_errors, true),
        }
    }

    /// Raise the event and wait for every callback.
    ///
    /// Returns the callback error if exactly one callback failed unhandled,
    /// [`EventError::Multiple`] if several did. Handled errors never surface
    /// here. The after sibling is skipped when the fan-out fails.
    pub fn raise(&self, args: Args) -> BoxFuture<'static, Result<()>> {
        let event = self.clone();
        async move { event.dispatch(args).await }.boxed()
    }

    /// Raise the event in a background task.
    ///
    /// The caller does not wait for it; a failure is logged.
    pub fn raise_detached(&self, args: Args) -> JoinHandle<()> {
        let name = self.inner.name.clone();
        let raise = self.raise(args);

        tokio::spawn(async move {
            if let Err(e) = raise.await {
                error!("Detached raise of event '{}' failed: {}", name, e);
            }
        })
    }

    /// Abort every callback task started by raises of this event still in flight.
    ///
    /// Sibling events are not affected. Returns the number of aborted tasks.
    pub fn cancel(&self) -> usize {
        let tasks: Vec<AbortHandle> = self.inner.tasks.lock().drain().flat_map(|(_, t)| t).collect();
        for task in &tasks {
            task.abort();
        }

        if !tasks.is_empty() {
            debug!(
                "Cancelled {} task(s) of event '{}'",
                tasks.len(),
                self.inner.name
            );
        }
        tasks.len()
    }

    async fn dispatch(&self, args: Args) -> Result<()> {
        if let Some(before) = self.before_event().filter(Event::has_callbacks) {
            before.raise(args.clone()).await?;
        }

        let callbacks = self.callbacks();
        debug!(
            "Raising event '{}' with {} callback(s)",
            self.inner.name,
            callbacks.len()
        );

        let started = Instant::now();
        let handler = if self.inner.handle_errors {
            self.manager().map(|m| m.error_handler())
        } else {
            None
        };

        let mut aborts = Vec::with_capacity(callbacks.len());
        let mut tasks = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            let event = self.clone();
            let handler = handler.clone();
            let args = args.clone();
            let (abort, registration) = AbortHandle::new_pair();

            aborts.push(abort);
            tasks.push(Abortable::new(
                AssertUnwindSafe(async move {
                    callback
                        .invoke(args, Some(&event), handler.as_ref())
                        .await
                })
                .catch_unwind(),
                registration,
            ));
        }

        // Aborts and untracks the tasks if this raise is dropped early.
        let tracked = TrackedRaise::new(self, aborts);

        let mut failures = Vec::new();
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => failures.push(e),
                Ok(Err(panic)) => failures.push(EventError::TaskFailed(panic_message(&*panic))),
                Err(_aborted) => {}
            }
        }
        drop(tracked);

        if let Some(error) = EventError::from_failures(failures) {
            debug!("Event '{}' failed: {}", self.inner.name, error);
            return Err(error);
        }

        if let Some(after) = self.after_event().filter(Event::has_callbacks) {
            let mut after_args = args;
            if self.pass_extra_on_after() {
                after_args.prepend(Value::Float(started.elapsed().as_secs_f64()));
            }
            after.raise(after_args).await?;
        }

        Ok(())
    }
}

/// Tracks the abort handles of one raise for [`Event::cancel`].
struct TrackedRaise {
    event: Event,
    raise_id: u64,
}

impl TrackedRaise {
    fn new(event: &Event, aborts: Vec<AbortHandle>) -> Self {
        let raise_id = event.inner.next_raise.fetch_add(1, Ordering::Relaxed);
        if !aborts.is_empty() {
            event.inner.tasks.lock().insert(raise_id, aborts);
        }
        Self {
            event: event.clone(),
            raise_id,
        }
    }
}

impl Drop for TrackedRaise {
    fn drop(&mut self) {
        if let Some(aborts) = self.event.inner.tasks.lock().remove(&self.raise_id) {
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.inner.name)
            .field("handle_errors", &self.inner.handle_errors)
            .field("allow_multiple_callbacks", &self.inner.allow_multiple_callbacks)
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use std::sync::atomic::AtomicU32;

    fn noop(name: &str) -> Callback {
        Callback::builder(name, |_args| async { Ok(()) })
            .build()
            .unwrap()
    }

    #[test]
    fn test_callbacks_in_descending_priority_then_insertion() {
        let event = Event::new("ordered", true, true);
        let low = event.add_callback(noop("low"), 1).unwrap();
        let high_a = event.add_callback(noop("high_a"), 5).unwrap();
        let high_b = event.add_callback(noop("high_b"), 5).unwrap();
        let mid = event.add_callback(noop("mid"), 3).unwrap();

        assert_eq!(event.callbacks(), vec![high_a, high_b, mid, low]);
        assert_eq!(event.priorities(), vec![5, 3, 1]);
        assert_eq!(event.callback_count(), 4);
    }

    #[test]
    fn test_duplicate_callback_rejected() {
        let event = Event::new("dup", true, true);
        let callback = event.add_callback(noop("cb"), 1).unwrap();

        let err = event.add_callback(callback.clone(), 2).unwrap_err();
        assert!(matches!(err, EventError::CallbackAlreadyRegistered { .. }));
        assert_eq!(event.callback_count(), 1);
    }

    #[test]
    fn test_single_callback_event() {
        let event = Event::new("single", true, false);
        event.add_callback(noop("first"), 1).unwrap();

        let err = event.add_callback(noop("second"), 1).unwrap_err();
        assert!(matches!(err, EventError::MultipleCallbacksNotAllowed(_)));
    }

    #[test]
    fn test_remove_callback() {
        let event = Event::new("removal", true, true);
        let callback = event.add_callback(noop("cb"), 7).unwrap();

        event.remove_callback(&callback).unwrap();
        assert!(!event.has_callbacks());
        assert!(event.priorities().is_empty());

        let err = event.remove_callback(&callback).unwrap_err();
        assert!(matches!(err, EventError::CallbackNotRegistered { .. }));
    }

    #[test]
    fn test_detached_event_has_no_siblings() {
        let event = Event::new("alone", true, true);
        assert!(matches!(event.before(), Err(EventError::Detached(_))));
        assert!(matches!(event.after(true), Err(EventError::Detached(_))));
        assert!(event.before_event().is_none());
    }

    #[tokio::test]
    async fn test_raise_without_callbacks() {
        let event = Event::new("empty", true, true);
        event.raise(args![1, 2]).await.unwrap();
        assert_eq!(event.cancel(), 0);
    }

    #[tokio::test]
    async fn test_raise_waits_for_all_callbacks() {
        let event = Event::new("fanout", true, true);
        let calls = Arc::new(AtomicU32::new(0));

        for priority in 0..3 {
            let calls = calls.clone();
            event
                .create_callback(
                    Callback::builder(format!("cb{priority}"), move |_args| {
                        let calls = calls.clone();
                        async move {
                            tokio::task::yield_now().await;
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                    priority,
                )
                .unwrap();
        }

        event.raise(args![]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_are_collected_in_scheduling_order() {
        let event = Event::new("failing", true, true);
        event
            .create_callback(
                Callback::builder("late", |_args| async { Err("late".into()) }),
                1,
            )
            .unwrap();
        event
            .create_callback(
                Callback::builder("early", |_args| async { Err("early".into()) }),
                2,
            )
            .unwrap();

        let err = event.raise(args![]).await.unwrap_err();
        let names: Vec<String> = err
            .failures()
            .into_iter()
            .map(|e| match e {
                EventError::CallbackFailed { callback, .. } => callback.clone(),
                other => other.to_string(),
            })
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_single_failure_is_returned_as_is() {
        let event = Event::new("one_failure", true, true);
        event
            .create_callback(Callback::builder("ok", |_args| async { Ok(()) }), 1)
            .unwrap();
        event
            .create_callback(
                Callback::builder("bad", |_args| async { Err("bad".into()) }),
                1,
            )
            .unwrap();

        let err = event.raise(args![]).await.unwrap_err();
        assert!(matches!(err, EventError::CallbackFailed { ref callback, .. } if callback == "bad"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_tasks() {
        let event = Event::new("cancellable", true, true);
        event
            .create_callback(
                Callback::builder("forever", |_args| async { Ok(()) })
                    .repeat(0, std::time::Duration::from_secs(1)),
                1,
            )
            .unwrap();

        let raise = tokio::spawn(event.raise(args![]));
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;

        assert_eq!(event.cancel(), 1);
        raise.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_raise_stops_its_callbacks() {
        let event = Event::new("bounded", true, true);
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        event
            .create_callback(
                Callback::builder("ticker", move |_args| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .repeat(0, std::time::Duration::from_secs(1)),
                1,
            )
            .unwrap();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(2500),
            event.raise(args![]),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(event.cancel(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_priority_order_on_multi_thread_runtime() {
        for _ in 0..50 {
            let order = tokio::spawn(async {
                let event = Event::new("ordered", true, true);
                let seen = Arc::new(Mutex::new(Vec::new()));

                for (name, priority) in [("second", 1), ("first", 2)] {
                    let seen = seen.clone();
                    event
                        .create_callback(
                            Callback::builder(name, move |_args| {
                                let seen = seen.clone();
                                async move {
                                    seen.lock().push(name);
                                    Ok(())
                                }
                            }),
                            priority,
                        )
                        .unwrap();
                }

                event.raise(args![]).await.unwrap();
                seen.lock().clone()
            })
            .await
            .unwrap();

            assert_eq!(order, vec!["first", "second"]);
        }
    }

    #[tokio::test]
    async fn test_panicking_callback_fails_the_raise() {
        let event = Event::new("fragile", true, true);
        event
            .create_callback(
                Callback::builder("boom", |args: Args| async move {
                    if args.is_empty() {
                        panic!("boom");
                    }
                    Ok(())
                }),
                1,
            )
            .unwrap();

        let err = event.raise(args![]).await.unwrap_err();
        assert!(matches!(err, EventError::TaskFailed(ref message) if message == "boom"));
    }
}
