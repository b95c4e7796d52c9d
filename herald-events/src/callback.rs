//! Callbacks: units of asynchronous work with execution options.

use crate::coerce::{Signature, coerce};
use crate::error::{BoxError, EventError, Result};
use crate::event::Event;
use crate::value::{Args, Value};
use async_trait::async_trait;
use herald_log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

/// The work a callback performs.
///
/// Closures are adapted with [`FnAction`]; implement this trait directly
/// for stateful handlers.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    async fn call(&self, args: Args) -> std::result::Result<(), BoxError>;
}

/// Adapts an async closure into an [`Action`].
pub struct FnAction<F>(F);

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Action for FnAction<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    async fn call(&self, args: Args) -> std::result::Result<(), BoxError> {
        (self.0)(args).await
    }
}

/// Execution options of a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackOptions {
    /// Inactive callbacks are skipped on invoke
    pub active: bool,

    /// Wait before the first iteration, in seconds when serialized
    #[serde(with = "seconds")]
    pub start_delay: Duration,

    /// Number of iterations; zero or negative loops until stopped
    pub loop_count: i64,

    /// Wait between iterations, in seconds when serialized
    #[serde(with = "seconds")]
    pub loop_delay: Duration,

    /// Errors propagate to the caller instead of the error handler
    pub refuse_error_handling: bool,

    /// Keep looping after a handled error
    pub continue_on_error: bool,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            active: true,
            start_delay: Duration::ZERO,
            loop_count: 1,
            loop_delay: Duration::ZERO,
            refuse_error_handling: false,
            continue_on_error: false,
        }
    }
}

impl CallbackOptions {
    pub fn is_infinite(&self) -> bool {
        self.loop_count <= 0
    }
}

mod seconds {
    use herald_config::ConfigValidator;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        ConfigValidator::seconds(secs, "delay").map_err(D::Error::custom)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Builds a [`Callback`].
///
/// ```rust
/// use herald_events::{Callback, ParamType, Signature};
/// use std::time::Duration;
///
/// let callback = Callback::builder("tick", |_args| async { Ok(()) })
///     .signature(Signature::new().param("count", ParamType::Integer))
///     .repeat(3, Duration::from_millis(10))
///     .build()
///     .unwrap();
///
/// assert_eq!(callback.options().loop_count, 3);
/// ```
pub struct CallbackBuilder {
    name: String,
    action: Arc<dyn Action>,
    signature: Signature,
    options: CallbackOptions,
    bound: bool,
}

impl CallbackBuilder {
    pub fn new(name: impl Into<String>, action: impl Action) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
            signature: Signature::new(),
            options: CallbackOptions::default(),
            bound: false,
        }
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Replace every option at once.
    pub fn options(mut self, options: CallbackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.options.start_delay = delay;
        self
    }

    /// Run `count` iterations (`<= 0` for no limit) separated by `delay`.
    pub fn repeat(mut self, count: i64, delay: Duration) -> Self {
        self.options.loop_count = count;
        self.options.loop_delay = delay;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.options.active = false;
        self
    }

    pub fn refuse_error_handling(mut self) -> Self {
        self.options.refuse_error_handling = true;
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.options.continue_on_error = true;
        self
    }

    /// Require a bound instance before the callback can run.
    pub fn bound(mut self) -> Self {
        self.bound = true;
        self
    }

    pub fn build(self) -> Result<Callback> {
        if self.bound && !self.signature.has_receiver() {
            return Err(EventError::MissingReceiver(self.name));
        }

        let requires_bound_instance = self.signature.has_receiver();
        Ok(Callback {
            inner: Arc::new(CallbackInner {
                id: Uuid::new_v4(),
                name: self.name,
                action: self.action,
                signature: self.signature,
                options: RwLock::new(self.options),
                running: AtomicUsize::new(0),
                requires_bound_instance,
                bound_instance: OnceLock::new(),
            }),
        })
    }
}

struct CallbackInner {
    id: Uuid,
    name: String,
    action: Arc<dyn Action>,
    signature: Signature,
    options: RwLock<CallbackOptions>,
    running: AtomicUsize,
    requires_bound_instance: bool,
    bound_instance: OnceLock<Value>,
}

/// A registered unit of work.
///
/// `Callback` is a handle: clones share state and compare equal. Use
/// [`Callback::duplicate`] for an independent copy.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<CallbackInner>,
}

impl Callback {
    /// Start building a callback around an async closure.
    pub fn builder<F, Fut>(name: impl Into<String>, f: F) -> CallbackBuilder
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        CallbackBuilder::new(name, FnAction::new(f))
    }

    /// Start building a callback around an [`Action`] implementation.
    pub fn from_action(name: impl Into<String>, action: impl Action) -> CallbackBuilder {
        CallbackBuilder::new(name, action)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    /// Snapshot of the current options.
    pub fn options(&self) -> CallbackOptions {
        self.inner.options.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.options.read().active
    }

    /// Whether an invocation is in progress.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) > 0
    }

    pub fn enable(&self) {
        self.inner.options.write().active = true;
    }

    /// Skip future invocations and stop running loops before their next iteration.
    pub fn disable(&self) {
        self.inner.options.write().active = false;
    }

    pub fn set_loop(&self, count: i64, delay: Duration) {
        let mut options = self.inner.options.write();
        options.loop_count = count;
        options.loop_delay = delay;
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.inner.options.write().start_delay = delay;
    }

    pub fn set_continue_on_error(&self, enabled: bool) {
        self.inner.options.write().continue_on_error = enabled;
    }

    pub fn set_refuse_error_handling(&self, enabled: bool) {
        self.inner.options.write().refuse_error_handling = enabled;
    }

    pub fn requires_bound_instance(&self) -> bool {
        self.inner.requires_bound_instance
    }

    pub fn bound_instance(&self) -> Option<&Value> {
        self.inner.bound_instance.get()
    }

    /// Bind the instance passed as the receiver. Allowed once.
    pub fn bind(&self, instance: Value) -> Result<()> {
        if !self.inner.requires_bound_instance {
            return Err(EventError::NotBindable(self.inner.name.clone()));
        }
        self.inner
            .bound_instance
            .set(instance)
            .map_err(|_| EventError::AlreadyBound(self.inner.name.clone()))
    }

    /// An independent callback with the same action, signature and options.
    ///
    /// The copy is unbound and not registered anywhere.
    pub fn duplicate(&self) -> Callback {
        Callback {
            inner: Arc::new(CallbackInner {
                id: Uuid::new_v4(),
                name: self.inner.name.clone(),
                action: self.inner.action.clone(),
                signature: self.inner.signature.clone(),
                options: RwLock::new(self.options()),
                running: AtomicUsize::new(0),
                requires_bound_instance: self.inner.requires_bound_instance,
                bound_instance: OnceLock::new(),
            }),
        }
    }

    /// Run the callback with `args`.
    ///
    /// Does nothing when inactive. Otherwise waits the start delay, then
    /// runs the configured iterations. A failing iteration is routed to
    /// `handler` (fire and forget) unless error handling is refused or no
    /// handler is given, in which case the error is returned.
    pub async fn invoke(
        &self,
        args: Args,
        event: Option<&Event>,
        handler: Option<&Event>,
    ) -> Result<()> {
        let options = self.options();
        if !options.active {
            return Ok(());
        }

        let _running = RunningGuard::new(&self.inner.running);

        if !options.start_delay.is_zero() {
            tokio::time::sleep(options.start_delay).await;
        }

        let mut iteration: i64 = 0;
        loop {
            iteration += 1;

            if let Err(error) = self.run_once(args.clone()).await {
                match handler {
                    Some(handler) if !options.refuse_error_handling => {
                        warn!(
                            "Callback '{}' failed, routing to '{}': {}",
                            self.name(),
                            handler.name(),
                            error
                        );
                        self.route_error(handler, error, event, &args);
                        if !options.continue_on_error {
                            break;
                        }
                    }
                    _ => return Err(error),
                }
            }

            if !options.is_infinite() && iteration >= options.loop_count {
                break;
            }

            if options.loop_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(options.loop_delay).await;
            }

            if !self.is_active() {
                debug!("Callback '{}' disabled after {} iterations", self.name(), iteration);
                break;
            }
        }

        Ok(())
    }

    async fn run_once(&self, args: Args) -> Result<()> {
        let mut args = coerce(&self.inner.signature, args)?;

        if self.inner.requires_bound_instance {
            let instance = self
                .inner
                .bound_instance
                .get()
                .cloned()
                .ok_or_else(|| EventError::MissingBoundInstance(self.inner.name.clone()))?;
            args.prepend(instance);
        }

        self.inner
            .action
            .call(args)
            .await
            .map_err(|source| EventError::CallbackFailed {
                callback: self.inner.name.clone(),
                source,
            })
    }

    /// Raise `handler` with `(error, event, callback, args...)`.
    fn route_error(&self, handler: &Event, error: EventError, event: Option<&Event>, args: &Args) {
        let (positional, keyword) = args.clone().into_parts();

        let mut routed = Vec::with_capacity(positional.len() + 3);
        routed.push(Value::object(error));
        routed.push(event.map_or(Value::Null, |event| Value::object(event.clone())));
        routed.push(Value::object(self.clone()));
        routed.extend(positional);

        handler.raise_detached(Args::from_parts(routed, keyword));
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("active", &self.is_active())
            .field("bound", &self.inner.bound_instance.get().is_some())
            .finish()
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
