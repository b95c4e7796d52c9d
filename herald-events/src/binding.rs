//! Callbacks bound to an owning instance.

use crate::callback::Callback;
use crate::error::Result;
use crate::value::Value;
use std::sync::Arc;

/// Owns an instance and the callbacks bound to it.
///
/// Registered callbacks receive the instance as their first positional
/// argument; actions recover it with [`crate::Args::receiver`].
///
/// ```rust
/// use herald_events::{Args, Binding, Callback, Signature};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// let mut binding = Binding::new(Greeter { greeting: "hello".into() });
/// binding
///     .register(
///         Callback::builder("greet", |args: Args| async move {
///             let greeter = args.receiver::<Greeter>().ok_or("unbound")?;
///             println!("{}", greeter.greeting);
///             Ok(())
///         })
///         .signature(Signature::method())
///         .build()
///         .unwrap(),
///     )
///     .unwrap();
///
/// binding.unload();
/// assert!(!binding.callbacks()[0].is_active());
/// ```
pub struct Binding<T: Send + Sync + 'static> {
    instance: Arc<T>,
    callbacks: Vec<Callback>,
}

impl<T: Send + Sync + 'static> Binding<T> {
    pub fn new(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc(instance: Arc<T>) -> Self {
        Self {
            instance,
            callbacks: Vec::new(),
        }
    }

    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    /// Bind `callback` to the instance and track it.
    ///
    /// The callback must take a receiver and must not be bound yet.
    pub fn register(&mut self, callback: Callback) -> Result<Callback> {
        callback.bind(Value::shared(self.instance.clone()))?;
        self.callbacks.push(callback.clone());
        Ok(callback)
    }

    pub fn callbacks(&self) -> &[Callback] {
        &self.callbacks
    }

    /// Enable every registered callback.
    pub fn load(&self) {
        for callback in &self.callbacks {
            callback.enable();
        }
    }

    /// Disable every registered callback.
    pub fn unload(&self) {
        for callback in &self.callbacks {
            callback.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::coerce::{ParamType, Signature};
    use crate::error::EventError;
    use crate::event::Event;
    use crate::value::Args;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicU32,
    }

    fn method(name: &str) -> Callback {
        Callback::builder(name, |args: Args| async move {
            let counter = args.receiver::<Counter>().ok_or("missing receiver")?;
            let step = args.get(1).and_then(Value::as_int).unwrap_or(1);
            counter.hits.fetch_add(step as u32, Ordering::SeqCst);
            Ok(())
        })
        .signature(Signature::method().param("step", ParamType::Integer))
        .bound()
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_bound_callbacks_receive_instance() {
        let mut binding = Binding::new(Counter::default());
        let event = Event::new("tick", true, true);
        event.add_callback(binding.register(method("tick")).unwrap(), 1).unwrap();

        event.raise(args!["2"]).await.unwrap();
        assert_eq!(binding.instance().hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let mut binding = Binding::new(Counter::default());
        let event = Event::new("tick", true, true);
        for name in ["a", "b"] {
            event.add_callback(binding.register(method(name)).unwrap(), 1).unwrap();
        }

        binding.unload();
        event.raise(args![]).await.unwrap();
        assert_eq!(binding.instance().hits.load(Ordering::SeqCst), 0);

        binding.load();
        event.raise(args![]).await.unwrap();
        assert_eq!(binding.instance().hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_rejects_plain_and_bound_callbacks() {
        let mut binding = Binding::new(Counter::default());

        let plain = Callback::builder("plain", |_args| async { Ok(()) })
            .build()
            .unwrap();
        assert!(matches!(
            binding.register(plain),
            Err(EventError::NotBindable(_))
        ));

        let callback = binding.register(method("once")).unwrap();
        let mut other = Binding::new(Counter::default());
        assert!(matches!(
            other.register(callback),
            Err(EventError::AlreadyBound(_))
        ));
        assert_eq!(binding.callbacks().len(), 1);
    }
}
