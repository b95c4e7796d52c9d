//! Priority-ordered async event dispatch for Herald.
//!
//! Named events hold callbacks grouped by priority. Raising an event starts
//! every callback as a concurrent task, highest priority first, and waits
//! for all of them. Callback failures are routed to the manager's
//! error-handler event instead of failing the raise.
//!
//! ## Features
//!
//! - **Priority buckets** - Descending priority, insertion order within a bucket
//! - **Before/after chaining** - Sibling events around each raise
//! - **Error routing** - Failures raised on a dedicated error-handler event
//! - **Argument coercion** - Raised values adapted to each callback's signature
//! - **Looping callbacks** - Start delay, repeat count and loop delay
//! - **Commands** - Events addressed by command name
//!
//! ## Quick Start
//!
//! ```rust
//! use herald_events::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = EventManager::new();
//!     let joined = manager.create_event("user_joined", true, true)?;
//!
//!     joined.create_callback(
//!         manager
//!             .callback("welcome", |args: Args| async move {
//!                 println!("welcome, {}", args.get(0).map(Value::to_string).unwrap_or_default());
//!                 Ok(())
//!             })
//!             .signature(Signature::new().param("user", ParamType::Text)),
//!         2,
//!     )?;
//!
//!     joined.after(true)?.create_callback(
//!         manager.callback("timing", |args: Args| async move {
//!             println!("handled in {}s", args.get(0).and_then(Value::as_float).unwrap_or_default());
//!             Ok(())
//!         }),
//!         1,
//!     )?;
//!
//!     manager.raise_event("user_joined", args!["alice"], true).await
//! }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use herald_events::*;
//!
//! # tokio_test::block_on(async {
//! let manager = EventManager::new();
//! manager
//!     .error_handler()
//!     .create_callback(
//!         manager.callback("report", |args: Args| async move {
//!             if let Some(context) = ErrorContext::from_args(&args) {
//!                 eprintln!("{} failed: {}", context.callback, context.error);
//!             }
//!             Ok(())
//!         }),
//!         1,
//!     )
//!     .unwrap();
//!
//! let event = manager.create_event("flaky", true, true).unwrap();
//! event
//!     .create_callback(manager.callback("fails", |_args| async { Err("boom".into()) }), 1)
//!     .unwrap();
//!
//! // Routed to the error handler, so the raise itself succeeds.
//! event.raise(args![]).await.unwrap();
//! # });
//! ```

pub mod binding;
pub mod callback;
pub mod coerce;
pub mod command;
pub mod error;
pub mod event;
pub mod manager;
pub mod settings;
pub mod value;

pub use binding::Binding;
pub use callback::{Action, Callback, CallbackBuilder, CallbackOptions, FnAction};
pub use coerce::{
    CoercionError, CustomType, Param, ParamType, ParseError, Parsable, Signature, coerce,
    coerce_value,
};
pub use command::{Command, CommandOptions};
pub use error::{BoxError, ErrorContext, EventError, Result};
pub use event::{DEFAULT_PRIORITY, Event};
pub use manager::EventManager;
pub use settings::DispatchSettings;
pub use value::{Args, Opaque, Value};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::args;
    pub use crate::binding::Binding;
    pub use crate::callback::{Action, Callback, CallbackBuilder, CallbackOptions};
    pub use crate::coerce::{ParamType, Parsable, ParseError, Signature};
    pub use crate::command::{Command, CommandOptions};
    pub use crate::error::{BoxError, ErrorContext, EventError, Result};
    pub use crate::event::Event;
    pub use crate::manager::EventManager;
    pub use crate::settings::DispatchSettings;
    pub use crate::value::{Args, Value};
}
