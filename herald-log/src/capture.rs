//! Per-thread record capture.
//!
//! While a [`Capture`] guard is alive, records emitted on the same thread are
//! buffered in memory instead of being written to stderr. Tasks spawned on a
//! current-thread Tokio runtime share that thread, so a test can capture
//! everything a raise logs. On a multi-thread runtime, only records emitted
//! by futures polled on the capturing thread are seen.
//!
//! ```rust
//! let capture = herald_log::capture::start();
//! herald_log::info!("callback ran");
//! assert_eq!(capture.messages(), vec!["callback ran".to_string()]);
//! ```

use crate::Level;
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static BUFFER: RefCell<Option<Vec<Record>>> = const { RefCell::new(None) };
}

/// A captured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub target: String,
    pub message: String,
}

/// Guard returned by [`start`]; capture stops when it is dropped.
#[derive(Debug)]
pub struct Capture {
    // Bound to the thread that owns the buffer.
    _thread: PhantomData<*const ()>,
}

/// Start capturing records emitted on the current thread.
///
/// Starting a new capture discards anything buffered by a previous one.
pub fn start() -> Capture {
    BUFFER.with(|buffer| *buffer.borrow_mut() = Some(Vec::new()));
    Capture {
        _thread: PhantomData,
    }
}

impl Capture {
    /// All records captured so far, in emission order.
    pub fn records(&self) -> Vec<Record> {
        BUFFER.with(|buffer| buffer.borrow().clone().unwrap_or_default())
    }

    /// Messages of the captured records, in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    /// Messages at or above `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.level >= level)
            .map(|r| r.message)
            .collect()
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        BUFFER.with(|buffer| *buffer.borrow_mut() = None);
    }
}

/// Buffer the record if a capture is active; returns whether it was taken.
pub(crate) fn record(level: Level, target: &str, message: &str) -> bool {
    BUFFER.with(|buffer| match buffer.borrow_mut().as_mut() {
        Some(records) => {
            records.push(Record {
                level,
                target: target.to_string(),
                message: message.to_string(),
            });
            true
        }
        None => false,
    })
}
