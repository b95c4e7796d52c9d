// Herald - Priority-ordered async event dispatch for Rust
//
// Events hold callbacks grouped by priority; raising an event fans them out
// as concurrent tasks, chains before/after sibling events, and routes
// callback failures to a dedicated error-handler event.

// Re-export the dispatch core
pub use herald_events::*;

// Re-export supporting crates
pub use herald_config;
pub use herald_log;

/// Re-export commonly used types
pub mod prelude {
    pub use herald_events::prelude::*;
    pub use herald_config::{ConfigManager, Validate};
}
