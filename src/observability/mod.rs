//! Observability
//!
//! - Structured JSON logging
//! - Typed events
//! - Monotonic counters
//!
//! Storage account keys never reach a log line.
//!
//! ```ignore
//! use rtable::observability::{log_event, Event};
//!
//! log_event(Event::ViewMutated, &[("view", "v1"), ("view_id", "4")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its default severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
