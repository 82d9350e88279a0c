//! Reporter trait for dependency injection
//!
//! Build code reports what the user should see (the command being run,
//! echoed output, the tail of a failed log) through this trait instead of
//! printing directly, so the CLI decides how it looks and tests can capture
//! it.

use std::sync::Mutex;

pub trait Reporter: Send + Sync {
    /// A build step is starting, e.g. `./configure --prefix=/opt/foo`.
    fn step(&self, title: &str);

    /// One line of child output, sent only in verbose mode.
    fn output(&self, line: &str);

    /// The last lines of a failed command's log.
    fn tail(&self, log: &std::path::Path, lines: &[String]);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn step(&self, title: &str) {
        (**self).step(title);
    }
    fn output(&self, line: &str) {
        (**self).output(line);
    }
    fn tail(&self, log: &std::path::Path, lines: &[String]) {
        (**self).tail(log, lines);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., verification, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn step(&self, _: &str) {}
    fn output(&self, _: &str) {}
    fn tail(&self, _: &std::path::Path, _: &[String]) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}

/// Everything a [`RecordingReporter`] was told, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Step(String),
    Output(String),
    Tail(Vec<String>),
    Info(String),
    Warning(String),
}

/// Keeps every report in memory. Used by tests and by callers that render
/// output after the fact.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn step(&self, title: &str) {
        self.push(Event::Step(title.to_string()));
    }
    fn output(&self, line: &str) {
        self.push(Event::Output(line.to_string()));
    }
    fn tail(&self, _: &std::path::Path, lines: &[String]) {
        self.push(Event::Tail(lines.to_vec()));
    }
    fn info(&self, msg: &str) {
        self.push(Event::Info(msg.to_string()));
    }
    fn warning(&self, msg: &str) {
        self.push(Event::Warning(msg.to_string()));
    }
}
