//! Product log sink.
//!
//! Every component reports what it did through a [`LogSink`]: a single-argument
//! text callback. The sink may be called from the background worker thread, so
//! implementations must be `Send + Sync`; a UI host marshals messages onto its own
//! thread inside its sink.
//!
//! This is separate from `tracing` diagnostics (see [`crate::logging`]), which are
//! developer-facing and filtered by `RUST_LOG`.

use std::sync::Arc;

use tracing::info;

pub trait LogSink: Send + Sync {
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message);
    }
}

/// Shared handle passed to every component.
pub type SharedSink = Arc<dyn LogSink>;

/// Forwards messages to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        info!(target: "dropconvert::sink", "{message}");
    }
}

/// Writes each message as a line on stderr. Used by the CLI host.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink: SharedSink = Arc::new(move |message: &str| {
            if let Ok(mut guard) = captured.lock() {
                guard.push(message.to_string());
            }
        });

        sink.log("one");
        sink.log("two");

        let seen = seen.lock().expect("lock");
        assert_eq!(*seen, vec!["one".to_string(), "two".to_string()]);
    }
}
