//! Callbacks into the embedding application.
//!
//! Sinks are invoked from whichever thread drives the update. They should
//! return quickly; marshaling onto a UI thread is the host's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives human-readable progress and diagnostic messages.
pub trait LogSink {
    /// Append one message.
    fn write(&mut self, text: &str);
}

/// Receives completion percentage (0..=100).
pub trait ProgressSink {
    /// Report progress.
    fn update(&mut self, percent: u8);
}

impl<F: FnMut(&str)> LogSink for F {
    fn write(&mut self, text: &str) {
        self(text);
    }
}

impl<F: FnMut(u8)> ProgressSink for F {
    fn update(&mut self, percent: u8) {
        self(percent);
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&mut self, _text: &str) {}
}

impl ProgressSink for NullSink {
    fn update(&mut self, _percent: u8) {}
}

/// Cooperative cancellation flag, checked between update steps.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sinks() {
        let mut lines = Vec::new();
        {
            let mut sink = |s: &str| lines.push(s.to_string());
            LogSink::write(&mut sink, "hello");
        }
        assert_eq!(lines, vec!["hello"]);

        let mut last = 0;
        {
            let mut sink = |p: u8| last = p;
            sink.update(42);
        }
        assert_eq!(last, 42);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
