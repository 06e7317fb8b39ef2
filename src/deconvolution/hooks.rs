//! Hooks the host application plugs in to observe a running deconvolution.
//!
//! Both traits are fire-and-forget: the engine never waits on them and is
//! correct if they do nothing at all.
use std::sync::Mutex;

/// A sink for human-readable progress lines, e.g. a GUI console widget.
///
/// Implementations must be callable from the worker threads a search fans
/// out, hence the `Sync` bound.
pub trait MessageSink: Sync {
    fn post_message(&self, text: &str);
}

/// Notify the host that dataset state changed and dependent views should
/// re-render.
pub trait RefreshHook: Sync {
    fn refresh(&self);
}

/// Discards every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn post_message(&self, _text: &str) {}
}

impl RefreshHook for NullSink {
    fn refresh(&self) {}
}

/// Collects messages in memory, mainly for tests and headless runs
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSink for MemorySink {
    fn post_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.post_message("first");
        sink.post_message("second");
        assert_eq!(sink.messages(), vec!["first", "second"]);
    }

    #[test]
    fn test_null_sink_ignores() {
        let sink = NullSink;
        sink.post_message("dropped");
        sink.refresh();
    }
}
