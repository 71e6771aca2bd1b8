//! Streaming Manager
//!
//! Adapter registry for streamed invocation output. When an invocation runs
//! with `stream: true` and streaming is enabled, stdout chunks are forwarded
//! to the selected format adapter as they arrive; the default terminal sink
//! is suppressed while a stream format is active.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Receives chunks for one stream format.
pub trait StreamAdapter: Send + Sync {
    fn on_chunk(&self, chunk: &str);
    /// Drain whatever the adapter accumulated.
    fn finalize(&self) -> Vec<String>;
}

/// Newline-delimited JSON adapter: each chunk becomes one NDJSON record.
#[derive(Default)]
pub struct NdjsonAdapter {
    records: Mutex<Vec<String>>,
}

impl StreamAdapter for NdjsonAdapter {
    fn on_chunk(&self, chunk: &str) {
        let record = serde_json::json!({ "chunk": chunk });
        self.records.lock().unwrap().push(record.to_string());
    }

    fn finalize(&self) -> Vec<String> {
        std::mem::take(&mut self.records.lock().unwrap())
    }
}

/// Registry plus the enabled/format switches for the current document.
#[derive(Clone, Default)]
pub struct StreamingManager {
    inner: Arc<StreamingInner>,
}

#[derive(Default)]
struct StreamingInner {
    adapters: Mutex<HashMap<String, Arc<dyn StreamAdapter>>>,
    state: Mutex<StreamingState>,
}

#[derive(Default)]
struct StreamingState {
    enabled: bool,
    format: Option<String>,
}

impl StreamingManager {
    pub fn new() -> Self {
        let mgr = Self::default();
        mgr.register("ndjson", Arc::new(NdjsonAdapter::default()));
        mgr
    }

    pub fn register(&self, format: &str, adapter: Arc<dyn StreamAdapter>) {
        self.inner
            .adapters
            .lock()
            .unwrap()
            .insert(format.to_string(), adapter);
    }

    pub fn configure(&self, enabled: bool, format: Option<String>) {
        let mut state = self.inner.state.lock().unwrap();
        state.enabled = enabled;
        state.format = format;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().unwrap().enabled
    }

    /// True when a format adapter is active, so the terminal sink should be
    /// suppressed.
    pub fn sink_suppressed(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.enabled
            && state
                .format
                .as_ref()
                .map(|f| self.inner.adapters.lock().unwrap().contains_key(f))
                .unwrap_or(false)
    }

    /// Forward a chunk to the active adapter, if any.
    pub fn emit(&self, chunk: &str) {
        let format = {
            let state = self.inner.state.lock().unwrap();
            if !state.enabled {
                return;
            }
            state.format.clone()
        };
        if let Some(format) = format {
            let adapter = self.inner.adapters.lock().unwrap().get(&format).cloned();
            if let Some(adapter) = adapter {
                adapter.on_chunk(chunk);
            }
        }
    }

    /// Drain the active adapter's accumulated records.
    pub fn finalize_results(&self) -> Vec<String> {
        let format = self.inner.state.lock().unwrap().format.clone();
        if let Some(format) = format {
            let adapter = self.inner.adapters.lock().unwrap().get(&format).cloned();
            if let Some(adapter) = adapter {
                return adapter.finalize();
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_manager_drops_chunks() {
        let mgr = StreamingManager::new();
        mgr.emit("lost");
        assert!(mgr.finalize_results().is_empty());
    }

    #[test]
    fn test_ndjson_records() {
        let mgr = StreamingManager::new();
        mgr.configure(true, Some("ndjson".into()));
        mgr.emit("a");
        mgr.emit("b");
        let records = mgr.finalize_results();
        assert_eq!(records.len(), 2);
        assert!(records[0].contains("\"chunk\":\"a\""));
    }

    #[test]
    fn test_sink_suppression_requires_known_format() {
        let mgr = StreamingManager::new();
        mgr.configure(true, Some("ndjson".into()));
        assert!(mgr.sink_suppressed());
        mgr.configure(true, Some("unknown".into()));
        assert!(!mgr.sink_suppressed());
        mgr.configure(false, Some("ndjson".into()));
        assert!(!mgr.sink_suppressed());
    }
}
