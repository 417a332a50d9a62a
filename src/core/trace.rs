use std::sync::Mutex;

use serde::Serialize;

use crate::core::value::ValueMap;

/// One recomputation, as observed by a trace sink.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub node: String,
    /// The version tick the node was stamped with.
    pub version: u64,
    pub inputs: ValueMap,
    pub outputs: ValueMap,
}

impl TraceEntry {
    /// The entry as a JSON value, for sinks that ship records elsewhere.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Trait for recording recomputation traces.
pub trait TraceSink: Send + Sync {
    fn record(&self, entry: TraceEntry);
    fn flush(&self) {}
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTrace {
    entries: Mutex<Vec<TraceEntry>>,
}

impl MemoryTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// How many times the named node recomputed.
    pub fn recompute_count(&self, node: &str) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|entry| entry.node == node).count())
            .unwrap_or(0)
    }
}

impl TraceSink for MemoryTrace {
    fn record(&self, entry: TraceEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
