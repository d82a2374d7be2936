/*!
Emission targets for search results.

A `Sink` receives matched records and their context records, in stream
order. `MemorySink` collects everything for inspection, mainly in tests and
embedding applications.
*/

use crate::streamgrep::model::Record;

/// Consumer of search results.
pub trait Sink {
    /// Called once per batch before the first emission from it, for sinks
    /// that print batch headers or open per-batch outputs.
    fn emit_meta(&mut self) {}

    /// Emits one record. `matched` carries the marker-annotated copy for
    /// matches and is None for context records.
    fn emit(
        &mut self,
        channel: &str,
        index: u64,
        stamp: i64,
        record: &Record,
        matched: Option<&Record>,
    );

    /// Whether the sink renders match markers. Non-highlighting sinks allow
    /// the passthrough shortcut that skips span computation.
    fn is_highlighting(&self) -> bool {
        false
    }

    /// Flushes buffered output.
    fn flush(&mut self) {}

    /// Called once when the search ends.
    fn close(&mut self) {}
}

/// One record handed to a [`MemorySink`].
#[derive(Debug, Clone)]
pub struct Emission {
    pub channel: String,
    pub index: u64,
    pub stamp: i64,
    pub record: Record,
    /// Marker-annotated copy for matches, None for context records.
    pub matched: Option<Record>,
}

impl Emission {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

/// Sink that retains all emissions in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub emissions: Vec<Emission>,
    pub meta_count: usize,
    pub flush_count: usize,
    pub closed: bool,
    highlighting: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Marks the sink as highlighting, so searches compute match markers.
    pub fn highlighting(mut self, value: bool) -> Self {
        self.highlighting = value;
        self
    }

    /// Emissions that were matches, in order.
    pub fn matches(&self) -> Vec<&Emission> {
        self.emissions.iter().filter(|e| e.is_match()).collect()
    }

    /// Emissions that were context records, in order.
    pub fn context(&self) -> Vec<&Emission> {
        self.emissions.iter().filter(|e| !e.is_match()).collect()
    }
}

impl Sink for MemorySink {
    fn emit_meta(&mut self) {
        self.meta_count += 1;
    }

    fn emit(
        &mut self,
        channel: &str,
        index: u64,
        stamp: i64,
        record: &Record,
        matched: Option<&Record>,
    ) {
        self.emissions.push(Emission {
            channel: channel.to_string(),
            index,
            stamp,
            record: record.clone(),
            matched: matched.cloned(),
        });
    }

    fn is_highlighting(&self) -> bool {
        self.highlighting
    }

    fn flush(&mut self) {
        self.flush_count += 1;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
