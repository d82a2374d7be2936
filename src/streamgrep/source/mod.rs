/*!
Record sources feeding the search loop.

A `Source` is a synchronous pull collaborator: the search loop asks for one
record at a time and the source says which records are processable at all,
independent of content matching. `VecSource` serves a prepared in-memory
batch, `QueueSource` pulls from a thread-safe hand-off queue fed by live
producers.
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};

use crate::streamgrep::config::SearchConfig;
use crate::streamgrep::error::{GrepError, GrepResult};
use crate::streamgrep::model::Record;
use crate::streamgrep::pattern::FieldSpec;

/// Provider of records for one search run.
///
/// `read` yields `(channel, record, stamp)` tuples until the source is
/// exhausted. Sources may span multiple batches (separately named input
/// units); the search loop resets its accounting when `get_batch` changes.
pub trait Source {
    /// Next record, or None when exhausted.
    fn read(&mut self) -> Option<(String, Record, i64)>;

    /// Whether the record passes source-side filtering (time and index
    /// ranges, decimation, uniqueness). `index` is the 1-based sequence
    /// number of the record on its channel.
    fn is_processable(&mut self, channel: &str, index: u64, stamp: i64, record: &Record) -> bool;

    /// Called for every processed record with the match verdict.
    fn notify(&mut self, matched: bool);

    /// Name of the batch the latest record belongs to, if the source has
    /// batch structure.
    fn get_batch(&self) -> Option<String> {
        None
    }

    /// Known channels and their record counts where available.
    fn channels(&self) -> HashMap<String, Option<u64>> {
        HashMap::new()
    }

    /// Raw schema definition text for a type, if the source knows it.
    fn definition(&self, type_name: &str) -> Option<String> {
        let _ = type_name;
        None
    }

    /// Called when the current batch is done with, early-stop included.
    fn close_batch(&mut self) {}

    /// Called once when the search ends.
    fn close(&mut self) {}
}

/// Source-side record filtering: time and index ranges, every-Nth
/// decimation, minimum interval and content uniqueness.
#[derive(Debug, Default)]
pub struct SourceFilter {
    start_time: Option<i64>,
    end_time: Option<i64>,
    start_index: Option<i64>,
    end_index: Option<i64>,
    nth_record: usize,
    min_interval: Option<i64>,
    unique: bool,
    select: Vec<FieldSpec>,
    noselect: Vec<FieldSpec>,
    /// Stamp of the last accepted record per channel, for interval spacing.
    last_stamps: HashMap<String, i64>,
    /// Content hashes already seen per channel, for uniqueness.
    seen_hashes: HashMap<String, HashSet<String>>,
}

impl SourceFilter {
    pub fn from_config(config: &SearchConfig) -> GrepResult<Self> {
        let select = config
            .select_fields
            .iter()
            .map(|s| FieldSpec::compile(s))
            .collect::<GrepResult<Vec<_>>>()?;
        let noselect = config
            .noselect_fields
            .iter()
            .map(|s| FieldSpec::compile(s))
            .collect::<GrepResult<Vec<_>>>()?;
        Ok(SourceFilter {
            start_time: config.start_time,
            end_time: config.end_time,
            start_index: config.start_index,
            end_index: config.end_index,
            nth_record: config.nth_record.max(1),
            min_interval: config.min_interval,
            unique: config.unique,
            select,
            noselect,
            last_stamps: HashMap::new(),
            seen_hashes: HashMap::new(),
        })
    }

    /// Whether any filtering is configured at all.
    pub fn is_active(&self) -> bool {
        self.start_time.is_some()
            || self.end_time.is_some()
            || self.start_index.is_some()
            || self.end_index.is_some()
            || self.nth_record > 1
            || self.min_interval.is_some()
            || self.unique
    }

    /// Judges one record. `total` is the channel's known record count,
    /// needed to resolve negative index bounds; without it negative bounds
    /// do not constrain.
    pub fn is_processable(
        &mut self,
        channel: &str,
        index: u64,
        stamp: i64,
        record: &Record,
        total: Option<u64>,
    ) -> bool {
        if let Some(start) = self.start_time {
            if stamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if stamp > end {
                return false;
            }
        }
        if let Some(bound) = resolve_index(self.start_index, total) {
            if (index as i64) < bound {
                return false;
            }
        }
        if let Some(bound) = resolve_index(self.end_index, total) {
            if (index as i64) > bound {
                return false;
            }
        }
        if self.nth_record > 1 && (index - 1) % self.nth_record as u64 != 0 {
            return false;
        }
        if let Some(interval) = self.min_interval {
            if let Some(last) = self.last_stamps.get(channel) {
                if stamp - last < interval {
                    return false;
                }
            }
        }
        if self.unique {
            let digest = self.record_hash(record);
            let seen = self.seen_hashes.entry(channel.to_string()).or_default();
            if !seen.insert(digest) {
                return false;
            }
        }
        self.last_stamps.insert(channel.to_string(), stamp);
        true
    }

    /// Clears per-batch state: interval spacing and uniqueness memory.
    pub fn reset(&mut self) {
        self.last_stamps.clear();
        self.seen_hashes.clear();
    }

    /// Content hash over the record's visible leaf values, honoring the
    /// select/noselect field specs so uniqueness tracks what is searched.
    fn record_hash(&self, record: &Record) -> String {
        let mut hasher = Md5::new();
        hasher.update(record.type_name.as_bytes());
        for (path, value) in record.flatten() {
            if self.noselect.iter().any(|spec| spec.matches(&path)) {
                continue;
            }
            if !self.select.is_empty() && !self.select.iter().any(|spec| spec.matches(&path)) {
                continue;
            }
            hasher.update(path.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Resolves a configured 1-based index bound against a channel total;
/// negative bounds count from the end.
fn resolve_index(bound: Option<i64>, total: Option<u64>) -> Option<i64> {
    match bound {
        Some(value) if value < 0 => total.map(|count| count as i64 + value + 1),
        other => other,
    }
}

/// In-memory source serving a prepared list of records as one batch.
pub struct VecSource {
    items: VecDeque<(String, Record, i64)>,
    counts: HashMap<String, Option<u64>>,
    definitions: HashMap<String, String>,
    batch: Option<String>,
    filter: SourceFilter,
}

impl VecSource {
    pub fn new(records: Vec<(String, Record, i64)>) -> Self {
        let mut counts: HashMap<String, Option<u64>> = HashMap::new();
        for (channel, _, _) in &records {
            let count = counts.entry(channel.clone()).or_insert(Some(0));
            *count = Some(count.unwrap_or(0) + 1);
        }
        VecSource {
            items: records.into(),
            counts,
            definitions: HashMap::new(),
            batch: None,
            filter: SourceFilter::default(),
        }
    }

    pub fn with_batch(mut self, name: impl Into<String>) -> Self {
        self.batch = Some(name.into());
        self
    }

    pub fn with_definition(
        mut self,
        type_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.definitions.insert(type_name.into(), text.into());
        self
    }

    pub fn with_filter(mut self, filter: SourceFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl Source for VecSource {
    fn read(&mut self) -> Option<(String, Record, i64)> {
        self.items.pop_front()
    }

    fn is_processable(&mut self, channel: &str, index: u64, stamp: i64, record: &Record) -> bool {
        let total = self.counts.get(channel).copied().flatten();
        self.filter.is_processable(channel, index, stamp, record, total)
    }

    fn notify(&mut self, _matched: bool) {}

    fn get_batch(&self) -> Option<String> {
        self.batch.clone()
    }

    fn channels(&self) -> HashMap<String, Option<u64>> {
        self.counts.clone()
    }

    fn definition(&self, type_name: &str) -> Option<String> {
        self.definitions.get(type_name).cloned()
    }

    fn close_batch(&mut self) {
        self.items.clear();
        self.filter.reset();
    }
}

enum QueueItem {
    Record(String, Record, i64),
    Close,
}

/// Producer half of a [`QueueSource`], usable from other threads.
#[derive(Clone)]
pub struct QueueProducer {
    sender: Sender<QueueItem>,
    definitions: Arc<Mutex<HashMap<String, String>>>,
}

impl QueueProducer {
    /// Hands one record to the consuming search loop.
    pub fn push(
        &self,
        channel: impl Into<String>,
        record: Record,
        stamp: i64,
    ) -> GrepResult<()> {
        self.sender
            .send(QueueItem::Record(channel.into(), record, stamp))
            .map_err(|_| GrepError::source_error("Queue consumer has gone away"))
    }

    /// Registers schema definition text for a record type.
    pub fn set_definition(&self, type_name: impl Into<String>, text: impl Into<String>) {
        if let Ok(mut definitions) = self.definitions.lock() {
            definitions.insert(type_name.into(), text.into());
        }
    }

    /// Signals end of input; the source's `read` returns None afterwards.
    pub fn close(&self) {
        let _ = self.sender.send(QueueItem::Close);
    }
}

/// Source pulling records from a thread-safe queue until closed.
///
/// `read` blocks until a producer pushes a record or closes the queue;
/// dropping all producers also ends the stream.
pub struct QueueSource {
    receiver: Receiver<QueueItem>,
    definitions: Arc<Mutex<HashMap<String, String>>>,
    filter: SourceFilter,
    done: bool,
}

impl QueueSource {
    pub fn new() -> (QueueProducer, QueueSource) {
        Self::with_filter(SourceFilter::default())
    }

    pub fn with_filter(filter: SourceFilter) -> (QueueProducer, QueueSource) {
        let (sender, receiver) = channel();
        let definitions = Arc::new(Mutex::new(HashMap::new()));
        let producer = QueueProducer {
            sender,
            definitions: Arc::clone(&definitions),
        };
        let source = QueueSource {
            receiver,
            definitions,
            filter,
            done: false,
        };
        (producer, source)
    }
}

impl Source for QueueSource {
    fn read(&mut self) -> Option<(String, Record, i64)> {
        if self.done {
            return None;
        }
        match self.receiver.recv() {
            Ok(QueueItem::Record(channel, record, stamp)) => Some((channel, record, stamp)),
            Ok(QueueItem::Close) | Err(_) => {
                self.done = true;
                None
            }
        }
    }

    fn is_processable(&mut self, channel: &str, index: u64, stamp: i64, record: &Record) -> bool {
        self.filter.is_processable(channel, index, stamp, record, None)
    }

    fn notify(&mut self, _matched: bool) {}

    fn definition(&self, type_name: &str) -> Option<String> {
        self.definitions
            .lock()
            .ok()
            .and_then(|definitions| definitions.get(type_name).cloned())
    }

    fn close_batch(&mut self) {
        self.filter.reset();
    }

    fn close(&mut self) {
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamgrep::model::FieldValue;
    use std::thread;

    fn record(text: &str) -> Record {
        Record::new("std/String").with_field("data", FieldValue::String(text.to_string()))
    }

    fn filter(f: impl FnOnce(&mut SearchConfig)) -> SourceFilter {
        let mut config = SearchConfig::default();
        f(&mut config);
        SourceFilter::from_config(&config).unwrap()
    }

    #[test]
    fn test_vec_source_serves_in_order() {
        let mut source = VecSource::new(vec![
            ("/a".to_string(), record("one"), 10),
            ("/b".to_string(), record("two"), 20),
            ("/a".to_string(), record("three"), 30),
        ])
        .with_batch("unit");

        assert_eq!(source.channels().get("/a"), Some(&Some(2)));
        assert_eq!(source.channels().get("/b"), Some(&Some(1)));
        assert_eq!(source.get_batch(), Some("unit".to_string()));

        assert_eq!(source.read().unwrap().2, 10);
        assert_eq!(source.read().unwrap().2, 20);
        assert_eq!(source.read().unwrap().2, 30);
        assert!(source.read().is_none());
    }

    #[test]
    fn test_time_range_filter() {
        let mut filter = filter(|c| {
            c.start_time = Some(100);
            c.end_time = Some(200);
        });
        assert!(!filter.is_processable("/a", 1, 50, &record("x"), None));
        assert!(filter.is_processable("/a", 2, 150, &record("x"), None));
        assert!(!filter.is_processable("/a", 3, 250, &record("x"), None));
    }

    #[test]
    fn test_nth_record_decimation() {
        let mut filter = filter(|c| c.nth_record = 3);
        let accepted: Vec<u64> = (1..=9)
            .filter(|&i| filter.is_processable("/a", i, i as i64, &record("x"), None))
            .collect();
        assert_eq!(accepted, vec![1, 4, 7]);
    }

    #[test]
    fn test_negative_index_bounds_use_total() {
        // Last two records of a ten-record channel.
        let mut filter = filter(|c| c.start_index = Some(-2));
        assert!(!filter.is_processable("/a", 8, 0, &record("x"), Some(10)));
        assert!(filter.is_processable("/a", 9, 0, &record("x"), Some(10)));
        assert!(filter.is_processable("/a", 10, 0, &record("x"), Some(10)));
        // Unknown total: negative bound does not constrain.
        assert!(filter.is_processable("/a", 1, 0, &record("x"), None));
    }

    #[test]
    fn test_min_interval_spacing() {
        let mut filter = filter(|c| c.min_interval = Some(100));
        assert!(filter.is_processable("/a", 1, 1000, &record("x"), None));
        assert!(!filter.is_processable("/a", 2, 1050, &record("x"), None));
        assert!(filter.is_processable("/a", 3, 1100, &record("x"), None));
        // Channels are spaced independently.
        assert!(filter.is_processable("/b", 1, 1050, &record("x"), None));
    }

    #[test]
    fn test_uniqueness_by_content() {
        let mut filter = filter(|c| c.unique = true);
        assert!(filter.is_processable("/a", 1, 0, &record("same"), None));
        assert!(!filter.is_processable("/a", 2, 1, &record("same"), None));
        assert!(filter.is_processable("/a", 3, 2, &record("other"), None));
        // Uniqueness is per channel.
        assert!(filter.is_processable("/b", 1, 3, &record("same"), None));
    }

    #[test]
    fn test_uniqueness_honors_noselect() {
        let mut filter = filter(|c| {
            c.unique = true;
            c.noselect_fields = vec!["stamp".to_string()];
        });
        let a = record("same").with_field("stamp", FieldValue::Integer(1));
        let b = record("same").with_field("stamp", FieldValue::Integer(2));
        assert!(filter.is_processable("/a", 1, 0, &a, None));
        assert!(!filter.is_processable("/a", 2, 1, &b, None));
    }

    #[test]
    fn test_queue_source_cross_thread() {
        let (producer, mut source) = QueueSource::new();
        producer.set_definition("std/String", "string data");
        let feeder = thread::spawn(move || {
            for i in 0..3 {
                producer.push("/live", record(&format!("r{}", i)), i).unwrap();
            }
            producer.close();
        });

        let mut stamps = Vec::new();
        while let Some((channel, _, stamp)) = source.read() {
            assert_eq!(channel, "/live");
            stamps.push(stamp);
        }
        feeder.join().unwrap();
        assert_eq!(stamps, vec![0, 1, 2]);
        assert!(source.read().is_none());
        assert_eq!(source.definition("std/String"), Some("string data".to_string()));
    }
}
