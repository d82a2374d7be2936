/*!
The search orchestrator.

`Searcher` drives the pull loop: it reads records from a `Source`, derives
their channel identity, registers condition history, applies source filters,
gating conditions and match quotas, runs the match engine, and decides which
records reach the `Sink` as matches or surrounding context.

Per channel it keeps a bounded window of recent records so that leading
context can be emitted retroactively when a match arrives, and trailing
context as further records come in. All state is batch-scoped: when the
source signals a new batch, windows, histories and registry entries reset.
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::streamgrep::condition::ConditionEvaluator;
use crate::streamgrep::config::SearchConfig;
use crate::streamgrep::engine::MatchEngine;
use crate::streamgrep::error::GrepResult;
use crate::streamgrep::model::Record;
use crate::streamgrep::pattern::PatternSet;
use crate::streamgrep::registry::{ChannelKey, RegistryHandle, TypeRegistry};
use crate::streamgrep::sink::Sink;
use crate::streamgrep::source::Source;

/// Lifecycle of a record inside its channel's context window.
///
/// Status only moves forward: a pending record can become a match or
/// context, and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Not emitted; still eligible as leading context for a later match.
    Pending,
    /// Matched the patterns.
    Matched,
    /// Emitted as context around a match.
    Context,
}

struct WindowEntry {
    id: u64,
    record: Record,
    stamp: i64,
    status: EntryStatus,
    handle: RegistryHandle,
}

#[derive(Default)]
struct ChannelWindow {
    /// Last assigned sequence id, 1-based per channel.
    seq: u64,
    /// Matches on this channel, decimated ones included.
    matched: u64,
    entries: VecDeque<WindowEntry>,
}

/// Drives one search run from a source to a sink.
pub struct Searcher {
    config: SearchConfig,
    patterns: PatternSet,
    conditions: ConditionEvaluator,
    registry: TypeRegistry,
    windows: HashMap<ChannelKey, ChannelWindow>,
    matched_channels: HashSet<ChannelKey>,
    seen_types: HashSet<String>,
    total_matched: u64,
    stop: Arc<AtomicBool>,
}

impl Searcher {
    /// Compiles patterns and conditions from the configuration. Any
    /// malformed expression fails here, before any record is processed.
    pub fn new(config: SearchConfig) -> GrepResult<Self> {
        let patterns = PatternSet::compile(&config)?;
        let conditions = ConditionEvaluator::new(&config.conditions)?;
        Ok(Searcher {
            patterns,
            conditions,
            registry: TypeRegistry::new(),
            windows: HashMap::new(),
            matched_channels: HashSet::new(),
            seen_types: HashSet::new(),
            total_matched: 0,
            stop: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Shared cancellation flag; setting it makes the loop exit between
    /// records, closing source and sink cleanly.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Access to the condition evaluator, for marking channels as
    /// condition-only before a run.
    pub fn conditions_mut(&mut self) -> &mut ConditionEvaluator {
        &mut self.conditions
    }

    /// The type registry backing this searcher.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Matched records across all batches of the last run, decimated
    /// matches included.
    pub fn total_matched(&self) -> u64 {
        self.total_matched
    }

    /// Runs the search until the source is exhausted or stopped, returning
    /// the number of matched records.
    pub fn search(&mut self, source: &mut dyn Source, sink: &mut dyn Sink) -> GrepResult<u64> {
        self.total_matched = 0;
        self.reset_batch_state();
        let passthrough = self.patterns.is_passthrough_eligible() && !sink.is_highlighting();
        let nth = self.config.nth_match.max(1) as u64;
        let mut current_batch: Option<Option<String>> = None;
        let mut meta_emitted = false;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let (channel, record, stamp) = match source.read() {
                Some(item) => item,
                None => break,
            };

            let batch = source.get_batch();
            if let Some(previous) = &current_batch {
                if *previous != batch {
                    self.reset_batch_state();
                    meta_emitted = false;
                }
            }
            current_batch = Some(batch);

            // Feed the registry schema text the first time a type shows up.
            if self.seen_types.insert(record.type_name.clone()) {
                if let Some(definition) = source.definition(&record.type_name) {
                    self.registry.register_type(&record.type_name, definition);
                }
            }
            let (handle, key) = self.registry.identify(&channel, &record, Instant::now());

            let (id, prior_matches) = {
                let window = self.windows.entry(key.clone()).or_default();
                window.seq += 1;
                window.entries.push_back(WindowEntry {
                    id: window.seq,
                    record: record.clone(),
                    stamp,
                    status: EntryStatus::Pending,
                    handle,
                });
                (window.seq, window.matched)
            };
            self.conditions.register(&key, &record);

            // Condition-only channels feed history and nothing else.
            if self.conditions.is_pure_condition_channel(&channel) {
                self.prune_window(&key);
                continue;
            }

            let processable = source.is_processable(&channel, id, stamp, &record)
                && self.conditions.gate(&channel, &record)?;

            let mut quota_open = processable;
            if let Some(max) = self.config.max_matches {
                if self.total_matched >= max as u64 {
                    quota_open = false;
                }
            }
            if let Some(max) = self.config.max_channel_matches {
                if prior_matches >= max as u64 {
                    quota_open = false;
                }
            }
            if let Some(max) = self.config.max_channels {
                if self.matched_channels.len() >= max && !self.matched_channels.contains(&key) {
                    quota_open = false;
                }
            }

            let verdict = if quota_open {
                if passthrough {
                    Some(record.clone())
                } else {
                    MatchEngine::evaluate(&record, &self.patterns)
                }
            } else {
                None
            };
            if processable {
                source.notify(verdict.is_some());
            }

            // (id, stamp, record, marked-copy-if-match) in emission order.
            let mut emissions: Vec<(u64, i64, Record, Option<Record>)> = Vec::new();

            if let Some(marked) = verdict {
                self.total_matched += 1;
                self.matched_channels.insert(key.clone());
                let before = self.config.before;
                if let Some(window) = self.windows.get_mut(&key) {
                    window.matched += 1;
                    if (window.matched - 1) % nth == 0 {
                        let last = window.entries.len() - 1;
                        let start = last.saturating_sub(before);
                        for entry in window.entries.iter_mut().take(last).skip(start) {
                            if entry.status == EntryStatus::Pending {
                                entry.status = EntryStatus::Context;
                                emissions.push((entry.id, entry.stamp, entry.record.clone(), None));
                            }
                        }
                        if let Some(entry) = window.entries.back_mut() {
                            entry.status = EntryStatus::Matched;
                        }
                        emissions.push((id, stamp, record, Some(marked)));
                    }
                    // A decimated match stays pending, so it can still be
                    // emitted as leading context of a later match and does
                    // not trigger trailing context of its own.
                }
            } else if self.config.after > 0 {
                if let Some(window) = self.windows.get_mut(&key) {
                    let tail_start = window.entries.len().saturating_sub(self.config.after + 1);
                    let owed = window
                        .entries
                        .iter()
                        .skip(tail_start)
                        .any(|entry| entry.status == EntryStatus::Matched);
                    if owed {
                        if let Some(entry) = window.entries.back_mut() {
                            entry.status = EntryStatus::Context;
                            emissions.push((entry.id, entry.stamp, entry.record.clone(), None));
                        }
                    }
                }
            }

            if !emissions.is_empty() {
                if !meta_emitted {
                    sink.emit_meta();
                    meta_emitted = true;
                }
                for (entry_id, entry_stamp, entry_record, marked) in emissions {
                    sink.emit(&channel, entry_id, entry_stamp, &entry_record, marked.as_ref());
                }
            }

            self.prune_window(&key);

            if self.quotas_satisfied(&source.channels()) && !self.owes_after_context() {
                sink.flush();
                source.close_batch();
            }
        }

        sink.flush();
        source.close();
        sink.close();
        Ok(self.total_matched)
    }

    fn reset_batch_state(&mut self) {
        self.windows.clear();
        self.matched_channels.clear();
        self.seen_types.clear();
        self.conditions.close_batch();
        self.registry.clear();
    }

    fn prune_window(&mut self, key: &ChannelKey) {
        let bound = self.config.before.max(self.config.after) + 1;
        if let Some(window) = self.windows.get_mut(key) {
            while window.entries.len() > bound {
                if let Some(dropped) = window.entries.pop_front() {
                    self.registry.discard(dropped.handle);
                }
            }
        }
    }

    /// Whether the stop-relevant quotas are all used up: the global match
    /// quota, or the per-channel quota reached (or the channel exhausted,
    /// where the source knows its totals) on every channel the batch is
    /// expected to deliver.
    fn quotas_satisfied(&self, channel_totals: &HashMap<String, Option<u64>>) -> bool {
        if let Some(max) = self.config.max_matches {
            if self.total_matched >= max as u64 {
                return true;
            }
        }
        let per_channel = match self.config.max_channel_matches {
            Some(max) => max as u64,
            None => return false,
        };
        if self.total_matched == 0 {
            return false;
        }
        let required = self
            .config
            .max_channels
            .unwrap_or_else(|| channel_totals.len());
        if required == 0 {
            return false;
        }
        let capped = self
            .windows
            .iter()
            .filter(|(key, window)| {
                window.matched >= per_channel
                    || channel_totals
                        .get(&key.channel)
                        .copied()
                        .flatten()
                        .map_or(false, |total| window.seq >= total)
            })
            .count();
        capped >= required
    }

    /// Whether any channel has a match close enough to its window tail that
    /// trailing context records are still expected.
    fn owes_after_context(&self) -> bool {
        let after = self.config.after;
        if after == 0 {
            return false;
        }
        self.windows.values().any(|window| {
            window
                .entries
                .iter()
                .rev()
                .take(after)
                .any(|entry| entry.status == EntryStatus::Matched)
        })
    }
}
