/*!
Search configuration.

One plain struct carrying everything a search run needs: content patterns,
match accounting limits, context window sizes, gating conditions and source
filtering. `Default` gives an unlimited match-everything configuration.
*/

use serde::{Deserialize, Serialize};

/// Configuration for a search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Content patterns, each `[FIELDPATH=]PATTERN`. Empty matches everything.
    pub patterns: Vec<String>,
    /// Treat patterns as literal text instead of regular expressions.
    pub raw: bool,
    /// Match case-sensitively.
    pub case_sensitive: bool,
    /// Select records where no pattern matches.
    pub invert: bool,
    /// Field path globs to limit matching to. Empty means all fields.
    pub select_fields: Vec<String>,
    /// Field path globs to exclude from matching.
    pub noselect_fields: Vec<String>,

    /// Records of leading context to emit per match.
    pub before: usize,
    /// Records of trailing context to emit per match.
    pub after: usize,

    /// Stop after this many matched records in total.
    pub max_matches: Option<usize>,
    /// Stop matching a channel after this many matches on it.
    pub max_channel_matches: Option<usize>,
    /// Stop matching new channels after this many distinct channels matched.
    pub max_channels: Option<usize>,
    /// Emit only every Nth match per channel, starting with the first.
    pub nth_match: usize,

    /// Gating condition expressions; all must hold for a record to match.
    pub conditions: Vec<String>,

    /// Minimum record stamp, nanoseconds since the epoch.
    pub start_time: Option<i64>,
    /// Maximum record stamp, nanoseconds since the epoch.
    pub end_time: Option<i64>,
    /// Minimum per-channel record index, 1-based; negative counts from the
    /// end on sources that know their channel sizes.
    pub start_index: Option<i64>,
    /// Maximum per-channel record index, 1-based or negative from the end.
    pub end_index: Option<i64>,
    /// Read only every Nth record per channel.
    pub nth_record: usize,
    /// Minimum interval between read records per channel, nanoseconds.
    pub min_interval: Option<i64>,
    /// Skip records identical in content to the previous one on the channel.
    pub unique: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            patterns: Vec::new(),
            raw: false,
            case_sensitive: false,
            invert: false,
            select_fields: Vec::new(),
            noselect_fields: Vec::new(),
            before: 0,
            after: 0,
            max_matches: None,
            max_channel_matches: None,
            max_channels: None,
            nth_match: 1,
            conditions: Vec::new(),
            start_time: None,
            end_time: None,
            start_index: None,
            end_index: None,
            nth_record: 1,
            min_interval: None,
            unique: false,
        }
    }
}
