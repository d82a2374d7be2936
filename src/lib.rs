//! # streamgrep
//!
//! A grep engine for structured, dynamically-typed record streams: searches
//! nested message records arriving from recorded files or live channels for
//! content matching user patterns, emitting matches with optional
//! surrounding context, subject to per-channel quotas and user-defined
//! gating conditions.
//!
//! ## Features
//!
//! - **Structural identity**: a type registry derives channel/type/schema-hash
//!   identity per record, with a content-addressed recursive schema digest
//! - **Tree matching**: compiled content and field-selection rules walk the
//!   record field tree and mark matched spans
//! - **Gating conditions**: a small expression language referencing recent
//!   history of named channels, with wildcard channel references
//! - **Match accounting**: bounded per-channel context windows, before/after
//!   context emission, match quotas and Nth-match decimation
//!
//! ## Quick Start
//!
//! ```rust
//! use streamgrep::{FieldValue, MemorySink, Record, SearchConfig, Searcher, VecSource};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = SearchConfig::default();
//!     config.patterns = vec!["text=hello".to_string()];
//!
//!     let records = vec![
//!         (
//!             "/chat".to_string(),
//!             Record::new("std/String")
//!                 .with_field("text", FieldValue::String("hello world".into())),
//!             0,
//!         ),
//!         (
//!             "/chat".to_string(),
//!             Record::new("std/String")
//!                 .with_field("text", FieldValue::String("goodbye".into())),
//!             1,
//!         ),
//!     ];
//!
//!     let mut searcher = Searcher::new(config)?;
//!     let mut source = VecSource::new(records);
//!     let mut sink = MemorySink::new();
//!     let matched = searcher.search(&mut source, &mut sink)?;
//!     assert_eq!(matched, 1);
//!     Ok(())
//! }
//! ```

pub mod streamgrep;

// Re-export main API at crate root for easy access
pub use streamgrep::{
    ChannelKey, ConditionEvaluator, Emission, FieldValue, GrepError, GrepResult, MatchEngine,
    MatchMarkers, MemorySink, PatternSet, QueueProducer, QueueSource, Record, RegistryHandle,
    SearchConfig, Searcher, Sink, Source, SourceFilter, TypeRegistry, VecSource,
};
