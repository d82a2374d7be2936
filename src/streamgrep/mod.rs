pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pattern;
pub mod registry;
pub mod search;
pub mod sink;
pub mod source;

// Re-export the main API types for embedding applications
pub use condition::ConditionEvaluator;
pub use config::SearchConfig;
pub use engine::MatchEngine;
pub use error::{GrepError, GrepResult};
pub use model::{FieldValue, MatchMarkers, Record};
pub use pattern::PatternSet;
pub use registry::{ChannelKey, RegistryHandle, TypeRegistry};
pub use search::Searcher;
pub use sink::{Emission, MemorySink, Sink};
pub use source::{QueueProducer, QueueSource, Source, SourceFilter, VecSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
