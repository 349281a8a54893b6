//! Go source → documentation chunks → index.
pub mod comments;
pub mod core;
pub mod go_parser;
pub mod source;

pub use self::core::{IndexStats, Indexer};
pub use self::source::{ChunkStream, SourceParser, WalkSummary};
