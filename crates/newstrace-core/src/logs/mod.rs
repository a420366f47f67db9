//! Log pipeline: collection, aggregation, storage, and analysis

mod aggregator;
mod analyzer;
mod collector;
mod storage;

pub use aggregator::{FlushStrategy, LogAggregator, MemoryBackend, StorageBackend};
pub use analyzer::LogAnalyzer;
pub use collector::{ConsoleHandler, FileHandler, LogCollector, LogHandler, MemoryLogHandler};
pub use storage::LogStorage;
