// Hive Core - Foundation types for the hybrid memory coordination core
//
// This crate provides the shared vocabulary of the workspace: the error
// hierarchy, metrics registry, memory DTOs with normalized metadata, the
// adapter capability traits and registry, and the embedding function handle.

pub mod dto;
pub mod embedding;
pub mod env;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod store;

// Re-export core types
pub use dto::{
    deduplicate_records, embedding_from_metadata, query_results_from_records,
    query_results_from_rows, record_from_row, row_from_record, GroupedMemoryResults, MemoryItem,
    MemoryQueryResults, MemoryRecord, MemoryType, MemoryVector, RowOptions,
};
pub use embedding::{cosine_similarity, euclidean_distance, Embedder};
pub use error::{ErrorKind, HiveError, HiveResult};
pub use metadata::{
    coerce_metadata, dumps, from_serializable, loads, to_serializable, MemoryMetadata,
    MetadataValue,
};
pub use metrics::{MetricsRegistry, RetryOutcome};
pub use store::{
    AdapterEntry, MemoryRegistry, MemoryStore, SearchQuery, SupportsFlush, TransactionalStore,
    VectorStore, VectorStoreStats,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
