//! Hive Memory - Multi-adapter memory subsystem
//!
//! Unifies document, key-value, relational, graph, and vector stores
//! behind one coordinator with cross-store transactions (two-phase commit
//! with snapshot fallback), a strategy-driven query router, best-effort
//! redundant fanout for collaboration entities, and a structured error
//! logger.

pub mod adapters;
pub mod coordinator;
#[cfg(feature = "encryption")]
pub mod crypto;
pub mod error_logger;
pub mod router;
pub mod transaction;

pub use adapters::flat::FlatVectorStore;
pub use adapters::graph::{
    Direction, GraphStore, RelationshipInfo, Subgraph, SubgraphEdge, TriplePattern,
};
pub use adapters::json::{JsonFileStore, JsonFileStoreOptions, VersionEntry};
pub use adapters::memory::InMemoryStore;
pub use adapters::vector::VectorMemoryAdapter;
pub use adapters::OptionalBackend;
pub use coordinator::{MemoryCoordinator, MemoryCoordinatorBuilder};
pub use error_logger::{ErrorSummary, MemoryErrorLogger, MemoryErrorRecord};
pub use router::{QueryRouter, QueryStrategy, RouteResponse};
pub use transaction::{OperationLogEntry, OperationPhase, TransactionContext};

#[cfg(feature = "chroma-backend")]
pub use adapters::chroma::ChromaVectorStore;
#[cfg(feature = "sled-backend")]
pub use adapters::sled::SledStore;
#[cfg(feature = "sqlite-backend")]
pub use adapters::sqlite::SqliteStore;
