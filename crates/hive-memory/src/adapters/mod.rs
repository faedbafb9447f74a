//! Store adapters.
//!
//! Always-available adapters: in-memory KV, JSON document file, flat L2
//! vector index, graph triple store, and the in-memory vector adapter.
//! Feature-gated backends: sled (`sled-backend`), SQLite
//! (`sqlite-backend`), and the remote Chroma client (`chroma-backend`).
//! Requesting a backend whose feature is disabled surfaces
//! `ADAPTER_UNAVAILABLE` at registry-build time rather than at first use.

pub mod flat;
pub mod graph;
pub mod json;
pub mod memory;
pub mod vector;

#[cfg(feature = "chroma-backend")]
pub mod chroma;
#[cfg(feature = "sled-backend")]
pub mod sled;
#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

use hive_core::{HiveError, HiveResult};

/// Backends that may be compiled out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalBackend {
    Sled,
    Sqlite,
    Chroma,
}

impl OptionalBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sled => "sled",
            Self::Sqlite => "sqlite",
            Self::Chroma => "chroma",
        }
    }

    /// Whether the backend was compiled into this build
    pub fn is_available(&self) -> bool {
        match self {
            Self::Sled => cfg!(feature = "sled-backend"),
            Self::Sqlite => cfg!(feature = "sqlite-backend"),
            Self::Chroma => cfg!(feature = "chroma-backend"),
        }
    }

    /// Fail fast when a registry is configured with a missing backend
    pub fn require(&self) -> HiveResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(HiveError::adapter_unavailable(
                self.name(),
                "backend feature is not enabled in this build",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_backends_fail_fast() {
        for backend in [
            OptionalBackend::Sled,
            OptionalBackend::Sqlite,
            OptionalBackend::Chroma,
        ] {
            if backend.is_available() {
                assert!(backend.require().is_ok());
            } else {
                let err = backend.require().unwrap_err();
                assert_eq!(err.error_code(), "ADAPTER_UNAVAILABLE");
            }
        }
    }
}
