//! Structured logging for memory adapter failures.
//!
//! Keeps a bounded ring buffer of recent error records (oldest evicted)
//! and optionally persists one JSON file per error under a log directory.
//! One record is captured per final outcome; retries of the same call do
//! not flood the log.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hive_core::{to_serializable, HiveError, MemoryMetadata};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Structured representation of a memory operation error
#[derive(Debug, Clone)]
pub struct MemoryErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub adapter_name: String,
    pub error_type: String,
    pub error_code: String,
    pub error_message: String,
    pub context: MemoryMetadata,
}

impl MemoryErrorRecord {
    /// JSON shape used for persistence
    pub fn serialize(&self) -> Value {
        json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "operation": self.operation,
            "adapter_name": self.adapter_name,
            "error_type": self.error_type,
            "error_code": self.error_code,
            "error_message": self.error_message,
            "context": Value::Object(to_serializable(&self.context)),
        })
    }
}

/// Aggregate statistics over the captured errors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub by_adapter: BTreeMap<String, usize>,
    pub by_operation: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
}

/// Capture, persist, and analyse memory adapter errors
pub struct MemoryErrorLogger {
    max_errors: usize,
    errors: Mutex<VecDeque<MemoryErrorRecord>>,
    log_dir: Option<PathBuf>,
}

impl Default for MemoryErrorLogger {
    fn default() -> Self {
        Self::new(100, None)
    }
}

impl MemoryErrorLogger {
    /// `log_dir = None` disables on-disk persistence; the in-memory ring
    /// buffer is always active. Persistence is also suppressed by the
    /// no-file-persistence environment switch.
    pub fn new(max_errors: usize, log_dir: Option<PathBuf>) -> Self {
        let log_dir = if hive_core::env::no_file_persistence() {
            None
        } else {
            log_dir
        };
        if let Some(dir) = &log_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to create error log dir");
            }
        }
        Self {
            max_errors,
            errors: Mutex::new(VecDeque::new()),
            log_dir,
        }
    }

    /// Record a failed memory operation
    pub fn log_error(
        &self,
        operation: &str,
        adapter_name: &str,
        error: &HiveError,
        context: MemoryMetadata,
    ) -> MemoryErrorRecord {
        let record = MemoryErrorRecord {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            adapter_name: adapter_name.to_string(),
            error_type: error.type_name().to_string(),
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
            context,
        };

        {
            let mut errors = self.errors.lock();
            errors.push_back(record.clone());
            while errors.len() > self.max_errors {
                errors.pop_front();
            }
        }

        tracing::error!(
            operation,
            adapter = adapter_name,
            error_type = %record.error_type,
            error = %record.error_message,
            "memory operation failed"
        );

        self.persist(&record);
        record
    }

    fn persist(&self, record: &MemoryErrorRecord) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let filename = format!(
            "memory_error_{}.json",
            record.timestamp.format("%Y%m%d_%H%M%S_%f")
        );
        let path = dir.join(filename);
        let payload = match serde_json::to_vec_pretty(&record.serialize()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize error record");
                return;
            }
        };
        // Persistence failure is non-fatal
        if let Err(e) = std::fs::write(&path, payload) {
            tracing::error!(path = %path.display(), error = %e, "failed to persist error log");
        }
    }

    /// Recent errors, newest first, optionally filtered
    pub fn get_recent_errors(
        &self,
        operation: Option<&str>,
        adapter_name: Option<&str>,
        error_type: Option<&str>,
        limit: usize,
    ) -> Vec<MemoryErrorRecord> {
        let errors = self.errors.lock();
        errors
            .iter()
            .rev()
            .filter(|record| operation.map_or(true, |op| record.operation == op))
            .filter(|record| adapter_name.map_or(true, |name| record.adapter_name == name))
            .filter(|record| error_type.map_or(true, |ty| record.error_type == ty))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Counts by adapter, operation, and error type
    pub fn get_error_summary(&self) -> ErrorSummary {
        let errors = self.errors.lock();
        let mut summary = ErrorSummary {
            total_errors: errors.len(),
            ..Default::default()
        };
        for record in errors.iter() {
            *summary
                .by_adapter
                .entry(record.adapter_name.clone())
                .or_default() += 1;
            *summary
                .by_operation
                .entry(record.operation.clone())
                .or_default() += 1;
            *summary
                .by_error_type
                .entry(record.error_type.clone())
                .or_default() += 1;
        }
        summary
    }

    /// Clear the in-memory ring buffer
    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(max: usize) -> MemoryErrorLogger {
        MemoryErrorLogger::new(max, None)
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let logger = logger(3);
        for i in 0..5 {
            logger.log_error(
                &format!("op{i}"),
                "json",
                &HiveError::memory("x"),
                MemoryMetadata::new(),
            );
        }
        let summary = logger.get_error_summary();
        assert_eq!(summary.total_errors, 3);
        let recent = logger.get_recent_errors(None, None, None, 10);
        assert_eq!(recent[0].operation, "op4");
        assert_eq!(recent[2].operation, "op2");
    }

    #[test]
    fn filters_apply() {
        let logger = logger(10);
        logger.log_error("store", "json", &HiveError::memory("x"), MemoryMetadata::new());
        logger.log_error(
            "retrieve",
            "graph",
            &HiveError::not_found("a"),
            MemoryMetadata::new(),
        );

        assert_eq!(
            logger
                .get_recent_errors(Some("store"), None, None, 10)
                .len(),
            1
        );
        assert_eq!(
            logger
                .get_recent_errors(None, Some("graph"), None, 10)
                .len(),
            1
        );
        assert_eq!(
            logger
                .get_recent_errors(None, None, Some("ItemNotFound"), 10)
                .len(),
            1
        );
        assert!(logger
            .get_recent_errors(Some("store"), Some("graph"), None, 10)
            .is_empty());
    }

    #[test]
    fn summary_counts_by_dimension() {
        let logger = logger(10);
        logger.log_error("store", "json", &HiveError::memory("x"), MemoryMetadata::new());
        logger.log_error("store", "json", &HiveError::memory("y"), MemoryMetadata::new());
        logger.log_error(
            "delete",
            "sled",
            &HiveError::corruption("sled", "bad"),
            MemoryMetadata::new(),
        );

        let summary = logger.get_error_summary();
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.by_adapter["json"], 2);
        assert_eq!(summary.by_operation["store"], 2);
        assert_eq!(summary.by_error_type["Corruption"], 1);
    }

    #[test]
    fn persists_one_file_per_error() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MemoryErrorLogger::new(10, Some(dir.path().to_path_buf()));
        logger.log_error("store", "json", &HiveError::memory("x"), MemoryMetadata::new());
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
