use std::fmt;
use std::time::Duration;
use thiserror::Error;

use cv_core::RequestId;
use cv_storage::StorageError;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request {0} already has a batch in flight")]
    DuplicateRequestId(RequestId),

    #[error("no batch is tracked for request {0}")]
    UnknownRequest(RequestId),

    #[error(transparent)]
    Composed(#[from] ComposedError),

    #[error("item {item} is outside batch {request_id} of {total} items")]
    UnexpectedItem {
        request_id: RequestId,
        item: usize,
        total: usize,
    },

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("job queue is full")]
    QueueFull,

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("batch {request_id} did not complete within {timeout:?}")]
    Timeout {
        request_id: RequestId,
        timeout: Duration,
    },
}

/// Coarse classification of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend already holds this identifier (409 equivalent)
    AlreadyExists,
    NotFound,
    Backend,
    /// The job was dropped before it ran (pool shut down)
    Abandoned,
}

/// Why one item of a batch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub kind: FailureKind,
    pub message: String,
}

impl ItemError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn abandoned() -> Self {
        Self::new(FailureKind::Abandoned, "job abandoned before completion")
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&StorageError> for ItemError {
    fn from(e: &StorageError) -> Self {
        let kind = match e {
            StorageError::AlreadyExists(_) => FailureKind::AlreadyExists,
            StorageError::NotFound(_) => FailureKind::NotFound,
            _ => FailureKind::Backend,
        };
        Self::new(kind, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub kind: FailureKind,
    pub cause: String,
}

/// Every failed item of a finished batch, plus the identifiers that did
/// succeed so partial progress is never lost.
#[derive(Debug, Clone, Error)]
pub struct ComposedError {
    pub request_id: RequestId,
    pub failures: Vec<ItemFailure>,
    pub succeeded: Vec<String>,
    /// Payload per requested position, in request order. `None` for failed
    /// items and for operations that return nothing (upload, delete).
    pub partial: Vec<Option<Vec<u8>>>,
}

impl ComposedError {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.id.as_str()).collect()
    }

    /// True when every failure is of the given kind
    pub fn all(&self, kind: FailureKind) -> bool {
        self.failures.iter().all(|f| f.kind == kind)
    }
}

impl fmt::Display for ComposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} items failed in request {}",
            self.failures.len(),
            self.failures.len() + self.succeeded.len(),
            self.request_id
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.id, failure.cause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composed_error_lists_every_failure() {
        let err = ComposedError {
            request_id: RequestId::new("req-1"),
            failures: vec![
                ItemFailure {
                    id: "aaa".into(),
                    kind: FailureKind::NotFound,
                    cause: "chunk aaa not found".into(),
                },
                ItemFailure {
                    id: "bbb".into(),
                    kind: FailureKind::Backend,
                    cause: "backend error: boom".into(),
                },
            ],
            succeeded: vec!["ccc".into()],
            partial: vec![None, None, None],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 of 3 items failed in request req-1"));
        assert!(text.contains("aaa: chunk aaa not found"));
        assert!(text.contains("bbb: backend error: boom"));
        assert_eq!(err.failed_ids(), vec!["aaa", "bbb"]);
        assert!(!err.all(FailureKind::NotFound));
    }

    #[test]
    fn test_item_error_from_storage_error() {
        let e = ItemError::from(&StorageError::AlreadyExists("x".into()));
        assert_eq!(e.kind, FailureKind::AlreadyExists);
        let e = ItemError::from(&StorageError::Backend("down".into()));
        assert_eq!(e.kind, FailureKind::Backend);
        assert!(e.to_string().contains("down"));
    }
}
