//! The object-store gateway seam.
//!
//! [`ObjectStore`] is the only capability the conversion engine needs from a
//! storage provider: enumerate keys under a prefix, fetch an object's bytes,
//! and store bytes at a key. The trait is synchronous and object-safe so a
//! provider SDK can hide its own runtime behind a blocking call, and so the
//! engine can hold it as `Arc<dyn ObjectStore>`.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Type
// ============================================================================

/// Category of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    NotFound,
    AccessDenied,
    Throttling,
    Network,
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Throttling => "throttled",
            Self::Network => "network error",
            Self::Other => "error",
        };
        f.write_str(name)
    }
}

/// Error returned by every [`ObjectStore`] operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(container: &str, key: &str) -> Self {
        Self::new(
            StoreErrorKind::NotFound,
            format!("object {container}/{key} not found"),
        )
    }

    /// Whether a retry can reasonably succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Throttling | StoreErrorKind::Network
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// ObjectReference
// ============================================================================

/// One enumerated input object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ObjectReference {
    pub container: String,
    pub key: String,
    pub size: u64,
    /// Unix timestamp in seconds, when the provider reports one.
    pub last_modified: Option<i64>,
}

impl ObjectReference {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            size: 0,
            last_modified: None,
        }
    }

    #[must_use]
    pub const fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub const fn with_last_modified(mut self, unix_secs: i64) -> Self {
        self.last_modified = Some(unix_secs);
        self
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

// ============================================================================
// ObjectStore
// ============================================================================

/// Trait for object storage operations
pub trait ObjectStore: Send + Sync {
    /// List every object under `prefix`, with pagination flattened away.
    ///
    /// An empty vector is a valid answer and is distinct from an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the container doesn't exist, permissions are not enough, or the listing fails
    fn list(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectReference>>;

    /// Download an object's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreErrorKind::NotFound`] or [`StoreErrorKind::AccessDenied`] when the object
    /// can't be read, or a transient kind when the transfer fails
    fn get(&self, container: &str, key: &str) -> StoreResult<Bytes>;

    /// Upload bytes, overwriting any existing object at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreErrorKind::AccessDenied`] or a transient [`StoreErrorKind::Throttling`] error
    fn put(&self, container: &str, key: &str, data: &[u8]) -> StoreResult<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn list(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectReference>> {
        (**self).list(container, prefix)
    }

    fn get(&self, container: &str, key: &str) -> StoreResult<Bytes> {
        (**self).get(container, key)
    }

    fn put(&self, container: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        (**self).put(container, key, data)
    }
}
