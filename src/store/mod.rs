//! Object store operations the scanner depends on.
//!
//! S3 offers no partial tag update, so the trait only exposes whole-set
//! reads and writes. See [`crate::tagging`] for the merge built on top.

use crate::event::ObjectRef;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod memory;
pub mod s3;

pub use s3::S3Store;

/// A single object tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The full tag set of an object.
pub type TagSet = Vec<Tag>;

/// Error from object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object (or its bucket) does not exist.
    #[error("object {0} not found")]
    NotFound(ObjectRef),
    /// The request was rejected or failed in transit.
    #[error("{operation} failed for {object}: {message}")]
    Request {
        operation: &'static str,
        object: ObjectRef,
        message: String,
    },
    /// Writing the downloaded body to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A tag could not be represented in a request.
    #[error("invalid tag: {0}")]
    InvalidTag(String),
}

impl StoreError {
    pub(crate) fn request(
        operation: &'static str,
        object: &ObjectRef,
        message: impl Into<String>,
    ) -> Self {
        StoreError::Request {
            operation,
            object: object.clone(),
            message: message.into(),
        }
    }
}

/// Object store used by the scanner.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Current size of the object in bytes, without fetching its body.
    async fn object_size(&self, object: &ObjectRef) -> Result<u64, StoreError>;

    /// Download the object body to `dest`, creating or truncating it.
    async fn download_to(&self, object: &ObjectRef, dest: &Path) -> Result<u64, StoreError>;

    /// Fetch every tag on the object.
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError>;

    /// Replace the object's whole tag set.
    async fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), StoreError>;
}
