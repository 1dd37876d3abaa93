//! Rejects objects above the size ceiling before anything is downloaded.

use crate::event::ObjectRef;
use crate::store::{ObjectStore, StoreError};
use tracing::warn;

/// Result of comparing an object's size to the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCheck {
    /// Object may be scanned.
    WithinLimit(u64),
    /// Object is larger than the ceiling.
    Exceeded(u64),
}

/// Checks object metadata against a byte ceiling.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    max_bytes: u64,
}

impl SizeGuard {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fetch the object's size and compare it to the ceiling.
    ///
    /// An object exactly at the ceiling is scanned. Metadata failures are
    /// returned to the caller, which abandons the record without a verdict.
    pub async fn check<S>(&self, store: &S, object: &ObjectRef) -> Result<SizeCheck, StoreError>
    where
        S: ObjectStore + ?Sized,
    {
        let size = store.object_size(object).await?;
        if size > self.max_bytes {
            warn!(
                bucket = %object.bucket,
                key = %object.key,
                size,
                max_bytes = self.max_bytes,
                "Object exceeds maximum scan size, skipping scan"
            );
            return Ok(SizeCheck::Exceeded(size));
        }
        Ok(SizeCheck::WithinLimit(size))
    }
}
