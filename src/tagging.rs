//! Verdict tag merge.
//!
//! S3 only supports replacing an object's whole tag set, so writing a
//! verdict is a read-modify-write: fetch every tag, replace the verdict tag,
//! put the full set back. There is no compare-and-swap on tag sets. If
//! another writer changes tags between our read and write, the verdict still
//! lands (last write wins) but their change can be lost. That window is
//! accepted.

use crate::event::ObjectRef;
use crate::status::ScanStatus;
use crate::store::{ObjectStore, StoreError, Tag, TagSet};
use tracing::info;

/// Replace the verdict tag in `existing`, keeping every other tag in order.
pub fn merge_verdict(existing: TagSet, tag_name: &str, status: ScanStatus) -> TagSet {
    let mut merged: TagSet = existing
        .into_iter()
        .filter(|tag| tag.key != tag_name)
        .collect();
    merged.push(Tag::new(tag_name, status.as_str()));
    merged
}

/// Writes verdicts onto objects without disturbing their other tags.
#[derive(Debug, Clone)]
pub struct TagMerger {
    tag_name: String,
}

impl TagMerger {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    /// Record `status` on the object.
    pub async fn apply<S>(
        &self,
        store: &S,
        object: &ObjectRef,
        status: ScanStatus,
    ) -> Result<(), StoreError>
    where
        S: ObjectStore + ?Sized,
    {
        let existing = store.get_tags(object).await?;
        let merged = merge_verdict(existing, &self.tag_name, status);

        info!(
            bucket = %object.bucket,
            key = %object.key,
            tag = %self.tag_name,
            status = %status,
            "Updating object tags"
        );
        store.put_tags(object, merged).await
    }
}
