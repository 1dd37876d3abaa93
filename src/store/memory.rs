//! In-memory [`ObjectStore`] for tests.

use super::{ObjectStore, StoreError, Tag, TagSet};
use crate::event::ObjectRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct StoredObject {
    body: Vec<u8>,
    /// Size reported by `object_size` instead of `body.len()`.
    reported_size: Option<u64>,
    tags: TagSet,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectRef, StoredObject>,
    downloads: usize,
    tag_writes: Vec<(ObjectRef, TagSet)>,
    fail_downloads: bool,
    fail_tag_writes: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, object: &ObjectRef, body: &[u8], tags: TagSet) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            object.clone(),
            StoredObject {
                body: body.to_vec(),
                reported_size: None,
                tags,
            },
        );
    }

    /// Insert an object whose metadata claims `size` bytes without holding them.
    pub(crate) fn insert_sized(&self, object: &ObjectRef, size: u64, tags: TagSet) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(
            object.clone(),
            StoredObject {
                body: Vec::new(),
                reported_size: Some(size),
                tags,
            },
        );
    }

    pub(crate) fn tags(&self, object: &ObjectRef) -> TagSet {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(object)
            .map(|o| o.tags.clone())
            .unwrap_or_default()
    }

    pub(crate) fn tag_value(&self, object: &ObjectRef, key: &str) -> Option<String> {
        self.tags(object)
            .into_iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value)
    }

    pub(crate) fn downloads(&self) -> usize {
        self.inner.lock().unwrap().downloads
    }

    /// Every tag set written, in order.
    pub(crate) fn tag_writes(&self) -> Vec<(ObjectRef, TagSet)> {
        self.inner.lock().unwrap().tag_writes.clone()
    }

    pub(crate) fn fail_downloads(&self) {
        self.inner.lock().unwrap().fail_downloads = true;
    }

    pub(crate) fn fail_tag_writes(&self) {
        self.inner.lock().unwrap().fail_tag_writes = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn object_size(&self, object: &ObjectRef) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        let stored = inner
            .objects
            .get(object)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        Ok(stored.reported_size.unwrap_or(stored.body.len() as u64))
    }

    async fn download_to(&self, object: &ObjectRef, dest: &Path) -> Result<u64, StoreError> {
        let body = {
            let mut inner = self.inner.lock().unwrap();
            inner.downloads += 1;
            if inner.fail_downloads {
                // Leave a partial file behind like an interrupted transfer would.
                std::fs::write(dest, b"partial")?;
                return Err(StoreError::request("GetObject", object, "connection reset"));
            }
            inner
                .objects
                .get(object)
                .ok_or_else(|| StoreError::NotFound(object.clone()))?
                .body
                .clone()
        };
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(object)
            .map(|o| o.tags.clone())
            .ok_or_else(|| StoreError::NotFound(object.clone()))
    }

    async fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_tag_writes {
            return Err(StoreError::request(
                "PutObjectTagging",
                object,
                "access denied",
            ));
        }
        let stored = inner
            .objects
            .get_mut(object)
            .ok_or_else(|| StoreError::NotFound(object.clone()))?;
        stored.tags = tags.clone();
        inner.tag_writes.push((object.clone(), tags));
        Ok(())
    }
}

pub(crate) fn tag(key: &str, value: &str) -> Tag {
    Tag::new(key, value)
}
