//! [`ObjectStore`] backed by Amazon S3.

use super::{ObjectStore, StoreError, Tag, TagSet};
use crate::event::ObjectRef;
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Tag as S3Tag, Tagging};
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// S3 client wrapper.
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential and region chain.
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn object_size(&self, object: &ObjectRef) -> Result<u64, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    StoreError::NotFound(object.clone())
                } else {
                    StoreError::request("HeadObject", object, DisplayErrorContext(&err).to_string())
                }
            })?;

        let length = output.content_length().unwrap_or_default();
        u64::try_from(length).map_err(|_| {
            StoreError::request("HeadObject", object, format!("negative content length {length}"))
        })
    }

    async fn download_to(&self, object: &ObjectRef, dest: &Path) -> Result<u64, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound(object.clone())
                } else {
                    StoreError::request("GetObject", object, DisplayErrorContext(&err).to_string())
                }
            })?;

        let mut body = output.body;
        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|err| StoreError::request("GetObject", object, err.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(
            bucket = %object.bucket,
            key = %object.key,
            bytes = written,
            dest = %dest.display(),
            "Object body downloaded"
        );
        Ok(written)
    }

    async fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, StoreError> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|err| {
                StoreError::request(
                    "GetObjectTagging",
                    object,
                    DisplayErrorContext(&err).to_string(),
                )
            })?;

        Ok(output
            .tag_set()
            .iter()
            .map(|tag| Tag::new(tag.key(), tag.value()))
            .collect())
    }

    async fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), StoreError> {
        let tag_set = tags
            .into_iter()
            .map(|tag| {
                S3Tag::builder()
                    .key(tag.key)
                    .value(tag.value)
                    .build()
                    .map_err(|err| StoreError::InvalidTag(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|err| StoreError::InvalidTag(err.to_string()))?;

        self.client
            .put_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|err| {
                StoreError::request(
                    "PutObjectTagging",
                    object,
                    DisplayErrorContext(&err).to_string(),
                )
            })?;

        Ok(())
    }
}
