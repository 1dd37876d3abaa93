//! S3 "object created" notification payloads.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Notification document delivered to the scanner.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Event {
    /// Object records, processed in order.
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

/// One object record of a notification.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    /// Event name, e.g. `ObjectCreated:Put`.
    #[serde(default)]
    pub event_name: Option<String>,

    /// Bucket and object details.
    #[serde(default)]
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Entity {
    #[serde(default)]
    pub bucket: S3Bucket,
    #[serde(default)]
    pub object: S3Object,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Bucket {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Object {
    /// Object key, form-URL encoded.
    #[serde(default)]
    pub key: Option<String>,

    /// Size reported by the notification. Informational only, the size guard
    /// always asks the store.
    #[serde(default)]
    pub size: Option<u64>,
}

/// Error for a record that cannot name an object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("record has no bucket name")]
    MissingBucket,
    #[error("record has no object key")]
    MissingKey,
    #[error("object key `{0}` is not valid UTF-8 after decoding")]
    InvalidKey(String),
}

/// A decoded bucket/key pair addressing one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl S3EventRecord {
    /// Decode the record into an object reference.
    pub fn object_ref(&self) -> Result<ObjectRef, EventError> {
        let bucket = match self.s3.bucket.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(EventError::MissingBucket),
        };

        let encoded = self.s3.object.key.as_deref().unwrap_or_default();
        let key = decode_key(encoded)?;
        if key.is_empty() {
            return Err(EventError::MissingKey);
        }

        Ok(ObjectRef { bucket, key })
    }
}

/// Decode an object key as it appears in S3 notifications.
///
/// Keys are form-URL encoded: `+` stands for a space and everything else is
/// percent-encoded, so `+` must be replaced before percent-decoding.
pub fn decode_key(encoded: &str) -> Result<String, EventError> {
    let spaced = encoded.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|key| key.into_owned())
        .map_err(|_| EventError::InvalidKey(encoded.to_string()))
}
