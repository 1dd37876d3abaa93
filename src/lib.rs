//! S3 ClamAV scanner.
//!
//! Scans objects uploaded to S3 with clamscan and records the verdict as a
//! tag on the object itself.

pub mod config;
pub mod deadline;
pub mod event;
pub mod orchestrator;
pub mod scanner;
pub mod size_guard;
pub mod stager;
pub mod status;
pub mod store;
pub mod tagging;

pub use config::Config;
pub use deadline::ScanDeadline;
pub use event::{ObjectRef, S3Event, S3EventRecord};
pub use orchestrator::{BatchSummary, RecordOutcome, ScanOrchestrator};
pub use scanner::{ClamscanEngine, ScanEngine, ScanError, ScanOutcome};
pub use status::{ScanStatus, DEFAULT_SCAN_TAG_NAME};
pub use store::{ObjectStore, S3Store, StoreError, Tag, TagSet};
