//! Multi-tenant photo gallery.
//!
//! Users own folders, folders hold photos. Photos enter through the ingestion
//! pipeline ([`ingest`]), which validates, downscales and re-encodes every file
//! before it is persisted through the configured [`storage`] strategy and
//! recorded in the SQLite catalog ([`state::library`]). [`service::GalleryService`]
//! ties these together behind a session check and keeps the in-memory gallery
//! view in step with every write.

pub mod config;
pub mod error;
pub mod ingest;
pub mod media;
pub mod report;
pub mod service;
pub mod session;
pub mod state;
pub mod storage;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

pub use config::{Config, IngestPolicy};
pub use error::{GalleryError, IngestError, Result, StoreError};
pub use ingest::{FileOutcome, IngestResult};
pub use report::StorageReport;
pub use service::{GalleryService, UserDetails};
pub use session::{IdentityProvider, Session, StaticIdentity, StoredUserIdentity};
pub use state::{Folder, Photo, PhotoPayload, RawFile, Role, User};
pub use storage::{PhotoSource, StorageStrategy};
