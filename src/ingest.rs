//! Ingestion pipeline: validate → normalize → persist, one file at a time.
//!
//! [`Pipeline::process`] handles a single file and guarantees that a failed file
//! leaves nothing behind. Batch handling, cancellation and reconciliation of the
//! gallery view live in [`GalleryService::ingest`](crate::service::GalleryService::ingest).

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::config::IngestPolicy;
use crate::error::IngestError;
use crate::media::normalize::{NORMALIZED_EXTENSION, NORMALIZED_MIME_TYPE};
use crate::media::{normalize, validate};
use crate::state::data::{Folder, Photo, PhotoId, RawFile};
use crate::state::store::RecordStore;
use crate::storage::{with_timeout, PhotoStorage};

/// Outcome for one input file
#[derive(Debug)]
pub struct FileOutcome {
    pub file_name: String,
    pub result: Result<Photo, IngestError>,
}

/// Per-file outcomes of a batch, in input order
#[derive(Debug, Default)]
pub struct IngestResult {
    pub outcomes: Vec<FileOutcome>,
}

impl IngestResult {
    pub fn succeeded(&self) -> impl Iterator<Item = &Photo> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &IngestError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    pub fn created_ids(&self) -> Vec<PhotoId> {
        self.succeeded().map(|photo| photo.id).collect()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Collision-free key: `owner/folder/<unix-millis>-<random>.<ext>`
pub fn storage_key(folder: &Folder, extension: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();

    format!(
        "{}/{}/{}-{}.{}",
        folder.owner_id,
        folder.id,
        Utc::now().timestamp_millis(),
        suffix,
        extension
    )
}

/// Extension for bytes stored verbatim: from the name, else from the MIME type
fn verbatim_extension(file: &RawFile) -> String {
    file.extension()
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&file.mime_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Processes single files against one record store and one storage strategy
pub struct Pipeline<'a> {
    pub records: &'a dyn RecordStore,
    pub storage: &'a dyn PhotoStorage,
    pub policy: &'a IngestPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(records: &'a dyn RecordStore, storage: &'a dyn PhotoStorage, policy: &'a IngestPolicy) -> Self {
        Self {
            records,
            storage,
            policy,
        }
    }

    /// Turn one raw file into a stored photo inside `folder`.
    ///
    /// The photo belongs to the folder's owner. On error nothing stays behind,
    /// except when removing already uploaded bytes fails too; that case is
    /// reported as [`IngestError::OrphanedObject`].
    pub async fn process(&self, file: RawFile, folder: &Folder) -> Result<Photo, IngestError> {
        // Step 1: Validate before any I/O
        validate(&file, self.policy)?;

        let verbatim_ext = verbatim_extension(&file);
        let RawFile {
            name: file_name,
            mime_type,
            bytes,
        } = file;

        // Step 2: Normalize, or keep the original bytes
        let (bytes, mime_type, extension) = if self.policy.downscale {
            let normalized = normalize(bytes, self.policy.max_edge, self.policy.jpeg_quality)
                .await
                .map_err(|reason| IngestError::NormalizationFailure {
                    file_name: file_name.clone(),
                    reason,
                })?;
            (
                normalized.bytes,
                NORMALIZED_MIME_TYPE.to_string(),
                NORMALIZED_EXTENSION.to_string(),
            )
        } else {
            (bytes, mime_type, verbatim_ext)
        };

        // Step 3: Store the bytes
        let key = storage_key(folder, &extension);
        let timeout = self.policy.operation_timeout;
        let payload = match with_timeout(timeout, self.storage.put(&key, &bytes, &mime_type)).await {
            Ok(payload) => payload,
            Err(write_error) => {
                tracing::warn!(file_name = %file_name, key = %key, error = %write_error, "upload failed; removing partial bytes");

                return match with_timeout(timeout, self.storage.abandon(&key)).await {
                    Ok(()) => Err(IngestError::StorageWriteFailure {
                        file_name,
                        source: write_error,
                    }),
                    Err(cleanup_error) => Err(IngestError::OrphanedObject {
                        file_name,
                        key,
                        cause: write_error,
                        cleanup_error,
                    }),
                };
            }
        };

        let photo = Photo {
            id: Uuid::new_v4(),
            name: file_name.clone(),
            owner_id: folder.owner_id,
            folder_id: folder.id,
            size: bytes.len() as u64,
            mime_type,
            uploaded_at: Utc::now(),
            payload,
        };

        // Step 4: Record the photo, rolling back the stored bytes on failure
        if let Err(insert_error) = with_timeout(timeout, self.records.insert_photo(&photo)).await {
            tracing::warn!(file_name = %file_name, key = %key, error = %insert_error, "photo insert failed; removing stored bytes");

            return match with_timeout(timeout, self.storage.discard(std::slice::from_ref(&photo.payload))).await {
                Ok(()) => Err(IngestError::StorageWriteFailure {
                    file_name,
                    source: insert_error,
                }),
                Err(cleanup_error) => Err(IngestError::OrphanedObject {
                    file_name,
                    key,
                    cause: insert_error,
                    cleanup_error,
                }),
            };
        }

        tracing::info!(
            file_name = %photo.name,
            photo_id = %photo.id,
            folder_id = %folder.id,
            size = photo.size,
            "photo stored"
        );

        Ok(photo)
    }
}
