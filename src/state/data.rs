//! Shared data structures for the gallery state
//!
//! These structs represent the data model that flows between
//! the record store, the storage strategies, the ingestion pipeline
//! and the in-memory gallery view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::IngestError;

pub type UserId = Uuid;
pub type FolderId = Uuid;
pub type PhotoId = Uuid;

/// Access level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// A registered account. Every folder and photo belongs to exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            role,
            created_at: Utc::now(),
        }
    }
}

/// A named container of photos owned by a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    /// Display name shown in the gallery
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    /// Bumped on rename
    pub modified_at: DateTime<Utc>,
}

impl Folder {
    pub fn new(owner_id: UserId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Where the binary content of a photo lives.
///
/// A deployment writes exactly one of these representations, chosen by
/// the configured storage strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhotoPayload {
    /// Bytes stored in the object store under `key`, addressable at `url`
    External { key: String, url: String },
    /// Bytes stored in the record itself as standard base64
    Inline { data: String },
}

impl PhotoPayload {
    /// Object key for externally stored payloads
    pub fn object_key(&self) -> Option<&str> {
        match self {
            PhotoPayload::External { key, .. } => Some(key),
            PhotoPayload::Inline { .. } => None,
        }
    }
}

/// A single stored photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    /// The user-facing original file name; only the storage key is synthesized
    pub name: String,
    pub owner_id: UserId,
    pub folder_id: FolderId,
    /// Persisted byte count (after normalization, if any)
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub payload: PhotoPayload,
}

impl Photo {
    /// Browser-displayable `data:` URL for inline payloads
    pub fn data_url(&self) -> Option<String> {
        match &self.payload {
            PhotoPayload::Inline { data } => Some(format!("data:{};base64,{}", self.mime_type, data)),
            PhotoPayload::External { .. } => None,
        }
    }
}

/// A file handed to the ingestion pipeline, as selected or dropped by the user
#[derive(Clone, PartialEq, Eq)]
pub struct RawFile {
    /// Original file name (e.g., "IMG_0001.jpg")
    pub name: String,
    /// Declared MIME type (e.g., "image/jpeg")
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    ///
    /// A file over `max_bytes` is rejected from its metadata, before any of it
    /// is read. The pipeline checks the size again on the loaded bytes.
    pub async fn load(path: &Path, max_bytes: u64) -> Result<Self, IngestError> {
        let name = path
            .file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .to_string();

        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(source) => return Err(IngestError::Unreadable { file_name: name, source }),
        };
        if size > max_bytes {
            return Err(IngestError::FileTooLarge {
                file_name: name,
                size,
                limit: max_bytes,
            });
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(source) => return Err(IngestError::Unreadable { file_name: name, source }),
        };
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self::new(name, mime_type, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercased extension of the original file name, if it has one
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

// Payloads can be megabytes; keep them out of logs
impl fmt::Debug for RawFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}
