use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::data::{Folder, FolderId, Photo, PhotoId, Role, User, UserId};
use crate::error::StoreResult;

/// Durable storage for users, folders and photo metadata.
///
/// Operations that target a single row by id return [`StoreError::NotFound`]
/// when nothing matched.
///
/// [`StoreError::NotFound`]: crate::error::StoreError::NotFound
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn set_user_role(&self, id: UserId, role: Role) -> StoreResult<()>;

    /// Deletes the user row only. Fails while folders or photos still reference it.
    async fn delete_user(&self, id: UserId) -> StoreResult<()>;

    async fn insert_folder(&self, folder: &Folder) -> StoreResult<()>;

    async fn get_folder(&self, id: FolderId) -> StoreResult<Option<Folder>>;

    /// Folders of one owner, newest first
    async fn list_folders(&self, owner_id: UserId) -> StoreResult<Vec<Folder>>;

    async fn list_all_folders(&self) -> StoreResult<Vec<Folder>>;

    async fn rename_folder(&self, id: FolderId, name: &str, modified_at: DateTime<Utc>) -> StoreResult<()>;

    /// Deletes the folder row only. Fails while photos still reference it.
    async fn delete_folder(&self, id: FolderId) -> StoreResult<()>;

    async fn insert_photo(&self, photo: &Photo) -> StoreResult<()>;

    async fn get_photo(&self, id: PhotoId) -> StoreResult<Option<Photo>>;

    /// Photos of one folder in upload order
    async fn list_photos(&self, folder_id: FolderId) -> StoreResult<Vec<Photo>>;

    async fn list_all_photos(&self) -> StoreResult<Vec<Photo>>;

    async fn rename_photo(&self, id: PhotoId, name: &str) -> StoreResult<()>;

    /// Bulk delete by id; returns the number of rows removed
    async fn delete_photos(&self, ids: &[PhotoId]) -> StoreResult<usize>;
}
