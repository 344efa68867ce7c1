//! The gallery façade.
//!
//! [`GalleryService`] resolves the caller through the identity provider, checks
//! ownership, talks to the stores and patches every durable change into the
//! [`GalleryState`] it owns. All mutations take `&mut self`, so the view has a
//! single writer.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, IngestPolicy};
use crate::error::{GalleryError, IngestError, PhotoCleanupFailure, Result, StoreResult};
use crate::ingest::{FileOutcome, IngestResult, Pipeline};
use crate::report::StorageReport;
use crate::session::{IdentityProvider, Session, StoredUserIdentity};
use crate::state::data::{Folder, FolderId, Photo, PhotoId, RawFile, Role, User, UserId};
use crate::state::gallery::{FolderView, GalleryChange, GalleryState, Target};
use crate::state::library::Library;
use crate::state::store::RecordStore;
use crate::storage::{
    with_timeout, ExternalObjectStorage, FsObjectStore, InlineBlobStorage, PhotoSource, PhotoStorage,
    StorageStrategy,
};

/// A user together with everything they own, for the admin user page
#[derive(Debug, Clone)]
pub struct UserDetails {
    pub user: User,
    pub folders: Vec<FolderView>,
}

impl UserDetails {
    pub fn photo_count(&self) -> usize {
        self.folders.iter().map(FolderView::photo_count).sum()
    }

    pub fn used_bytes(&self) -> u64 {
        self.folders.iter().map(FolderView::total_bytes).sum()
    }
}

pub struct GalleryService {
    records: Arc<dyn RecordStore>,
    storage: Arc<dyn PhotoStorage>,
    identity: Arc<dyn IdentityProvider>,
    policy: IngestPolicy,
    capacity_bytes: u64,
    view: GalleryState,
}

/// Trimmed name, or `InvalidName` when nothing is left
fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(GalleryError::InvalidName)
    } else {
        Ok(trimmed.to_string())
    }
}

impl GalleryService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn PhotoStorage>,
        identity: Arc<dyn IdentityProvider>,
        policy: IngestPolicy,
    ) -> Self {
        Self {
            records,
            storage,
            identity,
            policy,
            capacity_bytes: crate::config::StorageConfig::default().capacity_bytes,
            view: GalleryState::new(),
        }
    }

    /// Capacity used as the denominator of the storage report
    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Wire up the SQLite catalog, the configured storage strategy and a
    /// session for `user_id` (none when `None`).
    pub fn from_config(config: &Config, user_id: Option<UserId>) -> Result<Self> {
        let records: Arc<dyn RecordStore> = Arc::new(Library::open(&config.database_path())?);

        let storage: Arc<dyn PhotoStorage> = match config.storage.strategy {
            StorageStrategy::ExternalObject => {
                let objects = FsObjectStore::new(&config.objects_dir(), config.storage.public_base_url.clone())?;
                Arc::new(ExternalObjectStorage::new(Arc::new(objects)))
            }
            StorageStrategy::InlineBlob => Arc::new(InlineBlobStorage),
        };

        tracing::info!(strategy = ?config.storage.strategy, "photo storage selected");

        let identity = Arc::new(StoredUserIdentity::new(records.clone(), user_id));

        Ok(Self::new(records, storage, identity, config.ingest.clone())
            .with_capacity(config.storage.capacity_bytes))
    }

    pub fn view(&self) -> &GalleryState {
        &self.view
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.policy
    }

    pub fn strategy(&self) -> StorageStrategy {
        self.storage.strategy()
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        Ok(with_timeout(self.policy.operation_timeout, operation).await?)
    }

    async fn session(&self) -> Result<Session> {
        self.identity
            .current_session()
            .await?
            .ok_or(GalleryError::AuthenticationRequired)
    }

    async fn require_admin(&self) -> Result<Session> {
        let session = self.session().await?;
        if !session.is_admin() {
            return Err(GalleryError::Forbidden("administrator role required".into()));
        }
        Ok(session)
    }

    async fn authorized_folder(&self, session: &Session, folder_id: FolderId) -> Result<Folder> {
        let folder = self
            .bounded(self.records.get_folder(folder_id))
            .await?
            .ok_or(GalleryError::FolderNotFound(folder_id))?;

        if !session.can_access(folder.owner_id) {
            return Err(GalleryError::Forbidden(format!("folder {} belongs to another user", folder_id)));
        }
        Ok(folder)
    }

    async fn authorized_photo(&self, session: &Session, photo_id: PhotoId) -> Result<Photo> {
        let photo = self
            .bounded(self.records.get_photo(photo_id))
            .await?
            .ok_or(GalleryError::PhotoNotFound(photo_id))?;

        if !session.can_access(photo.owner_id) {
            return Err(GalleryError::Forbidden(format!("photo {} belongs to another user", photo_id)));
        }
        Ok(photo)
    }

    async fn folder_views(&self, owner_id: UserId) -> Result<Vec<FolderView>> {
        let folders = self.bounded(self.records.list_folders(owner_id)).await?;
        let mut views = Vec::with_capacity(folders.len());
        for folder in folders {
            let photos = self.bounded(self.records.list_photos(folder.id)).await?;
            views.push(FolderView::new(folder, photos));
        }
        Ok(views)
    }

    /// Reload the whole view for the session owner
    pub async fn refresh(&mut self) -> Result<&GalleryState> {
        let session = self.session().await?;
        let folders = self.folder_views(session.owner_id).await?;

        tracing::debug!(owner_id = %session.owner_id, folders = folders.len(), "gallery view reloaded");
        self.view.replace(folders);
        Ok(&self.view)
    }

    /// Create an account. Anyone may add plain users; admins can only be added
    /// by an admin, except for the very first account.
    pub async fn register_user(&self, name: &str, email: &str, role: Role) -> Result<User> {
        let name = clean_name(name)?;
        let email = clean_name(email)?;

        if role == Role::Admin {
            let existing = self.bounded(self.records.list_users()).await?;
            if !existing.is_empty() {
                self.require_admin().await?;
            }
        }

        let user = User::new(name, email, role);
        self.bounded(self.records.insert_user(&user)).await?;

        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Create a folder owned by the session user
    pub async fn create_folder(&mut self, name: &str) -> Result<Folder> {
        let session = self.session().await?;
        self.create_folder_for(session.owner_id, name).await
    }

    /// Create a folder for `owner_id`; only admins may create folders for others
    pub async fn create_folder_for(&mut self, owner_id: UserId, name: &str) -> Result<Folder> {
        let session = self.session().await?;
        let name = clean_name(name)?;

        if !session.can_access(owner_id) {
            return Err(GalleryError::Forbidden("cannot create folders for another user".into()));
        }
        if self.bounded(self.records.get_user(owner_id)).await?.is_none() {
            return Err(GalleryError::UserNotFound(owner_id));
        }

        let folder = Folder::new(owner_id, name);
        self.bounded(self.records.insert_folder(&folder)).await?;

        tracing::info!(folder_id = %folder.id, owner_id = %owner_id, "folder created");

        if owner_id == session.owner_id {
            self.view.apply(GalleryChange::FolderCreated(folder.clone()));
        }
        Ok(folder)
    }

    /// Rename in place; photos are untouched
    pub async fn rename_folder(&mut self, folder_id: FolderId, name: &str) -> Result<Folder> {
        let session = self.session().await?;
        let name = clean_name(name)?;
        let mut folder = self.authorized_folder(&session, folder_id).await?;

        let modified_at = Utc::now();
        self.bounded(self.records.rename_folder(folder_id, &name, modified_at))
            .await?;

        tracing::info!(folder_id = %folder_id, name = %name, "folder renamed");

        self.view.apply_rename(Target::Folder(folder_id), name.clone(), modified_at);

        folder.name = name;
        folder.modified_at = modified_at;
        Ok(folder)
    }

    /// Delete a folder together with its photos.
    ///
    /// Every photo loses its stored bytes first and its row second. Photos that
    /// go away leave the view immediately. If any photo could not be removed the
    /// folder is kept and [`GalleryError::CascadeDeleteFailure`] lists them.
    pub async fn delete_folder(&mut self, folder_id: FolderId) -> Result<()> {
        let session = self.session().await?;
        self.authorized_folder(&session, folder_id).await?;

        let photos = self.bounded(self.records.list_photos(folder_id)).await?;
        let mut failures = Vec::new();

        for photo in photos {
            let removed = async {
                with_timeout(
                    self.policy.operation_timeout,
                    self.storage.discard(std::slice::from_ref(&photo.payload)),
                )
                .await?;
                with_timeout(self.policy.operation_timeout, self.records.delete_photos(&[photo.id])).await
            }
            .await;

            match removed {
                Ok(_) => {
                    self.view.apply_delete(Target::Photo(photo.id));
                }
                Err(error) => {
                    tracing::warn!(folder_id = %folder_id, photo_id = %photo.id, error = %error, "could not remove photo");
                    failures.push(PhotoCleanupFailure {
                        photo_id: photo.id,
                        name: photo.name,
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(folder_id = %folder_id, failed = failures.len(), "folder kept after incomplete cascade");
            return Err(GalleryError::CascadeDeleteFailure { folder_id, failures });
        }

        self.bounded(self.records.delete_folder(folder_id)).await?;
        self.view.apply_delete(Target::Folder(folder_id));

        tracing::info!(folder_id = %folder_id, "folder deleted");
        Ok(())
    }

    /// Ingest `files` into a folder, one at a time and in order.
    ///
    /// Session, batch and folder problems fail the whole call before any file is
    /// touched. After that every file gets its own outcome: a failing file never
    /// stops the batch, and files not yet started when `cancel` fires are
    /// reported as cancelled.
    pub async fn ingest(
        &mut self,
        files: Vec<RawFile>,
        folder_id: FolderId,
        cancel: &CancellationToken,
    ) -> Result<IngestResult> {
        let session = self.session().await?;
        if files.is_empty() {
            return Err(GalleryError::EmptyBatch);
        }
        let folder = self.authorized_folder(&session, folder_id).await?;

        tracing::info!(folder_id = %folder_id, files = files.len(), "ingestion started");

        let pipeline = Pipeline::new(self.records.as_ref(), self.storage.as_ref(), &self.policy);
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            let file_name = file.name.clone();

            let result = if cancel.is_cancelled() {
                Err(IngestError::Cancelled {
                    file_name: file_name.clone(),
                })
            } else {
                pipeline.process(file, &folder).await
            };

            match &result {
                Ok(photo) => {
                    self.view.apply_ingested(photo.clone());
                }
                Err(error) => {
                    tracing::warn!(file_name = %file_name, folder_id = %folder_id, class = ?error.class(), "{}", error);
                }
            }

            outcomes.push(FileOutcome { file_name, result });
        }

        let result = IngestResult { outcomes };
        tracing::info!(
            folder_id = %folder_id,
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "ingestion finished"
        );
        Ok(result)
    }

    /// Change the display name; every other field stays as it was
    pub async fn rename_photo(&mut self, photo_id: PhotoId, name: &str) -> Result<Photo> {
        let session = self.session().await?;
        let name = clean_name(name)?;
        let mut photo = self.authorized_photo(&session, photo_id).await?;

        self.bounded(self.records.rename_photo(photo_id, &name)).await?;

        self.view.apply_rename(Target::Photo(photo_id), name.clone(), Utc::now());

        tracing::info!(photo_id = %photo_id, name = %name, "photo renamed");
        photo.name = name;
        Ok(photo)
    }

    pub async fn delete_photo(&mut self, photo_id: PhotoId) -> Result<()> {
        self.delete_photos(&[photo_id]).await.map(|_| ())
    }

    /// Remove the stored bytes of every photo, then their rows.
    /// When the bytes cannot be removed the rows are kept.
    pub async fn delete_photos(&mut self, photo_ids: &[PhotoId]) -> Result<usize> {
        let session = self.session().await?;
        if photo_ids.is_empty() {
            return Ok(0);
        }

        let mut payloads = Vec::with_capacity(photo_ids.len());
        for &photo_id in photo_ids {
            payloads.push(self.authorized_photo(&session, photo_id).await?.payload);
        }

        self.bounded(self.storage.discard(&payloads)).await?;
        let removed = self.bounded(self.records.delete_photos(photo_ids)).await?;

        for &photo_id in photo_ids {
            self.view.apply_delete(Target::Photo(photo_id));
        }

        tracing::info!(removed, "photos deleted");
        Ok(removed)
    }

    /// A URL for external payloads, the decoded bytes for inline ones
    pub async fn resolve_photo(&self, photo_id: PhotoId) -> Result<PhotoSource> {
        let session = self.session().await?;
        let photo = self.authorized_photo(&session, photo_id).await?;
        self.bounded(self.storage.resolve(&photo.payload)).await
    }

    /// The photo record and its stored bytes
    pub async fn fetch_photo(&self, photo_id: PhotoId) -> Result<(Photo, Vec<u8>)> {
        let session = self.session().await?;
        let photo = self.authorized_photo(&session, photo_id).await?;
        let bytes = self.bounded(self.storage.fetch(&photo.payload)).await?;
        Ok((photo, bytes))
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.require_admin().await?;
        self.bounded(self.records.list_users()).await
    }

    /// Promote or demote another account. Admins cannot change their own role.
    pub async fn set_user_role(&self, user_id: UserId, role: Role) -> Result<User> {
        let session = self.require_admin().await?;
        if session.owner_id == user_id {
            return Err(GalleryError::Forbidden("administrators cannot change their own role".into()));
        }

        let mut user = self
            .bounded(self.records.get_user(user_id))
            .await?
            .ok_or(GalleryError::UserNotFound(user_id))?;
        self.bounded(self.records.set_user_role(user_id, role)).await?;

        tracing::info!(user_id = %user_id, from = %user.role, to = %role, "user role changed");
        user.role = role;
        Ok(user)
    }

    /// Remove an account with all of its folders and photos.
    ///
    /// Every folder goes through the [`delete_folder`](Self::delete_folder)
    /// cascade. The first folder that cannot be removed stops the deletion and
    /// its [`GalleryError::CascadeDeleteFailure`] is returned; the user row is
    /// only deleted once no folder is left.
    pub async fn delete_user(&mut self, user_id: UserId) -> Result<()> {
        let session = self.require_admin().await?;
        if session.owner_id == user_id {
            return Err(GalleryError::Forbidden("administrators cannot delete their own account".into()));
        }

        self.bounded(self.records.get_user(user_id))
            .await?
            .ok_or(GalleryError::UserNotFound(user_id))?;

        let folders = self.bounded(self.records.list_folders(user_id)).await?;
        for folder in &folders {
            self.delete_folder(folder.id).await?;
        }
        self.bounded(self.records.delete_user(user_id)).await?;

        tracing::info!(user_id = %user_id, folders = folders.len(), "user deleted");
        Ok(())
    }

    /// A user and their folders; admins may look at anyone, users at themselves
    pub async fn user_details(&self, user_id: UserId) -> Result<UserDetails> {
        let session = self.session().await?;
        if !session.can_access(user_id) {
            return Err(GalleryError::Forbidden("administrator role required".into()));
        }

        let user = self
            .bounded(self.records.get_user(user_id))
            .await?
            .ok_or(GalleryError::UserNotFound(user_id))?;
        let folders = self.folder_views(user_id).await?;

        Ok(UserDetails { user, folders })
    }

    pub async fn storage_report(&self) -> Result<StorageReport> {
        self.require_admin().await?;

        let users = self.bounded(self.records.list_users()).await?;
        let folders = self.bounded(self.records.list_all_folders()).await?;
        let photos = self.bounded(self.records.list_all_photos()).await?;

        Ok(StorageReport::build(&users, &folders, &photos, self.capacity_bytes))
    }
}

impl std::fmt::Debug for GalleryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryService")
            .field("strategy", &self.storage.strategy())
            .field("policy", &self.policy)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("folders", &self.view.folders().len())
            .finish()
    }
}
