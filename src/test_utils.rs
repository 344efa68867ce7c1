//! In-memory stores and image fixtures for tests.
//!
//! Both stores record every call they receive and can be told to fail
//! specific calls, so pipeline and cascade behaviour can be checked without
//! SQLite or a filesystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::IngestPolicy;
use crate::error::{StoreError, StoreResult};
use crate::service::GalleryService;
use crate::session::{Session, StaticIdentity};
use crate::state::data::{Folder, FolderId, Photo, PhotoId, RawFile, Role, User, UserId};
use crate::state::store::RecordStore;
use crate::storage::{ExternalObjectStorage, InlineBlobStorage, ObjectStore, PhotoStorage, StorageStrategy};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RecordState {
    users: Vec<User>,
    folders: Vec<Folder>,
    photos: Vec<Photo>,
    calls: Vec<String>,
    fail_insert_names: HashSet<String>,
    fail_delete_ids: HashSet<PhotoId>,
}

/// A [`RecordStore`] over plain vectors. Like the SQLite catalog it refuses to
/// delete folders that still hold photos and to insert photos into unknown folders.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<RecordState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert directly, without logging a call
    pub fn seed_user(&self, user: &User) {
        lock(&self.state).users.push(user.clone());
    }

    pub fn seed_folder(&self, folder: &Folder) {
        lock(&self.state).folders.push(folder.clone());
    }

    /// Make `insert_photo` fail for photos with this name
    pub fn fail_photo_insert(&self, name: &str) {
        lock(&self.state).fail_insert_names.insert(name.to_string());
    }

    /// Make `delete_photos` fail whenever this id is part of the batch
    pub fn fail_photo_delete(&self, id: PhotoId) {
        lock(&self.state).fail_delete_ids.insert(id);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn photos(&self) -> Vec<Photo> {
        lock(&self.state).photos.clone()
    }

    pub fn folders(&self) -> Vec<Folder> {
        lock(&self.state).folders.clone()
    }

    pub fn users(&self) -> Vec<User> {
        lock(&self.state).users.clone()
    }

    fn record(&self, call: &str) -> MutexGuard<'_, RecordState> {
        let mut state = lock(&self.state);
        state.calls.push(call.to_string());
        state
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.record("insert_user");
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Backend(format!("email {} already registered", user.email)));
        }
        state.users.push(user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let state = self.record("get_user");
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.record("list_users").users.clone())
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> StoreResult<()> {
        let mut state = self.record("set_user_role");
        let user = state.users.iter_mut().find(|u| u.id == id).ok_or(StoreError::NotFound)?;
        user.role = role;
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let mut state = self.record("delete_user");
        if state.folders.iter().any(|f| f.owner_id == id) || state.photos.iter().any(|p| p.owner_id == id) {
            return Err(StoreError::Backend("FOREIGN KEY constraint failed".into()));
        }
        let before = state.users.len();
        state.users.retain(|u| u.id != id);
        if state.users.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_folder(&self, folder: &Folder) -> StoreResult<()> {
        self.record("insert_folder").folders.push(folder.clone());
        Ok(())
    }

    async fn get_folder(&self, id: FolderId) -> StoreResult<Option<Folder>> {
        let state = self.record("get_folder");
        Ok(state.folders.iter().find(|f| f.id == id).cloned())
    }

    async fn list_folders(&self, owner_id: UserId) -> StoreResult<Vec<Folder>> {
        let state = self.record("list_folders");
        let mut folders: Vec<Folder> = state.folders.iter().filter(|f| f.owner_id == owner_id).cloned().collect();
        folders.reverse();
        Ok(folders)
    }

    async fn list_all_folders(&self) -> StoreResult<Vec<Folder>> {
        Ok(self.record("list_all_folders").folders.clone())
    }

    async fn rename_folder(&self, id: FolderId, name: &str, modified_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.record("rename_folder");
        let folder = state.folders.iter_mut().find(|f| f.id == id).ok_or(StoreError::NotFound)?;
        folder.name = name.to_string();
        folder.modified_at = modified_at;
        Ok(())
    }

    async fn delete_folder(&self, id: FolderId) -> StoreResult<()> {
        let mut state = self.record("delete_folder");
        if state.photos.iter().any(|p| p.folder_id == id) {
            return Err(StoreError::Backend("FOREIGN KEY constraint failed".into()));
        }
        let before = state.folders.len();
        state.folders.retain(|f| f.id != id);
        if state.folders.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_photo(&self, photo: &Photo) -> StoreResult<()> {
        let mut state = self.record("insert_photo");
        if state.fail_insert_names.contains(&photo.name) {
            return Err(StoreError::Backend(format!("injected insert failure for {}", photo.name)));
        }
        if !state.folders.iter().any(|f| f.id == photo.folder_id) {
            return Err(StoreError::Backend("FOREIGN KEY constraint failed".into()));
        }
        state.photos.push(photo.clone());
        Ok(())
    }

    async fn get_photo(&self, id: PhotoId) -> StoreResult<Option<Photo>> {
        let state = self.record("get_photo");
        Ok(state.photos.iter().find(|p| p.id == id).cloned())
    }

    async fn list_photos(&self, folder_id: FolderId) -> StoreResult<Vec<Photo>> {
        let state = self.record("list_photos");
        Ok(state.photos.iter().filter(|p| p.folder_id == folder_id).cloned().collect())
    }

    async fn list_all_photos(&self) -> StoreResult<Vec<Photo>> {
        Ok(self.record("list_all_photos").photos.clone())
    }

    async fn rename_photo(&self, id: PhotoId, name: &str) -> StoreResult<()> {
        let mut state = self.record("rename_photo");
        let photo = state.photos.iter_mut().find(|p| p.id == id).ok_or(StoreError::NotFound)?;
        photo.name = name.to_string();
        Ok(())
    }

    async fn delete_photos(&self, ids: &[PhotoId]) -> StoreResult<usize> {
        let mut state = self.record("delete_photos");
        if ids.iter().any(|id| state.fail_delete_ids.contains(id)) {
            return Err(StoreError::Backend("injected delete failure".into()));
        }
        let before = state.photos.len();
        state.photos.retain(|p| !ids.contains(&p.id));
        Ok(before - state.photos.len())
    }
}

#[derive(Default)]
struct ObjectState {
    objects: BTreeMap<String, (Vec<u8>, String)>,
    calls: Vec<String>,
    puts: usize,
    fail_put_on: HashSet<usize>,
    fail_after_write_on: HashSet<usize>,
    fail_delete_keys: HashSet<String>,
    fail_every_delete: bool,
    put_delay: Option<Duration>,
}

/// An [`ObjectStore`] over a map, handing out `mem://objects/<key>` URLs
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<ObjectState>,
}

impl MemoryObjectStore {
    pub const BASE_URL: &'static str = "mem://objects/";

    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` call to `put_object` (1-based)
    pub fn fail_put_on_call(&self, nth: usize) {
        lock(&self.state).fail_put_on.insert(nth);
    }

    /// Fail any `delete_objects` call that includes `key`
    pub fn fail_delete_of(&self, key: &str) {
        lock(&self.state).fail_delete_keys.insert(key.to_string());
    }

    /// Fail every `delete_objects` call
    pub fn fail_deletes(&self) {
        lock(&self.state).fail_every_delete = true;
    }

    /// Store the object on the `nth` call to `put_object`, then fail it anyway
    pub fn fail_put_after_write_on_call(&self, nth: usize) {
        lock(&self.state).fail_after_write_on.insert(nth);
    }

    /// Sleep this long inside every `put_object`, after the object is stored
    pub fn delay_puts(&self, delay: Duration) {
        lock(&self.state).put_delay = Some(delay);
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.state).objects.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        lock(&self.state).objects.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<String> {
        let (delay, fail_after_write) = {
            let mut state = lock(&self.state);
            state.calls.push(format!("put_object:{key}"));
            state.puts += 1;
            if state.fail_put_on.contains(&state.puts) {
                return Err(StoreError::Backend(format!("injected upload failure for {key}")));
            }
            if state.objects.contains_key(key) {
                return Err(StoreError::Backend(format!("object {key} already exists")));
            }
            state.objects.insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
            (state.put_delay, state.fail_after_write_on.contains(&state.puts))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail_after_write {
            return Err(StoreError::Backend(format!("injected failure after writing {key}")));
        }
        Ok(format!("{}{}", Self::BASE_URL, key))
    }

    async fn delete_objects(&self, keys: &[String]) -> StoreResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(format!("delete_objects:{}", keys.join(",")));
        if state.fail_every_delete {
            return Err(StoreError::Backend("injected delete failure".into()));
        }
        if let Some(key) = keys.iter().find(|k| state.fail_delete_keys.contains(*k)) {
            return Err(StoreError::Backend(format!("injected delete failure for {key}")));
        }
        for key in keys {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Vec<u8>> {
        let mut state = lock(&self.state);
        state.calls.push(format!("get_object:{key}"));
        state
            .objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or(StoreError::NotFound)
    }
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), format)
        .expect("fixture image encodes");
    buffer
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

/// A PNG upload named `name`
pub fn image_file(name: &str, width: u32, height: u32) -> RawFile {
    RawFile::new(name, "image/png", png_bytes(width, height))
}

pub fn text_file(name: &str) -> RawFile {
    RawFile::new(name, "text/plain", b"just some notes".to_vec())
}

/// Memory stores seeded with one user who owns one folder
pub struct Harness {
    pub records: Arc<MemoryRecordStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub user: User,
    pub folder: Folder,
}

impl Harness {
    pub fn new() -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let user = User::new("Alice", "alice@example.com", Role::User);
        let folder = Folder::new(user.id, "Vacances");
        records.seed_user(&user);
        records.seed_folder(&folder);

        Self {
            records,
            objects: Arc::new(MemoryObjectStore::new()),
            user,
            folder,
        }
    }

    /// Another account with one folder of its own
    pub fn add_user(&self, name: &str, role: Role) -> (User, Folder) {
        let user = User::new(name, format!("{}@example.com", name.to_lowercase()), role);
        let folder = Folder::new(user.id, format!("{name}'s folder"));
        self.records.seed_user(&user);
        self.records.seed_folder(&folder);
        (user, folder)
    }

    pub fn session(&self) -> Session {
        Session::new(self.user.id, self.user.role)
    }

    pub fn storage(&self, strategy: StorageStrategy) -> Arc<dyn PhotoStorage> {
        match strategy {
            StorageStrategy::ExternalObject => Arc::new(ExternalObjectStorage::new(self.objects.clone())),
            StorageStrategy::InlineBlob => Arc::new(InlineBlobStorage),
        }
    }

    /// A service signed in as the seeded user
    pub fn service(&self, strategy: StorageStrategy, policy: IngestPolicy) -> GalleryService {
        self.service_as(Some(self.session()), strategy, policy)
    }

    pub fn service_as(&self, session: Option<Session>, strategy: StorageStrategy, policy: IngestPolicy) -> GalleryService {
        GalleryService::new(
            self.records.clone(),
            self.storage(strategy),
            Arc::new(StaticIdentity(session)),
            policy,
        )
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
