//! In-memory gallery view
//!
//! The view mirrors what the active session is browsing: its folders, newest first,
//! each with its photos in upload order. It is never re-fetched implicitly after a
//! write; every durable change is patched in through [`GalleryState::apply`].

use chrono::{DateTime, Utc};

use super::data::{Folder, FolderId, Photo, PhotoId};

/// A folder together with the photos it currently holds
#[derive(Debug, Clone, PartialEq)]
pub struct FolderView {
    pub folder: Folder,
    pub photos: Vec<Photo>,
}

impl FolderView {
    pub fn new(folder: Folder, photos: Vec<Photo>) -> Self {
        Self { folder, photos }
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.photos.iter().map(|p| p.size).sum()
    }
}

/// What a rename or delete applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Folder(FolderId),
    Photo(PhotoId),
}

/// A durable change that the view must reflect
#[derive(Debug, Clone)]
pub enum GalleryChange {
    FolderCreated(Folder),
    PhotoIngested(Photo),
    Renamed {
        target: Target,
        name: String,
        modified_at: DateTime<Utc>,
    },
    Deleted(Target),
}

#[derive(Debug, Default, Clone)]
pub struct GalleryState {
    folders: Vec<FolderView>,
}

impl GalleryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view (initial load or explicit refresh)
    pub fn replace(&mut self, folders: Vec<FolderView>) {
        self.folders = folders;
    }

    pub fn folders(&self) -> &[FolderView] {
        &self.folders
    }

    pub fn folder(&self, id: FolderId) -> Option<&FolderView> {
        self.folders.iter().find(|view| view.folder.id == id)
    }

    pub fn photo(&self, id: PhotoId) -> Option<&Photo> {
        self.folders
            .iter()
            .flat_map(|view| view.photos.iter())
            .find(|photo| photo.id == id)
    }

    pub fn photo_count(&self) -> usize {
        self.folders.iter().map(FolderView::photo_count).sum()
    }

    fn folder_mut(&mut self, id: FolderId) -> Option<&mut FolderView> {
        self.folders.iter_mut().find(|view| view.folder.id == id)
    }

    fn photo_mut(&mut self, id: PhotoId) -> Option<&mut Photo> {
        self.folders
            .iter_mut()
            .flat_map(|view| view.photos.iter_mut())
            .find(|photo| photo.id == id)
    }

    /// The single reconciliation routine. Returns whether the view changed.
    ///
    /// Changes that refer to folders outside the view (e.g. an admin writing into
    /// another user's folder) are ignored, and re-applying a change is a no-op.
    pub fn apply(&mut self, change: GalleryChange) -> bool {
        match change {
            GalleryChange::FolderCreated(folder) => {
                if self.folder(folder.id).is_some() {
                    return false;
                }
                self.folders.insert(0, FolderView::new(folder, Vec::new()));
                true
            }
            GalleryChange::PhotoIngested(photo) => {
                if self.photo(photo.id).is_some() {
                    return false;
                }
                match self.folder_mut(photo.folder_id) {
                    Some(view) => {
                        view.photos.push(photo);
                        true
                    }
                    None => false,
                }
            }
            GalleryChange::Renamed {
                target: Target::Folder(id),
                name,
                modified_at,
            } => match self.folder_mut(id) {
                Some(view) => {
                    view.folder.name = name;
                    view.folder.modified_at = modified_at;
                    true
                }
                None => false,
            },
            GalleryChange::Renamed {
                target: Target::Photo(id),
                name,
                ..
            } => match self.photo_mut(id) {
                Some(photo) => {
                    photo.name = name;
                    true
                }
                None => false,
            },
            GalleryChange::Deleted(Target::Folder(id)) => {
                let before = self.folders.len();
                self.folders.retain(|view| view.folder.id != id);
                self.folders.len() != before
            }
            GalleryChange::Deleted(Target::Photo(id)) => {
                let mut changed = false;
                for view in &mut self.folders {
                    let before = view.photos.len();
                    view.photos.retain(|photo| photo.id != id);
                    changed |= view.photos.len() != before;
                }
                changed
            }
        }
    }

    pub fn apply_ingested(&mut self, photo: Photo) -> bool {
        self.apply(GalleryChange::PhotoIngested(photo))
    }

    pub fn apply_rename(&mut self, target: Target, name: impl Into<String>, modified_at: DateTime<Utc>) -> bool {
        self.apply(GalleryChange::Renamed {
            target,
            name: name.into(),
            modified_at,
        })
    }

    pub fn apply_delete(&mut self, target: Target) -> bool {
        self.apply(GalleryChange::Deleted(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::PhotoPayload;
    use uuid::Uuid;

    fn photo_in(folder: &Folder, name: &str) -> Photo {
        Photo {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: folder.owner_id,
            folder_id: folder.id,
            size: 10,
            mime_type: "image/jpeg".to_string(),
            uploaded_at: Utc::now(),
            payload: PhotoPayload::Inline { data: String::new() },
        }
    }

    fn state_with_folder() -> (GalleryState, Folder) {
        let folder = Folder::new(Uuid::new_v4(), "Vacances");
        let mut state = GalleryState::new();
        assert!(state.apply(GalleryChange::FolderCreated(folder.clone())));
        (state, folder)
    }

    #[test]
    fn test_ingested_photo_increments_count_once() {
        let (mut state, folder) = state_with_folder();
        let photo = photo_in(&folder, "a.jpg");

        assert!(state.apply_ingested(photo.clone()));
        assert!(!state.apply_ingested(photo));
        assert_eq!(state.folder(folder.id).unwrap().photo_count(), 1);
    }

    #[test]
    fn test_photo_for_unknown_folder_is_ignored() {
        let (mut state, _) = state_with_folder();
        let stranger = Folder::new(Uuid::new_v4(), "Other");
        assert!(!state.apply_ingested(photo_in(&stranger, "x.jpg")));
        assert_eq!(state.photo_count(), 0);
    }

    #[test]
    fn test_folder_rename_keeps_photos() {
        let (mut state, folder) = state_with_folder();
        let photo = photo_in(&folder, "a.jpg");
        state.apply_ingested(photo.clone());

        let renamed_at = folder.modified_at + chrono::Duration::seconds(5);
        assert!(state.apply_rename(Target::Folder(folder.id), "Été 2024", renamed_at));

        let view = state.folder(folder.id).unwrap();
        assert_eq!(view.folder.name, "Été 2024");
        assert_eq!(view.folder.modified_at, renamed_at);
        assert_eq!(view.photos, vec![photo]);
    }

    #[test]
    fn test_delete_photo_and_folder() {
        let (mut state, folder) = state_with_folder();
        let photo = photo_in(&folder, "a.jpg");
        state.apply_ingested(photo.clone());

        assert!(state.apply_delete(Target::Photo(photo.id)));
        assert!(!state.apply_delete(Target::Photo(photo.id)));
        assert!(state.apply_delete(Target::Folder(folder.id)));
        assert!(state.folders().is_empty());
    }

    #[test]
    fn test_new_folders_are_listed_first() {
        let (mut state, first) = state_with_folder();
        let second = Folder::new(first.owner_id, "Noël");
        state.apply(GalleryChange::FolderCreated(second.clone()));
        assert_eq!(state.folders()[0].folder.id, second.id);
    }
}
