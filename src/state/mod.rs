//! State management module
//!
//! This module handles all gallery state, including:
//! - Shared data structures (data.rs)
//! - The record store contract (store.rs)
//! - The SQLite catalog (library.rs)
//! - The in-memory gallery view and its reconciliation routine (gallery.rs)

pub mod data;
pub mod gallery;
pub mod library;
pub mod store;

pub use data::{Folder, FolderId, Photo, PhotoId, PhotoPayload, RawFile, Role, User, UserId};
pub use gallery::{FolderView, GalleryChange, GalleryState, Target};
pub use library::{Library, SqliteRecordStore};
pub use store::RecordStore;
