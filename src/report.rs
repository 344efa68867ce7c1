//! Aggregate storage usage for the admin view

use serde::Serialize;
use std::collections::HashMap;

use crate::config::GIB;
use crate::state::data::{Folder, Photo, User, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserUsage {
    pub user_id: UserId,
    pub user_name: String,
    pub used_bytes: u64,
    pub photo_count: usize,
    pub folder_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageReport {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub total_users: usize,
    pub total_folders: usize,
    pub total_photos: usize,
    /// Heaviest users first
    pub per_user: Vec<UserUsage>,
}

impl StorageReport {
    pub fn build(users: &[User], folders: &[Folder], photos: &[Photo], capacity_bytes: u64) -> Self {
        let mut folder_counts: HashMap<UserId, usize> = HashMap::new();
        for folder in folders {
            *folder_counts.entry(folder.owner_id).or_default() += 1;
        }

        let mut photo_usage: HashMap<UserId, (u64, usize)> = HashMap::new();
        for photo in photos {
            let entry = photo_usage.entry(photo.owner_id).or_default();
            entry.0 += photo.size;
            entry.1 += 1;
        }

        let mut per_user: Vec<UserUsage> = users
            .iter()
            .map(|user| {
                let (used_bytes, photo_count) = photo_usage.get(&user.id).copied().unwrap_or_default();
                UserUsage {
                    user_id: user.id,
                    user_name: user.name.clone(),
                    used_bytes,
                    photo_count,
                    folder_count: folder_counts.get(&user.id).copied().unwrap_or_default(),
                }
            })
            .collect();
        per_user.sort_by(|a, b| b.used_bytes.cmp(&a.used_bytes).then_with(|| a.user_name.cmp(&b.user_name)));

        Self {
            capacity_bytes,
            used_bytes: photos.iter().map(|p| p.size).sum(),
            total_users: users.len(),
            total_folders: folders.len(),
            total_photos: photos.len(),
            per_user,
        }
    }

    pub fn usage_percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.capacity_bytes as f64 * 100.0
    }
}

/// Human-readable size the way the admin pages show it (GB, or TB from 1000 GB)
pub fn format_size(bytes: u64) -> String {
    let gb = bytes as f64 / GIB as f64;
    if gb >= 1000.0 {
        format!("{:.1} TB", gb / 1000.0)
    } else if gb >= 0.1 {
        format!("{:.1} GB", gb)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
