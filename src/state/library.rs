use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::data::{Folder, FolderId, Photo, PhotoId, PhotoPayload, Role, User, UserId};
use super::store::RecordStore;
use crate::error::{StoreError, StoreResult};

const USER_COLUMNS: &str = "id, name, email, role, created_at";
const FOLDER_COLUMNS: &str = "id, name, owner_id, created_at, modified_at";
const PHOTO_COLUMNS: &str =
    "id, name, owner_id, folder_id, size, mime_type, uploaded_at, storage_key, url, image_data";

/// The Library manages the SQLite catalog database.
/// It stores users, their folders and the metadata (or inline payload) of every photo.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

/// The SQLite-backed [`RecordStore`]
pub type SqliteRecordStore = Library;

impl Library {
    /// Open (or create) the catalog at `db_path` and initialize the schema.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        tracing::info!(path = %db_path.display(), "catalog database opened");

        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    /// A private in-memory catalog, used by tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> StoreResult<Self> {
        init_schema(&conn)?;
        Ok(Library {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Get the path to the database file (`None` for in-memory catalogs)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run `f` against the connection.
    ///
    /// There is no await point once the lock is held, so a caller's timeout
    /// either fires before a statement starts or not at all. On a multi-threaded
    /// runtime the worker hands its other tasks off while SQLite blocks.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send,
    {
        let mut conn = self.conn.lock().await;
        run_blocking(|| f(&mut conn))
    }
}

fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Initialize the database schema.
/// Creates all necessary tables and indexes if they don't exist.
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    // Containment (user -> folder -> photo) is enforced by the store itself
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            email           TEXT NOT NULL UNIQUE,
            role            TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
            created_at      INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS folders (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            owner_id        TEXT NOT NULL REFERENCES users(id),
            created_at      INTEGER NOT NULL,
            modified_at     INTEGER NOT NULL
        )",
        [],
    )?;

    // A photo carries either an external object reference or an inline payload, never both
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photos (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            owner_id        TEXT NOT NULL REFERENCES users(id),
            folder_id       TEXT NOT NULL REFERENCES folders(id),
            size            INTEGER NOT NULL,
            mime_type       TEXT NOT NULL,
            uploaded_at     INTEGER NOT NULL,
            storage_key     TEXT,
            url             TEXT,
            image_data      TEXT,
            CHECK (
                (storage_key IS NOT NULL AND url IS NOT NULL AND image_data IS NULL)
                OR (storage_key IS NULL AND url IS NULL AND image_data IS NOT NULL)
            )
        )",
        [],
    )?;

    // Create indexes for fast queries
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_folders_owner
         ON folders(owner_id, created_at DESC)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photos_folder
         ON photos(folder_id, uploaded_at)",
        [],
    )?;

    tracing::debug!("catalog schema initialized");

    Ok(())
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn uuid_at(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(index)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(index, e.to_string()))
}

fn timestamp_at(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(index)?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(index, format!("timestamp {millis} out of range")))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: role.parse().map_err(|e| conversion_error(3, e))?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        created_at: timestamp_at(row, 3)?,
        modified_at: timestamp_at(row, 4)?,
    })
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    let storage_key: Option<String> = row.get(7)?;
    let url: Option<String> = row.get(8)?;
    let image_data: Option<String> = row.get(9)?;

    let payload = match (storage_key, url, image_data) {
        (Some(key), Some(url), None) => PhotoPayload::External { key, url },
        (None, None, Some(data)) => PhotoPayload::Inline { data },
        _ => return Err(conversion_error(7, "photo row has no consistent payload".to_string())),
    };

    let size: i64 = row.get(4)?;
    Ok(Photo {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        folder_id: uuid_at(row, 3)?,
        size: size.max(0) as u64,
        mime_type: row.get(5)?,
        uploaded_at: timestamp_at(row, 6)?,
        payload,
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> StoreResult<Vec<T>> {
    let mut items = Vec::new();
    for item in rows {
        items.push(item?);
    }
    Ok(items)
}

fn expect_one(changed: usize) -> StoreResult<()> {
    if changed == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for Library {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id.to_string()],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, rowid DESC"
            ))?;
            let users = collect(stmt.query_map([], user_from_row)?)?;
            Ok(users)
        })
        .await
    }

    async fn set_user_role(&self, id: UserId, role: Role) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![role.as_str(), id.to_string()],
            )?;
            expect_one(changed)
        })
        .await
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        // Refused by the foreign keys while the user still owns folders or photos
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
            expect_one(changed)
        })
        .await
    }

    async fn insert_folder(&self, folder: &Folder) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO folders (id, name, owner_id, created_at, modified_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    folder.id.to_string(),
                    folder.name,
                    folder.owner_id.to_string(),
                    folder.created_at.timestamp_millis(),
                    folder.modified_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_folder(&self, id: FolderId) -> StoreResult<Option<Folder>> {
        self.with_conn(|conn| {
            let folder = conn
                .query_row(
                    &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
                    params![id.to_string()],
                    folder_from_row,
                )
                .optional()?;
            Ok(folder)
        })
        .await
    }

    async fn list_folders(&self, owner_id: UserId) -> StoreResult<Vec<Folder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FOLDER_COLUMNS} FROM folders WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let folders = collect(stmt.query_map(params![owner_id.to_string()], folder_from_row)?)?;
            Ok(folders)
        })
        .await
    }

    async fn list_all_folders(&self) -> StoreResult<Vec<Folder>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FOLDER_COLUMNS} FROM folders ORDER BY created_at DESC, rowid DESC"
            ))?;
            let folders = collect(stmt.query_map([], folder_from_row)?)?;
            Ok(folders)
        })
        .await
    }

    async fn rename_folder(&self, id: FolderId, name: &str, modified_at: DateTime<Utc>) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE folders SET name = ?1, modified_at = ?2 WHERE id = ?3",
                params![name, modified_at.timestamp_millis(), id.to_string()],
            )?;
            expect_one(changed)
        })
        .await
    }

    async fn delete_folder(&self, id: FolderId) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM folders WHERE id = ?1", params![id.to_string()])?;
            expect_one(changed)
        })
        .await
    }

    async fn insert_photo(&self, photo: &Photo) -> StoreResult<()> {
        let (storage_key, url, image_data) = match &photo.payload {
            PhotoPayload::External { key, url } => (Some(key.as_str()), Some(url.as_str()), None),
            PhotoPayload::Inline { data } => (None, None, Some(data.as_str())),
        };

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO photos ({PHOTO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    photo.id.to_string(),
                    photo.name,
                    photo.owner_id.to_string(),
                    photo.folder_id.to_string(),
                    photo.size as i64,
                    photo.mime_type,
                    photo.uploaded_at.timestamp_millis(),
                    storage_key,
                    url,
                    image_data,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_photo(&self, id: PhotoId) -> StoreResult<Option<Photo>> {
        self.with_conn(|conn| {
            let photo = conn
                .query_row(
                    &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                    params![id.to_string()],
                    photo_from_row,
                )
                .optional()?;
            Ok(photo)
        })
        .await
    }

    async fn list_photos(&self, folder_id: FolderId) -> StoreResult<Vec<Photo>> {
        self.with_conn(|conn| {
            // rowid breaks ties between photos uploaded within the same millisecond
            let mut stmt = conn.prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE folder_id = ?1 ORDER BY uploaded_at ASC, rowid ASC"
            ))?;
            let photos = collect(stmt.query_map(params![folder_id.to_string()], photo_from_row)?)?;
            Ok(photos)
        })
        .await
    }

    async fn list_all_photos(&self) -> StoreResult<Vec<Photo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos ORDER BY uploaded_at ASC, rowid ASC"
            ))?;
            let photos = collect(stmt.query_map([], photo_from_row)?)?;
            Ok(photos)
        })
        .await
    }

    async fn rename_photo(&self, id: PhotoId, name: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE photos SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )?;
            expect_one(changed)
        })
        .await
    }

    async fn delete_photos(&self, ids: &[PhotoId]) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for id in ids {
                removed += tx.execute("DELETE FROM photos WHERE id = ?1", params![id.to_string()])?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
