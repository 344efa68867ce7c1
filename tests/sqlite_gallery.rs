//! End-to-end runs against the SQLite catalog and the filesystem object store.

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use photo_gallery::state::library::SqliteRecordStore;
use photo_gallery::state::store::RecordStore;
use photo_gallery::storage::{ExternalObjectStorage, FsObjectStore, StorageStrategy};
use photo_gallery::{
    Config, GalleryError, GalleryService, IngestError, IngestPolicy, PhotoPayload, PhotoSource, RawFile, Role, Session,
    StaticIdentity,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

#[tokio::test]
async fn test_ingest_export_and_cascade_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let records = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let objects = Arc::new(FsObjectStore::new(&dir.path().join("objects"), None).unwrap());
    let storage = Arc::new(ExternalObjectStorage::new(objects.clone()));

    let setup = GalleryService::new(
        records.clone(),
        storage.clone(),
        Arc::new(StaticIdentity::anonymous()),
        IngestPolicy::default(),
    );
    let alice = setup.register_user("Alice", "alice@example.com", Role::User).await.unwrap();

    let policy = IngestPolicy {
        max_edge: 100,
        ..IngestPolicy::default()
    };
    let mut gallery = GalleryService::new(
        records,
        storage,
        Arc::new(StaticIdentity::signed_in(Session::new(alice.id, Role::User))),
        policy,
    );
    gallery.refresh().await.unwrap();
    let folder = gallery.create_folder("Vacances").await.unwrap();

    let files = vec![
        RawFile::new("wide.png", "image/png", png(250, 100)),
        RawFile::new("notes.txt", "text/plain", b"hello".to_vec()),
        RawFile::new("tiny.png", "image/png", png(20, 30)),
    ];
    let result = gallery.ingest(files, folder.id, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.success_count(), 2);
    assert_eq!(result.failure_count(), 1);
    assert_eq!(gallery.view().folder(folder.id).unwrap().photo_count(), 2);

    // The object is on disk under the folder's prefix and its URL points at it
    let wide = result.succeeded().next().unwrap();
    let PhotoPayload::External { key, url } = &wide.payload else {
        panic!("expected an external payload");
    };
    let path = objects.root().join(key);
    assert!(path.is_file());
    assert!(url.starts_with("file://"));
    assert!(url.ends_with(key.as_str()));
    assert_eq!(gallery.resolve_photo(wide.id).await.unwrap(), PhotoSource::Url(url.clone()));

    let (_, bytes) = gallery.fetch_photo(wide.id).await.unwrap();
    assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (100, 40));

    // A reload shows the same gallery the incremental updates produced
    let incremental = gallery.view().clone();
    gallery.refresh().await.unwrap();
    assert_eq!(
        gallery.view().folder(folder.id).unwrap().photos.len(),
        incremental.folder(folder.id).unwrap().photos.len()
    );

    gallery.delete_folder(folder.id).await.unwrap();
    assert!(!path.exists());
    assert!(gallery.view().folders().is_empty());
    gallery.refresh().await.unwrap();
    assert!(gallery.view().folders().is_empty());
}

#[tokio::test]
async fn test_configured_inline_gallery_persists_across_opens() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    config.storage.strategy = StorageStrategy::InlineBlob;

    let bootstrap = GalleryService::from_config(&config, None).unwrap();
    let admin = bootstrap
        .register_user("Root", "root@example.com", Role::Admin)
        .await
        .unwrap();
    drop(bootstrap);

    let mut gallery = GalleryService::from_config(&config, Some(admin.id)).unwrap();
    assert_eq!(gallery.strategy(), StorageStrategy::InlineBlob);
    let folder = gallery.create_folder("Archive").await.unwrap();
    let photo_id = gallery
        .ingest(
            vec![RawFile::new("a.png", "image/png", png(10, 10))],
            folder.id,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .created_ids()[0];
    drop(gallery);

    let mut reopened = GalleryService::from_config(&config, Some(admin.id)).unwrap();
    let view = reopened.refresh().await.unwrap();
    let photo = view.photo(photo_id).unwrap().clone();
    assert!(photo.data_url().unwrap().starts_with("data:image/jpeg;base64,"));
    assert!(matches!(reopened.resolve_photo(photo_id).await.unwrap(), PhotoSource::Bytes(_)));

    let report = reopened.storage_report().await.unwrap();
    assert_eq!(report.total_photos, 1);
    assert_eq!(report.used_bytes, photo.size);

    // Nothing was written to the object store directory
    assert!(!config.objects_dir().exists());

    let unknown = GalleryService::from_config(&config, Some(uuid::Uuid::new_v4())).unwrap();
    assert!(matches!(
        unknown.storage_report().await,
        Err(GalleryError::AuthenticationRequired)
    ));
}

fn files_under(root: &std::path::Path) -> Vec<std::path::PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_writes_leave_nothing_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let records = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let objects = Arc::new(FsObjectStore::new(&dir.path().join("objects"), None).unwrap());
    let storage = Arc::new(ExternalObjectStorage::new(objects.clone()));

    let setup = GalleryService::new(
        records.clone(),
        storage.clone(),
        Arc::new(StaticIdentity::anonymous()),
        IngestPolicy::default(),
    );
    let alice = setup.register_user("Alice", "alice@example.com", Role::User).await.unwrap();
    let session = Session::new(alice.id, Role::User);

    let mut owner = GalleryService::new(
        records.clone(),
        storage.clone(),
        Arc::new(StaticIdentity::signed_in(session)),
        IngestPolicy::default(),
    );
    let folder = owner.create_folder("Big").await.unwrap();

    // Large verbatim files against a deadline shorter than writing them takes
    let policy = IngestPolicy {
        downscale: false,
        max_file_bytes: 64 * 1024 * 1024,
        operation_timeout: Duration::from_millis(20),
        ..IngestPolicy::default()
    };
    let mut gallery = GalleryService::new(
        records.clone(),
        storage,
        Arc::new(StaticIdentity::signed_in(session)),
        policy,
    );

    let files = (0..2u8)
        .map(|i| RawFile::new(format!("big-{i}.png"), "image/png", vec![i; 64 * 1024 * 1024]))
        .collect();
    let result = gallery.ingest(files, folder.id, &CancellationToken::new()).await.unwrap();
    for err in result.failed() {
        assert!(
            matches!(
                err,
                IngestError::StorageWriteFailure { .. } | IngestError::OrphanedObject { .. }
            ),
            "unexpected failure: {err}"
        );
    }

    // Writes still running on the blocking pool remove their own output
    let stored = result.success_count();
    let deadline = Instant::now() + Duration::from_secs(10);
    while files_under(objects.root()).len() != stored && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(files_under(objects.root()).len(), stored);
    assert_eq!(records.list_all_photos().await.unwrap().len(), stored);
}
