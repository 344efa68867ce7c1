use tokio_util::sync::CancellationToken;

use crate::config::IngestPolicy;
use crate::error::GalleryError;
use crate::service::GalleryService;
use crate::state::data::{Photo, Role};
use crate::storage::StorageStrategy;
use crate::test_utils::{image_file, Harness};

async fn fill_folder(gallery: &mut GalleryService, harness: &Harness, count: usize) -> Vec<Photo> {
    let files = (1..=count).map(|i| image_file(&format!("{i}.png"), 8, 8)).collect();
    let result = gallery
        .ingest(files, harness.folder.id, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.is_complete_success());
    result.succeeded().cloned().collect()
}

#[tokio::test]
async fn test_folder_delete_removes_everything() {
    let harness = Harness::new();
    let mut gallery = harness.service(StorageStrategy::ExternalObject, IngestPolicy::default());
    gallery.refresh().await.unwrap();
    fill_folder(&mut gallery, &harness, 3).await;
    assert_eq!(harness.objects.keys().len(), 3);

    gallery.delete_folder(harness.folder.id).await.unwrap();

    assert!(harness.records.photos().is_empty());
    assert!(harness.objects.keys().is_empty());
    assert!(harness.records.folders().iter().all(|f| f.id != harness.folder.id));
    assert!(gallery.view().folder(harness.folder.id).is_none());
}

#[tokio::test]
async fn test_failed_object_delete_keeps_folder() {
    let harness = Harness::new();
    let mut gallery = harness.service(StorageStrategy::ExternalObject, IngestPolicy::default());
    gallery.refresh().await.unwrap();
    let photos = fill_folder(&mut gallery, &harness, 5).await;

    let stuck = &photos[2];
    harness.objects.fail_delete_of(stuck.payload.object_key().unwrap());

    let err = gallery.delete_folder(harness.folder.id).await.unwrap_err();
    let (folder_id, failures) = match err {
        GalleryError::CascadeDeleteFailure { folder_id, failures } => (folder_id, failures),
        other => panic!("expected a cascade failure, got {other:?}"),
    };
    assert_eq!(folder_id, harness.folder.id);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].photo_id, stuck.id);
    assert_eq!(failures[0].name, "3.png");

    // The folder and the stuck photo survive; the rest is gone
    assert!(harness.records.folders().iter().any(|f| f.id == harness.folder.id));
    let remaining: Vec<_> = harness.records.photos().into_iter().map(|p| p.id).collect();
    assert_eq!(remaining, vec![stuck.id]);
    assert_eq!(harness.objects.keys().len(), 1);

    let view = gallery.view().folder(harness.folder.id).unwrap();
    assert_eq!(view.photo_count(), 1);
    assert_eq!(view.photos[0].id, stuck.id);
}

#[tokio::test]
async fn test_failed_row_delete_keeps_folder() {
    let harness = Harness::new();
    let mut gallery = harness.service(StorageStrategy::InlineBlob, IngestPolicy::default());
    let photos = fill_folder(&mut gallery, &harness, 2).await;
    harness.records.fail_photo_delete(photos[0].id);

    let err = gallery.delete_folder(harness.folder.id).await.unwrap_err();
    assert!(matches!(err, GalleryError::CascadeDeleteFailure { ref failures, .. } if failures.len() == 1));
    assert_eq!(harness.records.photos().len(), 1);
    assert!(harness.records.folders().iter().any(|f| f.id == harness.folder.id));
}

#[tokio::test]
async fn test_inline_cascade_never_touches_objects() {
    let harness = Harness::new();
    let mut gallery = harness.service(StorageStrategy::InlineBlob, IngestPolicy::default());
    fill_folder(&mut gallery, &harness, 2).await;

    gallery.delete_folder(harness.folder.id).await.unwrap();

    assert!(harness.objects.calls().is_empty());
    assert!(harness.records.photos().is_empty());
}

#[tokio::test]
async fn test_empty_folder_delete() {
    let harness = Harness::new();
    let mut gallery = harness.service(StorageStrategy::ExternalObject, IngestPolicy::default());
    gallery.refresh().await.unwrap();

    gallery.delete_folder(harness.folder.id).await.unwrap();
    assert!(gallery.view().folders().is_empty());
}

#[tokio::test]
async fn test_cannot_delete_foreign_folder() {
    let harness = Harness::new();
    let (_, other_folder) = harness.add_user("Bob", Role::User);
    let mut gallery = harness.service(StorageStrategy::ExternalObject, IngestPolicy::default());

    let err = gallery.delete_folder(other_folder.id).await.unwrap_err();
    assert!(matches!(err, GalleryError::Forbidden(_)));
    assert!(harness.records.folders().iter().any(|f| f.id == other_folder.id));
}
