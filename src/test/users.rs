use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IngestPolicy;
use crate::error::GalleryError;
use crate::service::GalleryService;
use crate::session::Session;
use crate::state::data::{Role, User};
use crate::storage::StorageStrategy;
use crate::test_utils::{image_file, Harness};

const EXTERNAL: StorageStrategy = StorageStrategy::ExternalObject;

fn admin_service(harness: &Harness) -> (User, GalleryService) {
    let (admin, _) = harness.add_user("Root", Role::Admin);
    let gallery = harness.service_as(
        Some(Session::new(admin.id, Role::Admin)),
        EXTERNAL,
        IngestPolicy::default(),
    );
    (admin, gallery)
}

#[tokio::test]
async fn test_admin_promotes_and_demotes() {
    let harness = Harness::new();
    let (_, admin) = admin_service(&harness);

    let promoted = admin.set_user_role(harness.user.id, Role::Admin).await.unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert_eq!(promoted.email, harness.user.email);
    let stored = harness.records.users().into_iter().find(|u| u.id == harness.user.id).unwrap();
    assert_eq!(stored.role, Role::Admin);

    let demoted = admin.set_user_role(harness.user.id, Role::User).await.unwrap();
    assert_eq!(demoted.role, Role::User);
}

#[tokio::test]
async fn test_role_changes_are_restricted() {
    let harness = Harness::new();
    let (root, admin) = admin_service(&harness);

    let err = admin.set_user_role(root.id, Role::User).await.unwrap_err();
    assert!(matches!(err, GalleryError::Forbidden(_)));

    let missing = Uuid::new_v4();
    let err = admin.set_user_role(missing, Role::Admin).await.unwrap_err();
    assert!(matches!(err, GalleryError::UserNotFound(id) if id == missing));

    let user = harness.service(EXTERNAL, IngestPolicy::default());
    let err = user.set_user_role(harness.user.id, Role::Admin).await.unwrap_err();
    assert!(matches!(err, GalleryError::Forbidden(_)));
    assert_eq!(harness.records.users().iter().filter(|u| u.role == Role::Admin).count(), 1);
}

#[tokio::test]
async fn test_deleting_a_user_removes_all_their_data() {
    let harness = Harness::new();
    let mut alice = harness.service(EXTERNAL, IngestPolicy::default());
    let second = alice.create_folder("Famille").await.unwrap();
    for folder_id in [harness.folder.id, second.id] {
        let files = vec![image_file("a.png", 8, 8), image_file("b.png", 8, 8)];
        let result = alice.ingest(files, folder_id, &CancellationToken::new()).await.unwrap();
        assert!(result.is_complete_success());
    }

    let (root, mut admin) = admin_service(&harness);
    admin.delete_user(harness.user.id).await.unwrap();

    assert!(harness.records.users().iter().all(|u| u.id != harness.user.id));
    assert!(harness.records.folders().iter().all(|f| f.owner_id != harness.user.id));
    assert!(harness.records.photos().is_empty());
    assert!(harness.objects.keys().is_empty());

    // The admin's own account and folder are untouched
    assert!(harness.records.users().iter().any(|u| u.id == root.id));
    assert!(harness.records.folders().iter().any(|f| f.owner_id == root.id));
}

#[tokio::test]
async fn test_failed_cascade_keeps_the_user() {
    let harness = Harness::new();
    let mut alice = harness.service(EXTERNAL, IngestPolicy::default());
    let result = alice
        .ingest(vec![image_file("stuck.png", 8, 8)], harness.folder.id, &CancellationToken::new())
        .await
        .unwrap();
    let stuck = result.succeeded().next().unwrap().clone();
    harness.objects.fail_delete_of(stuck.payload.object_key().unwrap());

    let (_, mut admin) = admin_service(&harness);
    let err = admin.delete_user(harness.user.id).await.unwrap_err();
    let failures = match err {
        GalleryError::CascadeDeleteFailure { folder_id, failures } => {
            assert_eq!(folder_id, harness.folder.id);
            failures
        }
        other => panic!("expected a cascade failure, got {other:?}"),
    };
    assert_eq!(failures[0].photo_id, stuck.id);

    assert!(harness.records.users().iter().any(|u| u.id == harness.user.id));
    assert!(harness.records.folders().iter().any(|f| f.id == harness.folder.id));
    assert_eq!(harness.records.photos().len(), 1);
}

#[tokio::test]
async fn test_user_deletion_is_restricted() {
    let harness = Harness::new();
    let (root, mut admin) = admin_service(&harness);

    let err = admin.delete_user(root.id).await.unwrap_err();
    assert!(matches!(err, GalleryError::Forbidden(_)));

    let missing = Uuid::new_v4();
    let err = admin.delete_user(missing).await.unwrap_err();
    assert!(matches!(err, GalleryError::UserNotFound(id) if id == missing));

    let mut user = harness.service(EXTERNAL, IngestPolicy::default());
    let err = user.delete_user(root.id).await.unwrap_err();
    assert!(matches!(err, GalleryError::Forbidden(_)));

    assert_eq!(harness.records.users().len(), 2);
    assert!(harness.records.calls().iter().all(|c| c != "delete_user"));
}
