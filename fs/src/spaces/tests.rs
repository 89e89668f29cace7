//! Scenarios every [SpaceService] needs to pass, applied to all backends
//! through an [rstest_reuse] template.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rstest::*;
use rstest_reuse::{self, *};
use tempfile::TempDir;
use uuid::Uuid;

use super::{from_addr, SpaceService};
use crate::inodes::Inodes;
use crate::{nodestore, Error};

#[template]
#[rstest]
#[case::memory("memory://")]
#[case::redb("redb://")]
pub fn space_services(#[case] addr: &str) {}

async fn space_service(addr: &str) -> (Arc<dyn SpaceService>, Inodes) {
    let inodes = Inodes::new(nodestore::from_addr("memory://").await.unwrap());
    (from_addr(addr, inodes.clone()).await.unwrap(), inodes)
}

#[apply(space_services)]
#[tokio::test]
async fn create_builds_root(addr: &str) {
    let (spaces, inodes) = space_service(addr).await;
    let user = Uuid::new_v4();

    let space = spaces.create(&user, "My files", vec![]).await.unwrap();
    assert_eq!(vec![user], space.owners);
    assert!(!space.is_public);

    let root = inodes.get_by_id(&space.root).await.unwrap();
    assert!(root.is_root() && root.is_dir());

    assert_eq!(space, spaces.get(&space.id).await.unwrap());
}

#[apply(space_services)]
#[tokio::test]
async fn user_access(addr: &str) {
    let (spaces, _) = space_service(addr).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let shared = spaces.create(&alice, "Shared", vec![bob]).await.unwrap();
    let private = spaces.create(&alice, "Alice", vec![]).await.unwrap();
    assert!(shared.is_public);

    assert_eq!(
        shared,
        spaces.get_user_space(&bob, &shared.id).await.unwrap()
    );
    assert!(matches!(
        spaces.get_user_space(&bob, &private.id).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        spaces.get_user_space(&bob, &Uuid::new_v4()).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        spaces.get(&Uuid::new_v4()).await,
        Err(Error::NotFound(_))
    ));

    assert_eq!(
        vec![private, shared.clone()],
        spaces.list_user_spaces(&alice).await.unwrap()
    );
    assert_eq!(vec![shared], spaces.list_user_spaces(&bob).await.unwrap());
}

#[apply(space_services)]
#[tokio::test]
async fn invalid_name(addr: &str) {
    let (spaces, _) = space_service(addr).await;
    let user = Uuid::new_v4();

    assert!(matches!(
        spaces.create(&user, "", vec![]).await,
        Err(Error::Invalid(_))
    ));
    assert!(matches!(
        spaces.create(&user, &"x".repeat(31), vec![]).await,
        Err(Error::Invalid(_))
    ));
    assert!(spaces.list_user_spaces(&user).await.unwrap().is_empty());
}

#[apply(space_services)]
#[tokio::test]
async fn get_or_create_reuses(addr: &str) {
    let (spaces, _) = space_service(addr).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let first = spaces.get_or_create(&alice, "My files").await.unwrap();
    assert_eq!(first, spaces.get_or_create(&alice, "My files").await.unwrap());

    // same name, other user.
    let other = spaces.get_or_create(&bob, "My files").await.unwrap();
    assert_ne!(first.id, other.id);
    assert_ne!(first.root, other.root);
}

/// Spaces stored on disk come back, with the same root, once the store is
/// opened again.
#[tokio::test]
async fn redb_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let addr = format!("redb://{}", tmp.path().join("spaces").to_str().unwrap());
    let inodes = Inodes::new(nodestore::from_addr("memory://").await.unwrap());
    let user = Uuid::new_v4();

    let space = {
        let spaces = from_addr(&addr, inodes.clone()).await.unwrap();
        spaces.create(&user, "My files", vec![]).await.unwrap()
    };

    let spaces = from_addr(&addr, inodes).await.unwrap();
    assert_eq!(vec![space.clone()], spaces.list_user_spaces(&user).await.unwrap());
    assert_eq!(space, spaces.get_or_create(&user, "My files").await.unwrap());
}
