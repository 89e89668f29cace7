//! This contains test scenarios that a given [NodeStore] needs to pass.
//! We use [rstest] and [rstest_reuse] to provide all services we want to test
//! against, and then apply this template to all test functions.

use chrono::{Duration, Utc};
use rstest::*;
use rstest_reuse::{self, *};
use uuid::Uuid;

use super::NodeStore;
use crate::fixtures::file_node;
use crate::nodestore;
use crate::{Error, Node};

/// This produces a template, which will be applied to all individual test functions.
/// See https://github.com/la10736/rstest/issues/130#issuecomment-968864832
#[template]
#[rstest]
#[case::memory(nodestore::from_addr("memory://").await.unwrap())]
#[case::redb(nodestore::from_addr("redb://").await.unwrap())]
pub fn node_stores(#[case] node_store: impl NodeStore) {}

/// Getting a non-existing node returns None.
#[apply(node_stores)]
#[tokio::test]
async fn get_nonexistent(node_store: impl NodeStore) {
    assert!(node_store
        .get(&Uuid::new_v4())
        .await
        .expect("must not fail")
        .is_none());
}

/// Put a node, get it back by id and by name.
#[apply(node_stores)]
#[tokio::test]
async fn put_get(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    let dir = Node::new_directory(root.id, "foo", Utc::now());

    node_store.put(root.clone()).await.expect("must succeed");
    node_store.put(dir.clone()).await.expect("must succeed");

    assert_eq!(Some(root.clone()), node_store.get(&root.id).await.unwrap());
    assert_eq!(
        Some(dir.clone()),
        node_store.get_child(&root.id, "foo").await.unwrap()
    );
    assert!(node_store
        .get_child(&root.id, "bar")
        .await
        .unwrap()
        .is_none());
}

/// Children are listed by name, and the cursor resumes strictly after the
/// given name.
#[apply(node_stores)]
#[tokio::test]
async fn list_children_paginated(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    node_store.put(root.clone()).await.unwrap();

    // A node with another parent must never show up.
    let other = Node::new_root(Utc::now());
    node_store
        .put(Node::new_directory(other.id, "a", Utc::now()))
        .await
        .unwrap();

    for name in ["c", "a", "d", "b"] {
        node_store
            .put(Node::new_directory(root.id, name, Utc::now()))
            .await
            .unwrap();
    }

    let names = |nodes: Vec<Node>| nodes.into_iter().map(|n| n.name).collect::<Vec<_>>();

    let page = node_store.list_children(&root.id, None, 3).await.unwrap();
    assert_eq!(vec!["a", "b", "c"], names(page));

    let page = node_store
        .list_children(&root.id, Some("c"), 3)
        .await
        .unwrap();
    assert_eq!(vec!["d"], names(page));

    let page = node_store
        .list_children(&root.id, Some("d"), 3)
        .await
        .unwrap();
    assert!(page.is_empty());
}

/// Soft-deleted nodes disappear from the children view and show up in the
/// deleted view, until they are hard deleted.
#[apply(node_stores)]
#[tokio::test]
async fn soft_then_hard_delete(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    let mut file = file_node(root.id, "f.txt", 42);
    node_store.put(root.clone()).await.unwrap();
    node_store.put(file.clone()).await.unwrap();

    file.deleted_at = Some(Utc::now());
    node_store.put(file.clone()).await.unwrap();

    assert!(node_store
        .get_child(&root.id, "f.txt")
        .await
        .unwrap()
        .is_none());
    assert!(node_store
        .list_children(&root.id, None, 10)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(vec![file.clone()], node_store.list_deleted(10).await.unwrap());

    // the id lookup still finds it.
    assert_eq!(Some(file.clone()), node_store.get(&file.id).await.unwrap());

    node_store.delete(&file.id).await.unwrap();
    assert!(node_store.list_deleted(10).await.unwrap().is_empty());
    assert!(node_store.get(&file.id).await.unwrap().is_none());

    // deleting twice is fine.
    node_store.delete(&file.id).await.expect("must succeed");
}

/// Renaming and moving a node updates the children view of both parents.
#[apply(node_stores)]
#[tokio::test]
async fn relink(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    let dir = Node::new_directory(root.id, "dir", Utc::now());
    let mut file = file_node(root.id, "old.txt", 1);
    for n in [&root, &dir, &file] {
        node_store.put(n.clone()).await.unwrap();
    }

    file.parent = Some(dir.id);
    file.name = "new.txt".into();
    file.last_modified_at += Duration::seconds(1);
    node_store.put(file.clone()).await.unwrap();

    assert!(node_store
        .get_child(&root.id, "old.txt")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        Some(file),
        node_store.get_child(&dir.id, "new.txt").await.unwrap()
    );
}

/// A new live node may take the name of a soft-deleted sibling, and the
/// deleted one keeps being reachable by id.
#[apply(node_stores)]
#[tokio::test]
async fn reuse_name_of_deleted(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    let mut old = file_node(root.id, "f.txt", 1);
    node_store.put(root.clone()).await.unwrap();
    node_store.put(old.clone()).await.unwrap();

    old.deleted_at = Some(Utc::now());
    node_store.put(old.clone()).await.unwrap();

    let new = file_node(root.id, "f.txt", 2);
    node_store.put(new.clone()).await.unwrap();

    // hard deleting the old one must not drop the new one from the index.
    node_store.delete(&old.id).await.unwrap();
    assert_eq!(
        Some(new),
        node_store.get_child(&root.id, "f.txt").await.unwrap()
    );
}

/// A live node can't take the name of another live sibling, but putting the
/// same node again is fine.
#[apply(node_stores)]
#[tokio::test]
async fn put_rejects_taken_name(node_store: impl NodeStore) {
    let root = Node::new_root(Utc::now());
    let first = file_node(root.id, "f.txt", 1);
    node_store.put(root.clone()).await.unwrap();
    node_store.put(first.clone()).await.unwrap();
    node_store.put(first.clone()).await.expect("same id must succeed");

    let second = file_node(root.id, "f.txt", 2);
    assert_eq!(
        Err(Error::AlreadyExists("f.txt".to_string())),
        node_store.put(second.clone()).await
    );

    // the rejected node was not stored at all.
    assert!(node_store.get(&second.id).await.unwrap().is_none());
    assert_eq!(
        Some(first.clone()),
        node_store.get_child(&root.id, "f.txt").await.unwrap()
    );

    // renaming onto the taken name is rejected as well.
    let mut other = file_node(root.id, "g.txt", 3);
    node_store.put(other.clone()).await.unwrap();
    other.name = "f.txt".into();
    assert_eq!(
        Err(Error::AlreadyExists("f.txt".to_string())),
        node_store.put(other.clone()).await
    );
    assert!(node_store
        .get_child(&root.id, "g.txt")
        .await
        .unwrap()
        .is_some());
}

/// Deltas are applied once per timestamp, and missing nodes yield None.
#[apply(node_stores)]
#[tokio::test]
async fn apply_delta(node_store: impl NodeStore) {
    let created = Utc::now();
    let root = Node::new_root(created);
    node_store.put(root.clone()).await.unwrap();

    let t1 = created + Duration::seconds(1);
    let updated = node_store
        .apply_delta(&root.id, 10, t1)
        .await
        .unwrap()
        .expect("node must exist");
    assert_eq!(10, updated.size);
    assert_eq!(t1, updated.last_modified_at);

    // replaying with the same timestamp is a no-op.
    let replayed = node_store.apply_delta(&root.id, 10, t1).await.unwrap();
    assert_eq!(Some(updated.clone()), replayed);
    assert_eq!(Some(updated), node_store.get(&root.id).await.unwrap());

    assert!(node_store
        .apply_delta(&Uuid::new_v4(), 10, t1)
        .await
        .unwrap()
        .is_none());
}
