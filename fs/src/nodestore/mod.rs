use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Node};

mod from_addr;
mod memory;
mod redb;

#[cfg(test)]
mod tests;

pub use self::from_addr::from_addr;
pub use self::memory::MemoryNodeStore;
pub use self::redb::RedbNodeStore;

/// The base trait all NodeStore services need to implement.
///
/// It persists [Node]s and keeps two secondary views consistent with them:
/// the live children of a directory, ordered by name, and the set of
/// soft-deleted nodes waiting for the garbage collector.
///
/// Only the inode engine writes through this trait, other components go
/// through [crate::inodes::Inodes].
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Looks up a node by its id, including soft-deleted ones.
    async fn get(&self, id: &Uuid) -> Result<Option<Node>, Error>;

    /// Looks up the live child named `name` of the directory `parent`.
    async fn get_child(&self, parent: &Uuid, name: &str) -> Result<Option<Node>, Error>;

    /// Returns up to `limit` live children of `parent`, ordered by name,
    /// starting strictly after `start_after` if given.
    async fn list_children(
        &self,
        parent: &Uuid,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error>;

    /// Inserts the node, or replaces the stored node with the same id.
    ///
    /// Fails with [Error::AlreadyExists] if the node is live and another
    /// live node already uses its name below the same parent.
    async fn put(&self, node: Node) -> Result<(), Error>;

    /// Applies a size delta to the node `id` as one atomic update, see
    /// [Node::apply_delta]. Returns the node as stored afterwards, or None
    /// if there is no such node.
    async fn apply_delta(
        &self,
        id: &Uuid,
        size_delta: i64,
        mod_time: DateTime<Utc>,
    ) -> Result<Option<Node>, Error>;

    /// Returns up to `limit` soft-deleted nodes, in a stable order.
    async fn list_deleted(&self, limit: usize) -> Result<Vec<Node>, Error>;

    /// Removes the node for good. Removing an absent node is not an error.
    async fn delete(&self, id: &Uuid) -> Result<(), Error>;
}

#[async_trait]
impl<A> NodeStore for A
where
    A: AsRef<dyn NodeStore> + Send + Sync,
{
    async fn get(&self, id: &Uuid) -> Result<Option<Node>, Error> {
        self.as_ref().get(id).await
    }

    async fn get_child(&self, parent: &Uuid, name: &str) -> Result<Option<Node>, Error> {
        self.as_ref().get_child(parent, name).await
    }

    async fn list_children(
        &self,
        parent: &Uuid,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        self.as_ref().list_children(parent, start_after, limit).await
    }

    async fn put(&self, node: Node) -> Result<(), Error> {
        self.as_ref().put(node).await
    }

    async fn apply_delta(
        &self,
        id: &Uuid,
        size_delta: i64,
        mod_time: DateTime<Utc>,
    ) -> Result<Option<Node>, Error> {
        self.as_ref().apply_delta(id, size_delta, mod_time).await
    }

    async fn list_deleted(&self, limit: usize) -> Result<Vec<Node>, Error> {
        self.as_ref().list_deleted(limit).await
    }

    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        self.as_ref().delete(id).await
    }
}
