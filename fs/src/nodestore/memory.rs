use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::NodeStore;
use crate::{Error, Node};

#[derive(Clone, Default)]
pub struct MemoryNodeStore {
    db: Arc<RwLock<HashMap<Uuid, Node>>>,
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    #[instrument(skip(self), fields(node.id = %id))]
    async fn get(&self, id: &Uuid) -> Result<Option<Node>, Error> {
        Ok(self.db.read().get(id).cloned())
    }

    #[instrument(skip(self), fields(node.parent = %parent))]
    async fn get_child(&self, parent: &Uuid, name: &str) -> Result<Option<Node>, Error> {
        let db = self.db.read();
        Ok(db
            .values()
            .find(|n| !n.is_deleted() && n.parent.as_ref() == Some(parent) && n.name == name)
            .cloned())
    }

    #[instrument(skip(self), fields(node.parent = %parent))]
    async fn list_children(
        &self,
        parent: &Uuid,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        let db = self.db.read();
        let mut children: Vec<Node> = db
            .values()
            .filter(|n| !n.is_deleted() && n.parent.as_ref() == Some(parent))
            .filter(|n| start_after.map_or(true, |after| n.name.as_str() > after))
            .cloned()
            .collect();

        children.sort_by(|a, b| a.name.cmp(&b.name));
        children.truncate(limit);

        Ok(children)
    }

    #[instrument(skip(self, node), fields(node.id = %node.id, node.name = %node.name))]
    async fn put(&self, node: Node) -> Result<(), Error> {
        let mut db = self.db.write();

        if let Some(parent) = node.parent.filter(|_| !node.is_deleted()) {
            let taken = db.values().any(|n| {
                n.id != node.id
                    && !n.is_deleted()
                    && n.parent == Some(parent)
                    && n.name == node.name
            });
            if taken {
                return Err(Error::AlreadyExists(node.name));
            }
        }

        db.insert(node.id, node);
        Ok(())
    }

    #[instrument(skip(self), fields(node.id = %id))]
    async fn apply_delta(
        &self,
        id: &Uuid,
        size_delta: i64,
        mod_time: DateTime<Utc>,
    ) -> Result<Option<Node>, Error> {
        let mut db = self.db.write();
        Ok(db.get_mut(id).map(|node| {
            node.apply_delta(size_delta, mod_time);
            node.clone()
        }))
    }

    #[instrument(skip(self))]
    async fn list_deleted(&self, limit: usize) -> Result<Vec<Node>, Error> {
        let db = self.db.read();
        let mut deleted: Vec<Node> = db.values().filter(|n| n.is_deleted()).cloned().collect();

        deleted.sort_by_key(|n| n.id);
        deleted.truncate(limit);

        Ok(deleted)
    }

    #[instrument(skip(self), fields(node.id = %id))]
    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        self.db.write().remove(id);
        Ok(())
    }
}
