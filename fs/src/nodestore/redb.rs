use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::ops::Bound;
use std::{path::PathBuf, sync::Arc};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::NodeStore;
use crate::{Error, Node};

/// Every node, soft-deleted ones included, json encoded.
const NODE_TABLE: TableDefinition<u128, Vec<u8>> = TableDefinition::new("node");
/// Live children index: (parent id, name) -> child id.
const CHILDREN_TABLE: TableDefinition<(u128, &str), u128> = TableDefinition::new("children");
/// Soft-deleted nodes waiting for the garbage collector.
const DELETED_TABLE: TableDefinition<u128, ()> = TableDefinition::new("deleted");

#[derive(Clone)]
pub struct RedbNodeStore {
    // We wrap the db in an Arc to be able to move it into spawn_blocking,
    // as discussed in https://github.com/cberner/redb/issues/789
    db: Arc<Database>,
}

impl RedbNodeStore {
    /// Constructs a new instance using the specified filesystem path for
    /// storage.
    pub async fn new(path: PathBuf) -> Result<Self, Error> {
        if path == PathBuf::from("/") {
            return Err(Error::StorageError(
                "cowardly refusing to open / with redb".to_string(),
            ));
        }

        let db = tokio::task::spawn_blocking(|| -> Result<_, redb::Error> {
            let db = redb::Database::create(path)?;
            create_schema(&db)?;
            Ok(db)
        })
        .await??;

        Ok(Self { db: Arc::new(db) })
    }

    /// Constructs a new instance using the in-memory backend.
    pub fn new_temporary() -> Result<Self, Error> {
        let db =
            redb::Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        create_schema(&db)?;

        Ok(Self { db: Arc::new(db) })
    }
}

/// Ensures all tables are present.
fn create_schema(db: &redb::Database) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    txn.open_table(NODE_TABLE)?;
    txn.open_table(CHILDREN_TABLE)?;
    txn.open_table(DELETED_TABLE)?;
    txn.commit()?;

    Ok(())
}

fn decode(data: &[u8]) -> Result<Node, Error> {
    serde_json::from_slice(data).map_err(|e| {
        warn!(err=%e, "failed to parse Node");
        Error::StorageError("failed to parse Node".to_string())
    })
}

fn get_node<T: ReadableTable<u128, Vec<u8>>>(table: &T, id: u128) -> Result<Option<Node>, Error> {
    match table.get(id)? {
        None => Ok(None),
        Some(data) => decode(&data.value()).map(Some),
    }
}

#[async_trait]
impl NodeStore for RedbNodeStore {
    #[instrument(skip(self), fields(node.id = %id))]
    async fn get(&self, id: &Uuid) -> Result<Option<Node>, Error> {
        let db = self.db.clone();
        let id = id.as_u128();

        tokio::task::spawn_blocking(move || -> Result<Option<Node>, Error> {
            let txn = db.begin_read()?;
            let nodes = txn.open_table(NODE_TABLE)?;
            get_node(&nodes, id)
        })
        .await?
    }

    #[instrument(skip(self), fields(node.parent = %parent))]
    async fn get_child(&self, parent: &Uuid, name: &str) -> Result<Option<Node>, Error> {
        let db = self.db.clone();
        let parent = parent.as_u128();
        let name = name.to_owned();

        tokio::task::spawn_blocking(move || -> Result<Option<Node>, Error> {
            let txn = db.begin_read()?;
            let children = txn.open_table(CHILDREN_TABLE)?;
            let child_id = match children.get((parent, name.as_str()))? {
                None => return Ok(None),
                Some(id) => id.value(),
            };

            let nodes = txn.open_table(NODE_TABLE)?;
            get_node(&nodes, child_id)
        })
        .await?
    }

    #[instrument(skip(self), fields(node.parent = %parent))]
    async fn list_children(
        &self,
        parent: &Uuid,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        let db = self.db.clone();
        let parent = parent.as_u128();
        let start_after = start_after.map(ToOwned::to_owned);

        tokio::task::spawn_blocking(move || -> Result<Vec<Node>, Error> {
            let txn = db.begin_read()?;
            let children = txn.open_table(CHILDREN_TABLE)?;
            let nodes = txn.open_table(NODE_TABLE)?;

            let lower = match &start_after {
                Some(after) => Bound::Excluded((parent, after.as_str())),
                None => Bound::Included((parent, "")),
            };

            let mut res = Vec::new();
            for entry in children.range((lower, Bound::Unbounded))? {
                if res.len() >= limit {
                    break;
                }

                let (key, child_id) = entry?;
                if key.value().0 != parent {
                    break;
                }

                match get_node(&nodes, child_id.value())? {
                    Some(node) => res.push(node),
                    None => {
                        warn!(node.id=%Uuid::from_u128(child_id.value()), "dangling child entry");
                    }
                }
            }

            Ok(res)
        })
        .await?
    }

    #[instrument(skip(self, node), fields(node.id = %node.id, node.name = %node.name))]
    async fn put(&self, node: Node) -> Result<(), Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let id = node.id.as_u128();
            let data = serde_json::to_vec(&node)?;

            let txn = db.begin_write()?;
            {
                let mut nodes = txn.open_table(NODE_TABLE)?;
                let mut children = txn.open_table(CHILDREN_TABLE)?;
                let mut deleted = txn.open_table(DELETED_TABLE)?;

                // Drop the index entries of the previous version.
                if let Some(old) = get_node(&nodes, id)? {
                    if let Some(old_parent) = old.parent {
                        let key = (old_parent.as_u128(), old.name.as_str());
                        let points_here = children.get(key)?.map(|v| v.value()) == Some(id);
                        if points_here {
                            children.remove(key)?;
                        }
                    }
                    deleted.remove(id)?;
                }

                if node.is_deleted() {
                    deleted.insert(id, ())?;
                } else if let Some(parent) = node.parent {
                    let key = (parent.as_u128(), node.name.as_str());
                    if let Some(other) = children.get(key)?.map(|v| v.value()) {
                        if other != id {
                            // dropping the transaction aborts it.
                            return Err(Error::AlreadyExists(node.name.clone()));
                        }
                    }
                    children.insert(key, id)?;
                }

                nodes.insert(id, data)?;
            }
            txn.commit()?;

            Ok(())
        })
        .await?
    }

    #[instrument(skip(self), fields(node.id = %id))]
    async fn apply_delta(
        &self,
        id: &Uuid,
        size_delta: i64,
        mod_time: DateTime<Utc>,
    ) -> Result<Option<Node>, Error> {
        let db = self.db.clone();
        let id = id.as_u128();

        tokio::task::spawn_blocking(move || -> Result<Option<Node>, Error> {
            let txn = db.begin_write()?;
            let node = {
                let mut nodes = txn.open_table(NODE_TABLE)?;
                let Some(mut node) = get_node(&nodes, id)? else {
                    return Ok(None);
                };

                if node.apply_delta(size_delta, mod_time) {
                    nodes.insert(id, serde_json::to_vec(&node)?)?;
                }
                node
            };
            txn.commit()?;

            Ok(Some(node))
        })
        .await?
    }

    #[instrument(skip(self))]
    async fn list_deleted(&self, limit: usize) -> Result<Vec<Node>, Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Node>, Error> {
            let txn = db.begin_read()?;
            let deleted = txn.open_table(DELETED_TABLE)?;
            let nodes = txn.open_table(NODE_TABLE)?;

            let mut res = Vec::new();
            for entry in deleted.iter()?.take(limit) {
                let (id, _) = entry?;
                if let Some(node) = get_node(&nodes, id.value())? {
                    res.push(node);
                }
            }

            Ok(res)
        })
        .await?
    }

    #[instrument(skip(self), fields(node.id = %id))]
    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        let db = self.db.clone();
        let id = id.as_u128();

        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let txn = db.begin_write()?;
            {
                let mut nodes = txn.open_table(NODE_TABLE)?;
                let mut children = txn.open_table(CHILDREN_TABLE)?;
                let mut deleted = txn.open_table(DELETED_TABLE)?;

                if let Some(old) = get_node(&nodes, id)? {
                    if let Some(parent) = old.parent {
                        let key = (parent.as_u128(), old.name.as_str());
                        let points_here = children.get(key)?.map(|v| v.value()) == Some(id);
                        if points_here {
                            children.remove(key)?;
                        }
                    }
                }

                nodes.remove(id)?;
                deleted.remove(id)?;
            }
            txn.commit()?;

            Ok(())
        })
        .await?
    }
}
