use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn, Level};
use uuid::Uuid;

use crate::nodestore::NodeStore;
use crate::{path, Error, NewFile, Node};


/// Page size used when the engine itself needs to go over all children of a
/// directory.
const LIST_BATCH_SIZE: usize = 100;

/// The inode tree engine.
///
/// Resolves paths against a root node and performs every mutation of the
/// tree. Directory sizes are maintained incrementally through
/// [Inodes::register_write], guarded by the last-modified timestamp of each
/// ancestor so that replaying the same write is a no-op.
#[derive(Clone)]
pub struct Inodes {
    store: Arc<dyn NodeStore>,
}

impl Inodes {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Creates a new, parentless directory node to be used as the root of a
    /// space.
    #[instrument(skip(self), err)]
    pub async fn create_root(&self, now: DateTime<Utc>) -> Result<Node, Error> {
        let root = Node::new_root(now);
        self.store.put(root.clone()).await?;
        Ok(root)
    }

    /// Looks up a node by id. Soft-deleted nodes are returned as well.
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Node, Error> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    /// Looks up the live child `name` of the directory `parent`.
    pub async fn get_child(&self, parent: &Uuid, name: &str) -> Result<Option<Node>, Error> {
        self.store.get_child(parent, name).await
    }

    /// Walks the tree along `p`, starting at `root`.
    ///
    /// `step` is called once per segment with the directory reached so far,
    /// the next segment name and whether it is the final one. Walking
    /// `/foo/bar/x` calls it with `(/, foo, false)`, `(/foo, bar, false)`
    /// and `(/foo/bar, x, true)`. The segment is empty only when the walk
    /// ends at the root itself.
    ///
    /// For a non-final segment, `step` may return the directory to descend
    /// into, otherwise the live child with that name is looked up. The value
    /// returned by the final step is returned by the walk.
    async fn walk<F, Fut>(&self, root: &Uuid, p: &str, mut step: F) -> Result<Option<Node>, Error>
    where
        F: FnMut(Node, String, bool) -> Fut,
        Fut: Future<Output = Result<Option<Node>, Error>>,
    {
        let full = path::clean(p);
        let mut remaining = full.trim_start_matches('/').to_string();

        let mut dir = match self.store.get(root).await? {
            Some(dir) if !dir.is_deleted() => dir,
            _ => return Err(Error::NotFound(format!("root {}", root))),
        };
        let mut current = String::from("/");

        loop {
            let (frag, rest, last) = match remaining.split_once('/') {
                Some((frag, rest)) => (frag.to_string(), rest.to_string(), false),
                None => (std::mem::take(&mut remaining), String::new(), true),
            };

            assert!(
                !frag.is_empty() || dir.id == *root,
                "empty path segment below the root while walking {}",
                full
            );

            let out = step(dir.clone(), frag.clone(), last).await?;
            if last {
                return Ok(out);
            }

            current = path::join(&current, &frag);
            let child = match out {
                Some(child) => child,
                None => self
                    .store
                    .get_child(&dir.id, &frag)
                    .await?
                    .ok_or_else(|| Error::NotFound(current.clone()))?,
            };

            if !child.is_dir() {
                return Err(Error::NotADirectory(current));
            }

            dir = child;
            remaining = rest;
        }
    }

    /// Returns the live node at `p` below `root`.
    #[instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn resolve(&self, root: &Uuid, p: &str) -> Result<Node, Error> {
        let store = &self.store;
        let node = self
            .walk(root, p, |dir, frag, last| async move {
                if !last {
                    return Ok(None);
                }
                if frag.is_empty() {
                    return Ok(Some(dir));
                }
                store.get_child(&dir.id, &frag).await
            })
            .await?;

        node.ok_or_else(|| Error::NotFound(path::clean(p)))
    }

    /// Creates the directory `name` below `parent`.
    #[instrument(skip(self, parent), fields(node.id=%parent.id, node.name=name), err(level = Level::DEBUG))]
    pub async fn create_child_dir(&self, parent: &Node, name: &str) -> Result<Node, Error> {
        validate_name(name)?;

        if !parent.is_dir() {
            return Err(Error::NotADirectory(parent.name.clone()));
        }

        if self.store.get_child(&parent.id, name).await?.is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let dir = Node::new_directory(parent.id, name, Utc::now());
        self.store.put(dir.clone()).await?;

        Ok(dir)
    }

    /// Creates the directory at `p`. Its parent directory must exist.
    #[instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn create_dir(&self, root: &Uuid, p: &str) -> Result<Node, Error> {
        let (dir, name) = path::split(p);
        if name.is_empty() {
            return Err(Error::AlreadyExists("/".to_string()));
        }

        let parent = self.resolve(root, &dir).await?;
        self.create_child_dir(&parent, &name).await
    }

    /// Creates the directory at `p` along with all missing parents.
    /// Existing directories on the way are reused, so calling it again with
    /// the same path returns the same node.
    #[instrument(skip(self), err(level = Level::DEBUG))]
    pub async fn create_dir_all(&self, root: &Uuid, p: &str) -> Result<Node, Error> {
        let node = self
            .walk(root, p, |dir, frag, _last| async move {
                if frag.is_empty() {
                    return Ok(Some(dir));
                }

                if let Some(next) = self.store.get_child(&dir.id, &frag).await? {
                    return existing_dir(next, frag);
                }

                match self.create_child_dir(&dir, &frag).await {
                    Ok(created) => Ok(Some(created)),
                    // lost a race against another creator, use theirs.
                    Err(Error::AlreadyExists(_)) => {
                        match self.store.get_child(&dir.id, &frag).await? {
                            Some(next) => existing_dir(next, frag),
                            None => Err(Error::AlreadyExists(frag)),
                        }
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        node.ok_or_else(|| Error::NotFound(path::clean(p)))
    }

    /// Materializes a file node below the directory `parent_id`, then rolls
    /// its size up to all of its ancestors.
    #[instrument(skip(self, file), fields(node.name=name, blob.id=%file.blob), err(level = Level::DEBUG))]
    pub async fn create_file(
        &self,
        parent_id: &Uuid,
        name: &str,
        file: NewFile,
    ) -> Result<Node, Error> {
        validate_name(name)?;

        let parent = match self.store.get(parent_id).await? {
            Some(parent) if !parent.is_deleted() => parent,
            _ => return Err(Error::InvalidParent(*parent_id)),
        };

        if !parent.is_dir() {
            return Err(Error::NotADirectory(parent.name));
        }

        if self.store.get_child(&parent.id, name).await?.is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let node = Node::new_file(parent.id, name, file);
        self.store.put(node.clone()).await?;

        self.register_write(&node, node.size as i64, node.last_modified_at)
            .await?;

        Ok(node)
    }

    /// Returns up to `limit` live children of `dir`, ordered by name and
    /// starting after `start_after`.
    pub async fn list_children(
        &self,
        dir: &Node,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir.name.clone()));
        }

        self.store.list_children(&dir.id, start_after, limit).await
    }

    /// Applies `size_delta` and `mod_time` to every ancestor of `node`.
    ///
    /// Ancestors whose last-modified timestamp already equals `mod_time`
    /// are skipped, which makes the call safe to replay. Sizes saturate at
    /// zero.
    #[instrument(skip(self, node), fields(node.id=%node.id), err)]
    pub async fn register_write(
        &self,
        node: &Node,
        size_delta: i64,
        mod_time: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.roll_up(node, size_delta, mod_time, None).await
    }

    /// Rolls the removal of a hard-deleted node up through the swept
    /// subtree, stopping after `sweep_root`. Ancestors above it already had
    /// the removal applied when the subtree was soft-deleted.
    #[instrument(skip(self, node), fields(node.id=%node.id), err)]
    pub async fn register_deletion(
        &self,
        node: &Node,
        mod_time: DateTime<Utc>,
        sweep_root: &Uuid,
    ) -> Result<(), Error> {
        if node.id == *sweep_root {
            return Ok(());
        }

        self.roll_up(node, -(node.size as i64), mod_time, Some(*sweep_root))
            .await
    }

    async fn roll_up(
        &self,
        node: &Node,
        size_delta: i64,
        mod_time: DateTime<Utc>,
        stop_after: Option<Uuid>,
    ) -> Result<(), Error> {
        let mut next = node.parent;

        while let Some(id) = next {
            let Some(parent) = self.store.apply_delta(&id, size_delta, mod_time).await? else {
                debug!(node.id=%id, "ancestor is gone, stopping roll-up");
                return Ok(());
            };

            if stop_after == Some(parent.id) {
                break;
            }
            next = parent.parent;
        }

        Ok(())
    }

    /// Recomputes the size of the directory `dir_id` from its live children
    /// and does the same for each of its ancestors, setting their
    /// last-modified timestamp to `mod_time`.
    #[instrument(skip(self), err)]
    pub async fn refresh_size(&self, dir_id: &Uuid, mod_time: DateTime<Utc>) -> Result<(), Error> {
        let mut next = Some(*dir_id);

        while let Some(id) = next {
            let Some(mut dir) = self.store.get(&id).await? else {
                return Ok(());
            };

            if dir.is_dir() {
                let mut size = 0u64;
                let mut cursor: Option<String> = None;
                loop {
                    let page = self
                        .store
                        .list_children(&dir.id, cursor.as_deref(), LIST_BATCH_SIZE)
                        .await?;
                    size = page.iter().fold(size, |acc, c| acc.saturating_add(c.size));
                    if page.len() < LIST_BATCH_SIZE {
                        break;
                    }
                    cursor = page.last().map(|c| c.name.clone());
                }
                dir.size = size;
            }

            dir.last_modified_at = mod_time;
            self.store.put(dir.clone()).await?;
            next = dir.parent;
        }

        Ok(())
    }

    /// Relinks `source` to `dst` below `root`, creating the missing parent
    /// directories of `dst`. A live node already sitting at `dst` is
    /// soft-deleted first. The sizes of the old and new parent chains are
    /// recomputed afterwards.
    #[instrument(skip(self, source), fields(node.id=%source.id), err(level = Level::DEBUG))]
    pub async fn move_node(
        &self,
        root: &Uuid,
        source: &Node,
        dst: &str,
        mod_time: DateTime<Utc>,
    ) -> Result<Node, Error> {
        let (dir, name) = path::split(dst);
        if name.is_empty() {
            return Err(Error::Invalid("cannot move onto the root".to_string()));
        }
        if source.is_root() {
            return Err(Error::Invalid("cannot move a root".to_string()));
        }

        let target_dir = self.create_dir_all(root, &dir).await?;
        self.ensure_not_within(&target_dir, &source.id).await?;

        if let Some(existing) = self.store.get_child(&target_dir.id, &name).await? {
            if existing.id != source.id {
                self.soft_delete_at(&existing, mod_time).await?;
            }
        }

        let mut moved = source.clone();
        moved.parent = Some(target_dir.id);
        moved.name = name;
        moved.last_modified_at = mod_time;
        self.store.put(moved.clone()).await?;

        if let Some(old_parent) = source.parent {
            self.refresh_size(&old_parent, mod_time).await?;
        }
        self.refresh_size(&target_dir.id, mod_time).await?;

        Ok(moved)
    }

    async fn ensure_not_within(&self, dir: &Node, ancestor: &Uuid) -> Result<(), Error> {
        let mut next = Some(dir.id);
        while let Some(id) = next {
            if id == *ancestor {
                return Err(Error::Invalid("cannot move a node below itself".to_string()));
            }
            next = self.store.get(&id).await?.and_then(|n| n.parent);
        }
        Ok(())
    }

    /// Renames `node` in place. When `new_name` is taken by a live sibling,
    /// the first free `base (n).ext` variant is used instead.
    #[instrument(skip(self, node), fields(node.id=%node.id), err(level = Level::DEBUG))]
    pub async fn rename(&self, node: &Node, new_name: &str) -> Result<Node, Error> {
        validate_name(new_name)?;
        let Some(parent) = node.parent else {
            return Err(Error::Invalid("cannot rename a root".to_string()));
        };

        if node.name == new_name {
            return Ok(node.clone());
        }

        let name = self.find_unique_name(&parent, new_name).await?;

        let mut renamed = node.clone();
        renamed.name = name;
        renamed.last_modified_at = Utc::now();
        self.store.put(renamed.clone()).await?;

        Ok(renamed)
    }

    /// Returns `name` if no live child of `parent` uses it, otherwise the
    /// first free `base (n).ext` variant.
    pub async fn find_unique_name(&self, parent: &Uuid, name: &str) -> Result<String, Error> {
        if self.store.get_child(parent, name).await?.is_none() {
            return Ok(name.to_string());
        }

        let (base, ext) = match name.rfind('.') {
            Some(i) if i > 0 => name.split_at(i),
            _ => (name, ""),
        };

        let mut n = 1u32;
        loop {
            let candidate = format!("{} ({}){}", base, n, ext);
            if self.store.get_child(parent, &candidate).await?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Marks `node` as deleted. The node disappears from path resolution
    /// and listings, and is left for the garbage collector.
    pub async fn soft_delete(&self, node: &Node) -> Result<Node, Error> {
        self.soft_delete_at(node, Utc::now()).await
    }

    #[instrument(skip(self, node), fields(node.id=%node.id, node.name=%node.name), err)]
    async fn soft_delete_at(&self, node: &Node, now: DateTime<Utc>) -> Result<Node, Error> {
        if node.is_root() {
            warn!("refusing to soft-delete a space root");
            return Err(Error::Invalid("cannot delete a root".to_string()));
        }

        let mut deleted = node.clone();
        deleted.deleted_at = Some(now);
        deleted.last_modified_at = now;
        self.store.put(deleted.clone()).await?;

        Ok(deleted)
    }

    /// Returns up to `limit` soft-deleted nodes.
    pub async fn list_deleted(&self, limit: usize) -> Result<Vec<Node>, Error> {
        self.store.list_deleted(limit).await
    }

    /// Removes the node for good.
    #[instrument(skip(self), err)]
    pub async fn hard_delete(&self, id: &Uuid) -> Result<(), Error> {
        self.store.delete(id).await
    }
}

fn existing_dir(node: Node, name: String) -> Result<Option<Node>, Error> {
    if node.is_dir() {
        Ok(Some(node))
    } else {
        Err(Error::NotADirectory(name))
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::Invalid(format!("invalid name {:?}", name)));
    }
    Ok(())
}
