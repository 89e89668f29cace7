use std::sync::Arc;

use bitflags::bitflags;
use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::blobservice::{BlobReader, BlobService};
use crate::inodes::Inodes;
use crate::spaces::Space;
use crate::{path, Error, NewFile, Node};

mod handle;

#[cfg(test)]
mod tests;

pub use self::handle::{DirectoryHandle, FileHandle, Handle};

bitflags! {
    /// Flags accepted by [SpaceFs::open_file], modeled after the POSIX open
    /// flags. No flag at all means read-only.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRITE = 1 << 0;
        const READ_WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const EXCL = 1 << 3;
        const TRUNC = 1 << 4;
        const APPEND = 1 << 5;
        const SYNC = 1 << 6;
    }
}

impl OpenFlags {
    pub fn is_write(&self) -> bool {
        self.intersects(OpenFlags::WRITE | OpenFlags::READ_WRITE)
    }
}

/// A filesystem view over one space.
///
/// Paths are resolved against the space root, file content is stored in the
/// blob service.
#[derive(Clone)]
pub struct SpaceFs {
    space: Space,
    inodes: Inodes,
    blob_service: Arc<dyn BlobService>,
}

impl SpaceFs {
    pub fn new(space: Space, inodes: Inodes, blob_service: Arc<dyn BlobService>) -> Self {
        Self {
            space,
            inodes,
            blob_service,
        }
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    fn root(&self) -> &Uuid {
        &self.space.root
    }

    /// Returns the live node at `p`.
    pub async fn get(&self, p: &str) -> Result<Node, Error> {
        self.inodes.resolve(self.root(), p).await
    }

    /// Creates the directory at `p`, its parent must exist.
    pub async fn create_dir(&self, p: &str) -> Result<Node, Error> {
        self.inodes.create_dir(self.root(), p).await
    }

    /// Creates the directory at `p` and all missing parents.
    pub async fn create_dir_all(&self, p: &str) -> Result<Node, Error> {
        self.inodes.create_dir_all(self.root(), p).await
    }

    /// Lists up to `limit` children of the directory at `p`, after
    /// `start_after`.
    pub async fn list_dir(
        &self,
        p: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        let dir = self.get(p).await?;
        self.inodes.list_children(&dir, start_after, limit).await
    }

    /// Lists up to `limit` children of `dir`, after `start_after`.
    pub async fn list_children(
        &self,
        dir: &Node,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Node>, Error> {
        self.inodes.list_children(dir, start_after, limit).await
    }

    /// Removes the node at `p` and everything below it. Removing a missing
    /// path succeeds.
    ///
    /// The node is soft-deleted and its size is removed from its ancestors
    /// right away, the garbage collector reclaims the rest later.
    #[instrument(skip(self), fields(space.id=%self.space.id), err)]
    pub async fn remove_all(&self, p: &str) -> Result<(), Error> {
        let node = match self.get(p).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let inodes = self.inodes.clone();
        tokio::spawn(async move {
            let deleted = inodes.soft_delete(&node).await?;
            inodes
                .register_write(&deleted, -(deleted.size as i64), deleted.last_modified_at)
                .await
        })
        .await?
    }

    /// Moves `node` to `dst`, replacing whatever lives there.
    #[instrument(skip(self, node), fields(space.id=%self.space.id, node.id=%node.id), err)]
    pub async fn move_to(&self, node: &Node, dst: &str) -> Result<Node, Error> {
        let inodes = self.inodes.clone();
        let root = *self.root();
        let node = node.clone();
        let dst = dst.to_string();

        tokio::spawn(async move { inodes.move_node(&root, &node, &dst, Utc::now()).await }).await?
    }

    /// Renames `node` in its directory, picking a free name on collision.
    pub async fn rename(&self, node: &Node, new_name: &str) -> Result<Node, Error> {
        self.inodes.rename(node, new_name).await
    }

    /// Opens the content of a file node.
    #[instrument(skip(self, node), fields(node.id=%node.id), err)]
    pub async fn download(&self, node: &Node) -> Result<Box<dyn BlobReader>, Error> {
        let Some(blob) = node.blob else {
            return Err(Error::IsADirectory(node.name.clone()));
        };

        self.blob_service
            .open_read(&blob)
            .await?
            .ok_or_else(|| Error::NotFound(format!("blob {}", blob)))
    }

    /// Stores the content of `r` as a new file at `p`. The parent directory
    /// must exist and the name must be free.
    ///
    /// The content goes into a new blob first. Once it is complete, the
    /// file node is created and its size rolled up. The blob is released
    /// when the node can't be created.
    #[instrument(skip(self, r), fields(space.id=%self.space.id), err)]
    pub async fn upload<R>(&self, p: &str, mut r: R) -> Result<Node, Error>
    where
        R: AsyncRead + Send + Unpin,
    {
        let (dir, name) = path::split(p);
        if name.is_empty() {
            return Err(Error::Invalid("cannot upload onto the root".to_string()));
        }

        let parent = self.get(&dir).await?;
        if !parent.is_dir() {
            return Err(Error::NotADirectory(dir));
        }

        let blob = Uuid::new_v4();
        let mut writer = self.blob_service.open_write(blob).await;
        tokio::io::copy(&mut r, &mut writer).await?;
        let info = writer.close().await?;

        let file = NewFile {
            size: info.size,
            checksum: info.checksum,
            blob,
            mime: mime_guess::from_path(&name).first().map(|m| m.to_string()),
            uploaded_at: Utc::now(),
        };

        let inodes = self.inodes.clone();
        let blob_service = self.blob_service.clone();
        tokio::spawn(async move {
            match inodes.create_file(&parent.id, &name, file).await {
                Ok(node) => Ok(node),
                Err(e) => {
                    if let Err(err) = blob_service.delete(&blob).await {
                        warn!(err=%err, blob.id=%blob, "failed to release blob");
                    }
                    Err(e)
                }
            }
        })
        .await?
    }

    /// Opens the node at `p` according to `flags`.
    ///
    /// Directories always open as [DirectoryHandle]. Files can be read from
    /// an existing node, or written as a whole: writing requires either
    /// [OpenFlags::CREATE] on a missing path or [OpenFlags::TRUNC] on an
    /// existing one.
    #[instrument(skip(self), fields(space.id=%self.space.id), err(level = tracing::Level::DEBUG))]
    pub async fn open_file(&self, p: &str, flags: OpenFlags) -> Result<Handle, Error> {
        let p = path::clean(p);

        let mut node = match self.get(&p).await {
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(dir) = node.as_ref().filter(|n| n.is_dir()) {
            return Ok(Handle::Directory(DirectoryHandle::new(
                self.clone(),
                dir.clone(),
            )));
        }

        if flags.contains(OpenFlags::EXCL) && node.is_some() {
            return Err(Error::AlreadyExists(p));
        }

        if node.is_none() && !flags.contains(OpenFlags::CREATE) {
            return Err(Error::NotFound(p));
        }

        if flags.intersects(OpenFlags::SYNC | OpenFlags::APPEND) {
            return Err(Error::Unsupported(
                "SYNC and APPEND are not supported".to_string(),
            ));
        }

        if flags.is_write()
            && ((node.is_some() && !flags.contains(OpenFlags::TRUNC))
                || (node.is_none() && !flags.contains(OpenFlags::CREATE)))
        {
            return Err(Error::Invalid(format!(
                "{}: only new or truncated files can be written",
                p
            )));
        }

        if flags.contains(OpenFlags::TRUNC) && node.is_some() {
            self.remove_all(&p).await?;
            node = None;
        }

        match node {
            Some(node) => Ok(Handle::File(FileHandle::existing(self.clone(), p, node))),
            None => {
                // Fail early when the file could never be created.
                let (dir, _) = path::split(&p);
                let parent = self.get(&dir).await?;
                if !parent.is_dir() {
                    return Err(Error::NotADirectory(dir));
                }

                Ok(Handle::File(FileHandle::created(self.clone(), p)))
            }
        }
    }
}
