use std::io::{Cursor, SeekFrom};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::debug;

use super::SpaceFs;
use crate::blobservice::BlobReader;
use crate::{Error, Node};

/// Size of the in-memory pipe between a writing handle and its upload task.
const PIPE_SIZE: usize = 64 * 1024;

/// An open node, as returned by [SpaceFs::open_file].
pub enum Handle {
    File(FileHandle),
    Directory(DirectoryHandle),
}

impl Handle {
    /// The node behind the handle. None for a file that is still being
    /// created.
    pub fn node(&self) -> Option<&Node> {
        match self {
            Handle::File(f) => f.node.as_ref(),
            Handle::Directory(d) => Some(&d.dir),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self {
            Handle::File(f) => f.read(buf).await,
            Handle::Directory(d) => Err(Error::IsADirectory(d.dir.name.clone())),
        }
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        match self {
            Handle::File(f) => f.write(buf).await,
            Handle::Directory(d) => Err(Error::IsADirectory(d.dir.name.clone())),
        }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        match self {
            Handle::File(f) => f.seek(pos).await,
            Handle::Directory(d) => Err(Error::IsADirectory(d.dir.name.clone())),
        }
    }

    /// Returns the next page of children, None once the listing is over.
    pub async fn read_dir(&mut self, limit: usize) -> Result<Option<Vec<Node>>, Error> {
        match self {
            Handle::File(f) => Err(Error::Invalid(format!("{}: not a directory", f.path))),
            Handle::Directory(d) => d.read_dir(limit).await,
        }
    }

    /// Closes the handle. For a written or created file, this waits for the
    /// upload to complete and returns the new node.
    pub async fn close(self) -> Result<Option<Node>, Error> {
        match self {
            Handle::File(f) => f.close().await.map(Some),
            Handle::Directory(d) => Ok(Some(d.dir)),
        }
    }
}

enum Role {
    Idle,
    Reader(Box<dyn BlobReader>),
    Writer {
        pipe: DuplexStream,
        upload: JoinHandle<Result<Node, Error>>,
    },
}

/// A handle on a file, either reading an existing blob or streaming a new
/// one. The role is picked by the first read, seek or write and can't
/// change afterwards.
pub struct FileHandle {
    fs: SpaceFs,
    path: String,
    node: Option<Node>,
    role: Role,
}

impl FileHandle {
    pub(super) fn existing(fs: SpaceFs, path: String, node: Node) -> Self {
        Self {
            fs,
            path,
            node: Some(node),
            role: Role::Idle,
        }
    }

    pub(super) fn created(fs: SpaceFs, path: String) -> Self {
        Self {
            fs,
            path,
            node: None,
            role: Role::Idle,
        }
    }

    async fn reader(&mut self) -> Result<&mut Box<dyn BlobReader>, Error> {
        if let Role::Idle = self.role {
            self.role = Role::Reader(match &self.node {
                Some(node) => self.fs.download(node).await?,
                // nothing written yet, reads as empty.
                None => Box::new(Cursor::new(Vec::<u8>::new())),
            });
        }

        match &mut self.role {
            Role::Reader(r) => Ok(r),
            _ => Err(concurrent_error(&self.path)),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.reader().await?.read(buf).await?)
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, Error> {
        Ok(self.reader().await?.seek(pos).await?)
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if let Role::Idle = self.role {
            if self.node.is_some() {
                return Err(Error::Invalid(format!("{}: file opened read-only", self.path)));
            }

            let (pipe, rx) = tokio::io::duplex(PIPE_SIZE);
            let fs = self.fs.clone();
            let path = self.path.clone();
            let upload = tokio::spawn(async move { fs.upload(&path, rx).await });

            self.role = Role::Writer { pipe, upload };
        }

        let Role::Writer { pipe, .. } = &mut self.role else {
            return Err(concurrent_error(&self.path));
        };

        match pipe.write_all(buf).await {
            Ok(()) => Ok(buf.len()),
            Err(e) => {
                // The upload task hung up, its own error is more telling.
                debug!(err=%e, "upload pipe closed");
                let role = std::mem::replace(&mut self.role, Role::Idle);
                if let Role::Writer { upload, .. } = role {
                    upload.await??;
                }
                Err(e.into())
            }
        }
    }

    pub async fn close(mut self) -> Result<Node, Error> {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Writer { mut pipe, upload } => {
                if let Err(e) = pipe.shutdown().await {
                    upload.abort();
                    return Err(e.into());
                }
                drop(pipe);
                upload.await?
            }
            Role::Idle | Role::Reader(_) => match self.node.take() {
                Some(node) => Ok(node),
                // created but never written: store an empty file.
                None => self.fs.upload(&self.path, tokio::io::empty()).await,
            },
        }
    }
}

impl Drop for FileHandle {
    // A writer dropped before close() must not leave a truncated file.
    fn drop(&mut self) {
        if let Role::Writer { upload, .. } = &self.role {
            upload.abort();
        }
    }
}

fn concurrent_error(path: &str) -> Error {
    Error::Invalid(format!("{}: concurrent read and write", path))
}

/// A handle on a directory, listing its children page by page.
pub struct DirectoryHandle {
    fs: SpaceFs,
    dir: Node,
    cursor: Option<String>,
    done: bool,
}

impl DirectoryHandle {
    pub(super) fn new(fs: SpaceFs, dir: Node) -> Self {
        Self {
            fs,
            dir,
            cursor: None,
            done: false,
        }
    }

    /// Returns up to `limit` children following the ones already returned.
    /// A page shorter than `limit` is the last one, later calls return None.
    pub async fn read_dir(&mut self, limit: usize) -> Result<Option<Vec<Node>>, Error> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .fs
            .list_children(&self.dir, self.cursor.as_deref(), limit)
            .await?;

        if page.len() < limit {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.name.clone());
        }

        Ok(Some(page))
    }
}
