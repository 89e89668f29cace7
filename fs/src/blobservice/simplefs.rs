use std::{
    io,
    path::{Path, PathBuf},
    pin::pin,
    task::Poll,
};

use async_trait::async_trait;
use pin_project_lite::pin_project;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

use super::{BlobInfo, BlobReader, BlobService, BlobWriter};
use crate::hashing_reader::encode_checksum;

/// Stores blobs on an existing path backed by a POSIX-compliant filesystem.
///
/// It takes an existing path, builds a `tmp` directory and a `blobs` directory inside of it. All
/// blobs received are staged in that `tmp` directory, then they are moved **atomically** into
/// `blobs/ID[:2]/ID` in a sharding style, e.g. `abcdef` gets turned into `ab/abcdef`.
#[derive(Clone)]
pub struct SimpleFilesystemBlobService {
    /// Where the blobs are located on a filesystem already mounted.
    path: PathBuf,
}

impl SimpleFilesystemBlobService {
    pub async fn new(path: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        tokio::fs::create_dir_all(path.join("tmp")).await?;
        tokio::fs::create_dir_all(path.join("blobs")).await?;

        Ok(Self { path })
    }
}

fn derive_path(root: &Path, id: &Uuid) -> PathBuf {
    let pathname = id.simple().to_string();

    root.join("blobs").join(&pathname[..2]).join(pathname)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "this file is already closed")
}

#[async_trait]
impl BlobService for SimpleFilesystemBlobService {
    #[instrument(skip_all, ret, err, fields(blob.id=%id))]
    async fn has(&self, id: &Uuid) -> io::Result<bool> {
        tokio::fs::try_exists(derive_path(&self.path, id)).await
    }

    #[instrument(skip_all, err, fields(blob.id=%id))]
    async fn open_read(&self, id: &Uuid) -> io::Result<Option<Box<dyn BlobReader>>> {
        match tokio::fs::File::open(derive_path(&self.path, id)).await {
            Ok(file) => {
                let reader: Box<dyn BlobReader> = Box::new(file);
                Ok(Some(reader))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip_all, fields(blob.id=%id))]
    async fn open_write(&self, id: Uuid) -> Box<dyn BlobWriter> {
        let file = match async_tempfile::TempFile::new_in(self.path.join("tmp")).await {
            Ok(file) => Ok(file),
            Err(e) => match e {
                async_tempfile::Error::Io(io_error) => Err(io_error),
                async_tempfile::Error::InvalidFile => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "invalid or missing file specified",
                )),
                async_tempfile::Error::InvalidDirectory => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "invalid or missing directory specified",
                )),
            },
        };

        Box::new(SimpleFilesystemBlobWriter {
            root: self.path.clone(),
            id,
            file,
            digester: Sha256::new(),
            size: 0,
            info: None,
        })
    }

    #[instrument(skip_all, err, fields(blob.id=%id))]
    async fn delete(&self, id: &Uuid) -> io::Result<()> {
        match tokio::fs::remove_file(derive_path(&self.path, id)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            res => res,
        }
    }
}

pin_project! {
    struct SimpleFilesystemBlobWriter {
        root: PathBuf,
        id: Uuid,
        file: std::io::Result<async_tempfile::TempFile>,
        digester: Sha256,
        size: u64,
        info: Option<BlobInfo>,
    }
}

impl tokio::io::AsyncWrite for SimpleFilesystemBlobWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<Result<usize, std::io::Error>> {
        let this = self.project();
        let writer = match this.file.as_mut() {
            Ok(writer) => writer,
            Err(e) => return Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        };

        match pin!(writer).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.digester.update(&buf[..n]);
                *this.size += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        match self.file.as_mut() {
            Ok(writer) => pin!(writer).poll_flush(cx),
            Err(e) => Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), std::io::Error>> {
        match self.file.as_mut() {
            Ok(writer) => pin!(writer).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(std::mem::replace(e, closed_error()))),
        }
    }
}

#[async_trait]
impl BlobWriter for SimpleFilesystemBlobWriter {
    async fn close(&mut self) -> io::Result<BlobInfo> {
        if let Some(info) = &self.info {
            return Ok(info.clone());
        }

        let writer = match self.file.as_mut() {
            Ok(writer) => writer,
            Err(e) => return Err(std::mem::replace(e, closed_error())),
        };

        writer.flush().await?;
        writer.sync_all().await?;

        let dst_path = derive_path(&self.root, &self.id);
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(writer.file_path(), dst_path).await?;

        let info = BlobInfo {
            size: self.size,
            checksum: encode_checksum(&std::mem::take(&mut self.digester).finalize()),
        };
        self.info = Some(info.clone());
        self.file = Err(closed_error());

        Ok(info)
    }
}
