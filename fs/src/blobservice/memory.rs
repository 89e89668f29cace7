use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::Arc;
use std::task::Poll;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use super::{BlobInfo, BlobReader, BlobService, BlobWriter};
use crate::hashing_reader::encode_checksum;

#[derive(Clone, Default)]
pub struct MemoryBlobService {
    db: Arc<RwLock<HashMap<Uuid, Bytes>>>,
}

#[async_trait]
impl BlobService for MemoryBlobService {
    #[instrument(skip(self), fields(blob.id=%id))]
    async fn has(&self, id: &Uuid) -> io::Result<bool> {
        Ok(self.db.read().contains_key(id))
    }

    #[instrument(skip(self), fields(blob.id=%id))]
    async fn open_read(&self, id: &Uuid) -> io::Result<Option<Box<dyn BlobReader>>> {
        let db = self.db.read();

        match db.get(id).map(|x| Cursor::new(x.clone())) {
            Some(result) => Ok(Some(Box::new(result))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(blob.id=%id))]
    async fn open_write(&self, id: Uuid) -> Box<dyn BlobWriter> {
        Box::new(MemoryBlobWriter::new(self.db.clone(), id))
    }

    #[instrument(skip(self), fields(blob.id=%id))]
    async fn delete(&self, id: &Uuid) -> io::Result<()> {
        self.db.write().remove(id);
        Ok(())
    }
}

pub struct MemoryBlobWriter {
    db: Arc<RwLock<HashMap<Uuid, Bytes>>>,
    id: Uuid,

    /// Contains the buffer Vec and hasher, or None if already closed
    writers: Option<(Vec<u8>, Sha256)>,

    /// The info that has been returned, if we successfully closed.
    info: Option<BlobInfo>,
}

impl MemoryBlobWriter {
    fn new(db: Arc<RwLock<HashMap<Uuid, Bytes>>>, id: Uuid) -> Self {
        Self {
            db,
            id,
            writers: Some((Vec::new(), Sha256::new())),
            info: None,
        }
    }
}

impl tokio::io::AsyncWrite for MemoryBlobWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        b: &[u8],
    ) -> std::task::Poll<Result<usize, io::Error>> {
        Poll::Ready(match &mut self.writers {
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "already closed",
            )),
            Some((ref mut buf, ref mut hasher)) => {
                buf.extend_from_slice(b);
                hasher.update(b);
                Ok(b.len())
            }
        })
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        Poll::Ready(match self.writers {
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "already closed",
            )),
            Some(_) => Ok(()),
        })
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), io::Error>> {
        // shutdown is "instantaneous", we only write to memory.
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn close(&mut self) -> io::Result<BlobInfo> {
        match self.writers.take() {
            None => self.info.clone().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "previously closed with error")
            }),
            Some((buf, hasher)) => {
                let info = BlobInfo {
                    size: buf.len() as u64,
                    checksum: encode_checksum(&hasher.finalize()),
                };

                self.db.write().insert(self.id, buf.into());
                self.info = Some(info.clone());

                Ok(info)
            }
        }
    }
}
