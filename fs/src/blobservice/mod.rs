use std::io;

use async_trait::async_trait;
use uuid::Uuid;

mod from_addr;
mod memory;
mod simplefs;

#[cfg(test)]
mod tests;

pub use self::from_addr::from_addr;
pub use self::memory::MemoryBlobService;
pub use self::simplefs::SimpleFilesystemBlobService;

/// Size and checksum of a blob, computed while it was written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobInfo {
    pub size: u64,
    /// base64url encoded sha256 of the content.
    pub checksum: String,
}

/// The base trait all BlobService services need to implement.
///
/// Blobs hold the content of files and are addressed by the id the caller
/// picks when writing them. They are immutable once closed: rewriting a
/// file means writing a new blob and releasing the old one.
#[async_trait]
pub trait BlobService: Send + Sync {
    /// Check if the service has the blob.
    async fn has(&self, id: &Uuid) -> io::Result<bool>;

    /// Request a blob from the store, None if it doesn't exist.
    async fn open_read(&self, id: &Uuid) -> io::Result<Option<Box<dyn BlobReader>>>;

    /// Insert a new blob into the store under `id`. Returns a [BlobWriter],
    /// which implements [tokio::io::AsyncWrite] and a [BlobWriter::close] to
    /// persist the blob and get its size and checksum.
    async fn open_write(&self, id: Uuid) -> Box<dyn BlobWriter>;

    /// Release the blob. Deleting an absent blob is not an error.
    async fn delete(&self, id: &Uuid) -> io::Result<()>;
}

#[async_trait]
impl<A> BlobService for A
where
    A: AsRef<dyn BlobService> + Send + Sync,
{
    async fn has(&self, id: &Uuid) -> io::Result<bool> {
        self.as_ref().has(id).await
    }

    async fn open_read(&self, id: &Uuid) -> io::Result<Option<Box<dyn BlobReader>>> {
        self.as_ref().open_read(id).await
    }

    async fn open_write(&self, id: Uuid) -> Box<dyn BlobWriter> {
        self.as_ref().open_write(id).await
    }

    async fn delete(&self, id: &Uuid) -> io::Result<()> {
        self.as_ref().delete(id).await
    }
}

/// A [tokio::io::AsyncWrite] that the user needs to close() afterwards for persist.
/// On success, it returns the size and checksum of the written blob.
#[async_trait]
pub trait BlobWriter: tokio::io::AsyncWrite + Send + Unpin {
    /// Signal there's no more data to be written, and return the
    /// [BlobInfo] of the contents written.
    ///
    /// Closing a already-closed BlobWriter is a no-op.
    async fn close(&mut self) -> io::Result<BlobInfo>;
}

/// BlobReader is a [tokio::io::AsyncRead] that also allows seeking.
pub trait BlobReader: tokio::io::AsyncRead + tokio::io::AsyncSeek + Send + Unpin + 'static {}

/// A [`io::Cursor<Vec<u8>>`] can be used as a BlobReader.
impl BlobReader for io::Cursor<&'static [u8]> {}
impl BlobReader for io::Cursor<Vec<u8>> {}
impl BlobReader for io::Cursor<bytes::Bytes> {}
impl BlobReader for tokio::fs::File {}
