use data_encoding::BASE64URL;
use pin_project_lite::pin_project;
use tokio::io::AsyncRead;

pin_project! {
    /// Wraps an existing AsyncRead, and allows querying for the digest and
    /// the number of bytes of all data read "through" it.
    /// The hash function is configurable by type parameter.
    pub struct HashingReader<R, H>
    where
        R: AsyncRead,
        H: digest::Digest,
    {
        #[pin]
        inner: R,
        hasher: H,
        bytes_read: u64,
    }
}

pub type Sha256HashingReader<R> = HashingReader<R, sha2::Sha256>;

impl<R, H> HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    pub fn from(r: R) -> Self {
        Self {
            inner: r,
            hasher: H::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Return the digest.
    pub fn digest(self) -> digest::Output<H> {
        self.hasher.finalize()
    }
}

impl<R, H> tokio::io::AsyncRead for HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let buf_filled_len_before = buf.filled().len();

        let this = self.project();
        let ret = this.inner.poll_read(cx, buf);

        // write everything new filled into the hasher.
        let new = &buf.filled()[buf_filled_len_before..];
        this.hasher.update(new);
        *this.bytes_read += new.len() as u64;

        ret
    }
}

/// Renders a content digest the way it is stored in node checksums.
pub fn encode_checksum(digest: &[u8]) -> String {
    BASE64URL.encode(digest)
}
