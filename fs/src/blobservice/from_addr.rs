use std::sync::Arc;
use url::Url;

use super::{BlobService, MemoryBlobService, SimpleFilesystemBlobService};
use crate::Error;

/// Constructs a new instance of a [BlobService] from an URI.
///
/// The following schemes are supported by the following services:
/// - `memory://` ([MemoryBlobService])
/// - `simplefs:///absolute/path` ([SimpleFilesystemBlobService])
pub async fn from_addr(uri: &str) -> Result<Arc<dyn BlobService>, Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::StorageError(format!("unable to parse url: {}", e)))?;

    let blob_service: Arc<dyn BlobService> = match url.scheme() {
        "memory" => {
            // memory doesn't support host or path in the URL.
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::StorageError("invalid url".to_string()));
            }
            Arc::<MemoryBlobService>::default()
        }
        "simplefs" => {
            // simplefs needs a path, and doesn't support a host.
            if url.has_host() {
                return Err(Error::StorageError("no host allowed".to_string()));
            }

            if url.path().is_empty() || url.path() == "/" {
                return Err(Error::StorageError(
                    "simplefs needs a non-root path".to_string(),
                ));
            }

            Arc::new(SimpleFilesystemBlobService::new(url.path().into()).await?)
        }
        scheme => {
            return Err(Error::StorageError(format!(
                "unknown scheme: {}",
                scheme
            )))
        }
    };

    Ok(blob_service)
}
