use std::sync::Arc;
use url::Url;

use super::{MemoryUploadService, RedbUploadService, UploadService};
use crate::Error;

/// Constructs a new instance of an [UploadService] from an URI.
///
/// The following URIs are supported:
/// - `memory:`
///   Uses a in-memory implementation.
/// - `redb:`
///   Uses a in-memory redb implementation.
/// - `redb:///absolute/path/to/somewhere`
///   Uses redb, using a path on the disk for persistency.
pub async fn from_addr(uri: &str) -> Result<Arc<dyn UploadService>, Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::StorageError(format!("unable to parse url: {}", e)))?;

    let upload_service: Arc<dyn UploadService> = match url.scheme() {
        "memory" => {
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::StorageError("invalid url".to_string()));
            }
            Arc::<MemoryUploadService>::default()
        }
        "redb" => {
            if url.has_host() {
                return Err(Error::StorageError("no host allowed".to_string()));
            }

            Arc::new(if url.path().is_empty() {
                RedbUploadService::new_temporary()?
            } else {
                RedbUploadService::new(url.path().into()).await?
            })
        }
        scheme => {
            return Err(Error::StorageError(format!(
                "unknown scheme: {}",
                scheme
            )))
        }
    };

    Ok(upload_service)
}
