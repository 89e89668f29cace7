use std::sync::Arc;
use url::Url;

use super::{MemorySpaceService, RedbSpaceService, SpaceService};
use crate::inodes::Inodes;
use crate::Error;

/// Constructs a new instance of a [SpaceService] from an URI. Roots of new
/// spaces are created through `inodes`.
///
/// The following URIs are supported:
/// - `memory:`
///   Uses a in-memory implementation.
/// - `redb:`
///   Uses a in-memory redb implementation.
/// - `redb:///absolute/path/to/somewhere`
///   Uses redb, using a path on the disk for persistency.
pub async fn from_addr(uri: &str, inodes: Inodes) -> Result<Arc<dyn SpaceService>, Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::StorageError(format!("unable to parse url: {}", e)))?;

    let space_service: Arc<dyn SpaceService> = match url.scheme() {
        "memory" => {
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::StorageError("invalid url".to_string()));
            }
            Arc::new(MemorySpaceService::new(inodes))
        }
        "redb" => {
            if url.has_host() {
                return Err(Error::StorageError("no host allowed".to_string()));
            }

            Arc::new(if url.path().is_empty() {
                RedbSpaceService::new_temporary(inodes)?
            } else {
                RedbSpaceService::new(inodes, url.path().into()).await?
            })
        }
        scheme => {
            return Err(Error::StorageError(format!(
                "unknown scheme: {}",
                scheme
            )))
        }
    };

    Ok(space_service)
}
