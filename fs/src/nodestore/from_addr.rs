use std::sync::Arc;
use url::Url;

use super::{MemoryNodeStore, NodeStore, RedbNodeStore};
use crate::Error;

/// Constructs a new instance of a [NodeStore] from an URI.
///
/// The following URIs are supported:
/// - `memory:`
///   Uses a in-memory implementation.
/// - `redb:`
///   Uses a in-memory redb implementation.
/// - `redb:///absolute/path/to/somewhere`
///   Uses redb, using a path on the disk for persistency. Can be only opened
///   from one process at the same time.
pub async fn from_addr(uri: &str) -> Result<Arc<dyn NodeStore>, Error> {
    let url =
        Url::parse(uri).map_err(|e| Error::StorageError(format!("unable to parse url: {}", e)))?;

    let node_store: Arc<dyn NodeStore> = match url.scheme() {
        "memory" => {
            // memory doesn't support host or path in the URL.
            if url.has_host() || !url.path().is_empty() {
                return Err(Error::StorageError("invalid url".to_string()));
            }
            Arc::<MemoryNodeStore>::default()
        }
        "redb" => {
            // redb doesn't support host, and a path can be provided (otherwise
            // it'll live in memory only).
            if url.has_host() {
                return Err(Error::StorageError("no host allowed".to_string()));
            }

            Arc::new(if url.path().is_empty() {
                RedbNodeStore::new_temporary()?
            } else {
                RedbNodeStore::new(url.path().into()).await?
            })
        }
        scheme => {
            return Err(Error::StorageError(format!(
                "unknown scheme: {}",
                scheme
            )))
        }
    };

    Ok(node_store)
}

#[cfg(test)]
mod tests {
    use super::from_addr;
    use lazy_static::lazy_static;
    use tempfile::TempDir;
    use test_case::test_case;

    lazy_static! {
        static ref TMPDIR_REDB_1: TempDir = TempDir::new().unwrap();
        static ref TMPDIR_REDB_2: TempDir = TempDir::new().unwrap();
    }

    /// This uses an unsupported scheme.
    #[test_case("http://foo.example/test", false; "unsupported scheme")]
    /// This correctly sets the scheme, and doesn't set a path.
    #[test_case("memory://", true; "memory valid")]
    /// This sets a memory url host to `foo`
    #[test_case("memory://foo", false; "memory invalid host")]
    /// This sets a memory url path to "/", which is invalid.
    #[test_case("memory:///", false; "memory invalid root path")]
    /// This configures redb in temporary mode.
    #[test_case("redb://", true; "redb valid temporary")]
    /// This configures redb with /, which should fail.
    #[test_case("redb:///", false; "redb invalid root")]
    /// This configures redb with a host, not path, which should fail.
    #[test_case("redb://foo.example", false; "redb invalid host")]
    /// This configures redb with a valid path, which should succeed.
    #[test_case(&format!("redb://{}", &TMPDIR_REDB_1.path().join("foo").to_str().unwrap()), true; "redb valid path")]
    /// This configures redb with a host, and a valid path path, which should fail.
    #[test_case(&format!("redb://foo.example{}", &TMPDIR_REDB_2.path().join("bar").to_str().unwrap()), false; "redb invalid host with valid path")]
    #[tokio::test]
    async fn test_from_addr_tokio(uri_str: &str, exp_succeed: bool) {
        if exp_succeed {
            from_addr(uri_str).await.expect("should succeed");
        } else {
            assert!(from_addr(uri_str).await.is_err(), "should fail");
        }
    }
}
