use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use duckcloud_fs::blobservice::BlobService;
use duckcloud_fs::inodes::Inodes;
use duckcloud_fs::spaces::SpaceService;
use parking_lot::Mutex;
use uuid::Uuid;

mod errors;
mod handler;
mod method;
mod props;
mod xml;

pub mod locks;
pub mod sessions;


pub use errors::Error;
pub use handler::{walk, Visit};
pub use method::{DavMethod, Depth};

use locks::MemLockSystem;
use props::DeadProps;
use sessions::SessionService;

/// Lazily created state kept for each space.
pub struct PerSpace<T> {
    entries: Mutex<HashMap<Uuid, Arc<T>>>,
}

impl<T> Default for PerSpace<T> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

impl<T: Default> PerSpace<T> {
    pub fn get(&self, space: &Uuid) -> Arc<T> {
        self.entries.lock().entry(*space).or_default().clone()
    }
}

#[derive(Clone)]
pub struct AppState {
    prefix: Arc<str>,
    sessions: Arc<dyn SessionService>,
    spaces: Arc<dyn SpaceService>,
    inodes: Inodes,
    blob_service: Arc<dyn BlobService>,
    locks: Arc<PerSpace<MemLockSystem>>,
    dead_props: Arc<PerSpace<DeadProps>>,
    max_copy_depth: usize,
}

impl AppState {
    /// `prefix` is the path the handler is mounted at, like `/dav`.
    pub fn new(
        prefix: &str,
        sessions: Arc<dyn SessionService>,
        spaces: Arc<dyn SpaceService>,
        inodes: Inodes,
        blob_service: Arc<dyn BlobService>,
    ) -> Self {
        let prefix = duckcloud_fs::path::clean(prefix);
        let prefix = if prefix == "/" { String::new() } else { prefix };

        Self {
            prefix: prefix.into(),
            sessions,
            spaces,
            inodes,
            blob_service,
            locks: Default::default(),
            dead_props: Default::default(),
            max_copy_depth: handler::MAX_COPY_RECURSION,
        }
    }

    /// Sets how many directory levels a COPY may descend before it is
    /// aborted with a 500.
    pub fn with_max_copy_depth(mut self, depth: usize) -> Self {
        self.max_copy_depth = depth;
        self
    }
}

/// Every request goes through the same handler, which strips the prefix
/// itself.
pub fn gen_router() -> Router<AppState> {
    Router::new()
        .fallback(handler::handle)
        .layer(duckcloud_tracing::http::trace_layer())
}
