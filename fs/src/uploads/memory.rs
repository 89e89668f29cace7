use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{Upload, UploadService};
use crate::Error;

#[derive(Clone, Default)]
pub struct MemoryUploadService {
    db: Arc<RwLock<HashMap<Uuid, Upload>>>,
}

#[async_trait]
impl UploadService for MemoryUploadService {
    #[instrument(skip(self, upload), fields(upload.id=%upload.id, blob.id=%upload.blob))]
    async fn register(&self, upload: Upload) -> Result<(), Error> {
        self.db.write().insert(upload.id, upload);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_oldest(&self, limit: usize) -> Result<Vec<Upload>, Error> {
        let mut uploads: Vec<Upload> = self.db.read().values().cloned().collect();
        uploads.sort_by_key(|u| (u.uploaded_at, u.id));
        uploads.truncate(limit);

        Ok(uploads)
    }

    #[instrument(skip(self), fields(upload.id=%id))]
    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        self.db.write().remove(id);
        Ok(())
    }
}
