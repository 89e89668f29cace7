use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

mod from_addr;
mod memory;
mod redb;


pub use self::from_addr::from_addr;
pub use self::memory::MemoryUploadService;
pub use self::redb::RedbUploadService;

/// A blob that has been fully written to the blob store but has no file
/// node yet. The file-upload task turns it into one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Upload {
    pub id: Uuid,
    pub space_id: Uuid,
    /// Directory node the file is created in.
    pub dir: Uuid,
    pub file_name: String,
    pub blob: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(
        space_id: Uuid,
        dir: Uuid,
        file_name: impl Into<String>,
        blob: Uuid,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_id,
            dir,
            file_name: file_name.into(),
            blob,
            uploaded_at,
        }
    }
}

/// Keeps track of pending uploads until they're finalized.
#[async_trait]
pub trait UploadService: Send + Sync {
    async fn register(&self, upload: Upload) -> Result<(), Error>;

    /// Returns up to `limit` pending uploads, oldest first.
    async fn get_oldest(&self, limit: usize) -> Result<Vec<Upload>, Error>;

    /// Drops a pending upload. Deleting an unknown one is not an error.
    async fn delete(&self, id: &Uuid) -> Result<(), Error>;
}

#[async_trait]
impl<A> UploadService for A
where
    A: AsRef<dyn UploadService> + Send + Sync,
{
    async fn register(&self, upload: Upload) -> Result<(), Error> {
        self.as_ref().register(upload).await
    }

    async fn get_oldest(&self, limit: usize) -> Result<Vec<Upload>, Error> {
        self.as_ref().get_oldest(limit).await
    }

    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        self.as_ref().delete(id).await
    }
}
