use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::{path::PathBuf, sync::Arc};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{Upload, UploadService};
use crate::Error;

/// Pending uploads, json encoded.
const UPLOAD_TABLE: TableDefinition<u128, Vec<u8>> = TableDefinition::new("upload");
/// Upload order: (uploaded_at in microseconds, upload id).
const PENDING_TABLE: TableDefinition<(i64, u128), ()> = TableDefinition::new("pending");

#[derive(Clone)]
pub struct RedbUploadService {
    db: Arc<Database>,
}

impl RedbUploadService {
    pub async fn new(path: PathBuf) -> Result<Self, Error> {
        if path == PathBuf::from("/") {
            return Err(Error::StorageError(
                "cowardly refusing to open / with redb".to_string(),
            ));
        }

        let db = tokio::task::spawn_blocking(|| -> Result<_, redb::Error> {
            let db = redb::Database::create(path)?;
            create_schema(&db)?;
            Ok(db)
        })
        .await??;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn new_temporary() -> Result<Self, Error> {
        let db =
            redb::Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        create_schema(&db)?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn create_schema(db: &redb::Database) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    txn.open_table(UPLOAD_TABLE)?;
    txn.open_table(PENDING_TABLE)?;
    txn.commit()?;

    Ok(())
}

fn decode(data: &[u8]) -> Result<Upload, Error> {
    serde_json::from_slice(data).map_err(|e| {
        warn!(err=%e, "failed to parse Upload");
        Error::StorageError("failed to parse Upload".to_string())
    })
}

fn order_key(upload: &Upload) -> (i64, u128) {
    (upload.uploaded_at.timestamp_micros(), upload.id.as_u128())
}

#[async_trait]
impl UploadService for RedbUploadService {
    #[instrument(skip(self, upload), fields(upload.id=%upload.id, blob.id=%upload.blob))]
    async fn register(&self, upload: Upload) -> Result<(), Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let data = serde_json::to_vec(&upload)?;

            let txn = db.begin_write()?;
            {
                let mut uploads = txn.open_table(UPLOAD_TABLE)?;
                let mut pending = txn.open_table(PENDING_TABLE)?;

                uploads.insert(upload.id.as_u128(), data)?;
                pending.insert(order_key(&upload), ())?;
            }
            txn.commit()?;

            Ok(())
        })
        .await?
    }

    #[instrument(skip(self))]
    async fn get_oldest(&self, limit: usize) -> Result<Vec<Upload>, Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Upload>, Error> {
            let txn = db.begin_read()?;
            let uploads = txn.open_table(UPLOAD_TABLE)?;
            let pending = txn.open_table(PENDING_TABLE)?;

            let mut res = Vec::new();
            for entry in pending.iter()?.take(limit) {
                let (key, _) = entry?;
                let (_, id) = key.value();
                if let Some(data) = uploads.get(id)? {
                    res.push(decode(&data.value())?);
                }
            }

            Ok(res)
        })
        .await?
    }

    #[instrument(skip(self), fields(upload.id=%id))]
    async fn delete(&self, id: &Uuid) -> Result<(), Error> {
        let db = self.db.clone();
        let id = id.as_u128();

        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let txn = db.begin_write()?;
            {
                let mut uploads = txn.open_table(UPLOAD_TABLE)?;
                let mut pending = txn.open_table(PENDING_TABLE)?;

                let old = match uploads.remove(id)? {
                    Some(data) => Some(decode(&data.value())?),
                    None => None,
                };
                if let Some(old) = old {
                    pending.remove(order_key(&old))?;
                }
            }
            txn.commit()?;

            Ok(())
        })
        .await?
    }
}
