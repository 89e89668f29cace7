use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use super::Task;
use crate::blobservice::BlobService;
use crate::inodes::Inodes;
use crate::uploads::{Upload, UploadService};
use crate::{encode_checksum, Error, NewFile, Sha256HashingReader};

const UPLOAD_BATCH_SIZE: usize = 10;

/// Turns pending uploads into file nodes.
///
/// The blob of each upload is hashed again, the file node is created under
/// the recorded directory and the record is dropped last. A crash at any
/// point leaves the record in place, and replaying it finds the node that
/// was already created for the same blob.
#[derive(Clone)]
pub struct FileUploadTask {
    inodes: Inodes,
    blob_service: Arc<dyn BlobService>,
    upload_service: Arc<dyn UploadService>,
}

impl FileUploadTask {
    pub fn new(
        inodes: Inodes,
        blob_service: Arc<dyn BlobService>,
        upload_service: Arc<dyn UploadService>,
    ) -> Self {
        Self {
            inodes,
            blob_service,
            upload_service,
        }
    }

    /// Finalizes pending uploads, oldest first, until none is left.
    pub async fn drain(&self) -> Result<(), Error> {
        loop {
            let uploads = self.upload_service.get_oldest(UPLOAD_BATCH_SIZE).await?;

            for upload in &uploads {
                self.finalize(upload).await?;
            }

            if uploads.len() < UPLOAD_BATCH_SIZE {
                return Ok(());
            }
        }
    }

    #[instrument(skip_all, fields(upload.id=%upload.id, blob.id=%upload.blob, node.name=%upload.file_name), err)]
    async fn finalize(&self, upload: &Upload) -> Result<(), Error> {
        let Some(reader) = self.blob_service.open_read(&upload.blob).await? else {
            warn!("blob is gone, dropping the upload");
            return self.upload_service.delete(&upload.id).await;
        };

        let mut hr = Sha256HashingReader::from(reader);
        tokio::io::copy(&mut hr, &mut tokio::io::sink()).await?;
        let size = hr.bytes_read();
        let checksum = encode_checksum(&hr.digest());

        match self.inodes.get_child(&upload.dir, &upload.file_name).await? {
            // an earlier run got as far as creating the node.
            Some(existing) if existing.blob == Some(upload.blob) => {
                self.inodes
                    .register_write(&existing, size as i64, upload.uploaded_at)
                    .await?;
            }
            existing => {
                let name = match existing {
                    Some(_) => {
                        self.inodes
                            .find_unique_name(&upload.dir, &upload.file_name)
                            .await?
                    }
                    None => upload.file_name.clone(),
                };

                let file = NewFile {
                    size,
                    checksum,
                    blob: upload.blob,
                    mime: mime_guess::from_path(&upload.file_name)
                        .first()
                        .map(|m| m.to_string()),
                    uploaded_at: upload.uploaded_at,
                };

                match self.inodes.create_file(&upload.dir, &name, file).await {
                    Ok(_) => {}
                    // retrying can't help these, and the queue is drained
                    // in order.
                    Err(
                        e @ (Error::InvalidParent(_)
                        | Error::NotADirectory(_)
                        | Error::Invalid(_)
                        | Error::NotFound(_)),
                    ) => {
                        warn!(err=%e, "upload can't be materialized, dropping it");
                        self.blob_service.delete(&upload.blob).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.upload_service.delete(&upload.id).await
    }
}

#[async_trait]
impl Task for FileUploadTask {
    fn name(&self) -> &'static str {
        "file-upload"
    }

    async fn run(&self, _args: serde_json::Value) -> Result<(), Error> {
        self.drain().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;
    use uuid::Uuid;

    use super::FileUploadTask;
    use crate::blobservice::BlobService;
    use crate::fixtures::{BLOB_B, BLOB_B_CHECKSUM};
    use crate::inodes::Inodes;
    use crate::uploads::{Upload, UploadService};
    use crate::{blobservice, nodestore, uploads, Node};

    struct Setup {
        inodes: Inodes,
        root: Node,
        blob_service: Arc<dyn BlobService>,
        upload_service: Arc<dyn UploadService>,
        task: FileUploadTask,
    }

    async fn setup() -> Setup {
        let inodes = Inodes::new(nodestore::from_addr("memory://").await.unwrap());
        let root = inodes.create_root(Utc::now()).await.unwrap();
        let blob_service = blobservice::from_addr("memory://").await.unwrap();
        let upload_service = uploads::from_addr("memory://").await.unwrap();

        Setup {
            task: FileUploadTask::new(inodes.clone(), blob_service.clone(), upload_service.clone()),
            inodes,
            root,
            blob_service,
            upload_service,
        }
    }

    async fn put_blob(blob_service: &Arc<dyn BlobService>, data: &[u8]) -> Uuid {
        let id = Uuid::new_v4();
        let mut w = blob_service.open_write(id).await;
        w.write_all(data).await.unwrap();
        w.close().await.unwrap();
        id
    }

    #[tokio::test]
    async fn finalizes_upload() {
        let s = setup().await;
        let dir = s.inodes.create_dir(&s.root.id, "/docs").await.unwrap();
        let blob = put_blob(&s.blob_service, &BLOB_B).await;

        let upload = Upload::new(Uuid::new_v4(), dir.id, "b.json", blob, Utc::now());
        s.upload_service.register(upload.clone()).await.unwrap();

        s.task.drain().await.unwrap();

        let node = s.inodes.resolve(&s.root.id, "/docs/b.json").await.unwrap();
        assert_eq!(BLOB_B.len() as u64, node.size);
        assert_eq!(Some(BLOB_B_CHECKSUM.clone()), node.checksum);
        assert_eq!(Some(blob), node.blob);
        assert_eq!(Some("application/json".to_string()), node.mime);
        assert_eq!(upload.uploaded_at, node.last_modified_at);

        let dir = s.inodes.get_by_id(&dir.id).await.unwrap();
        assert_eq!(BLOB_B.len() as u64, dir.size);

        assert!(s.upload_service.get_oldest(10).await.unwrap().is_empty());
    }

    /// Replaying an upload whose node already exists doesn't count the size
    /// twice.
    #[tokio::test]
    async fn replay_is_idempotent() {
        let s = setup().await;
        let blob = put_blob(&s.blob_service, b"hello").await;
        let upload = Upload::new(Uuid::new_v4(), s.root.id, "f", blob, Utc::now());

        s.upload_service.register(upload.clone()).await.unwrap();
        s.task.drain().await.unwrap();
        s.upload_service.register(upload).await.unwrap();
        s.task.drain().await.unwrap();

        assert_eq!(5, s.inodes.get_by_id(&s.root.id).await.unwrap().size);
        assert_eq!(1, s.inodes.list_children(&s.root, None, 10).await.unwrap().len());
    }

    #[tokio::test]
    async fn drops_orphans() {
        let s = setup().await;

        // missing blob
        s.upload_service
            .register(Upload::new(Uuid::new_v4(), s.root.id, "a", Uuid::new_v4(), Utc::now()))
            .await
            .unwrap();

        // missing directory
        let blob = put_blob(&s.blob_service, b"x").await;
        s.upload_service
            .register(Upload::new(Uuid::new_v4(), Uuid::new_v4(), "b", blob, Utc::now()))
            .await
            .unwrap();

        s.task.drain().await.unwrap();

        assert!(s.upload_service.get_oldest(10).await.unwrap().is_empty());
        assert!(!s.blob_service.has(&blob).await.unwrap());
        assert!(s.inodes.list_children(&s.root, None, 10).await.unwrap().is_empty());
    }

    /// A record that can never be materialized is dropped, and the uploads
    /// queued behind it still go through.
    #[tokio::test]
    async fn drops_unmaterializable() {
        let s = setup().await;
        let file = s
            .inodes
            .create_file(&s.root.id, "plain", crate::fixtures::new_file(1))
            .await
            .unwrap();

        let t0 = Utc::now();
        let below_file = put_blob(&s.blob_service, b"x").await;
        let bad_name = put_blob(&s.blob_service, b"y").await;
        let good = put_blob(&s.blob_service, b"zz").await;
        for (i, (dir, name, blob)) in [
            (file.id, "a", below_file),
            (s.root.id, "a/b", bad_name),
            (s.root.id, "ok", good),
        ]
        .into_iter()
        .enumerate()
        {
            let at = t0 + chrono::Duration::seconds(i as i64);
            s.upload_service
                .register(Upload::new(Uuid::new_v4(), dir, name, blob, at))
                .await
                .unwrap();
        }

        s.task.drain().await.expect("must not be blocked");

        assert!(s.upload_service.get_oldest(10).await.unwrap().is_empty());
        assert!(!s.blob_service.has(&below_file).await.unwrap());
        assert!(!s.blob_service.has(&bad_name).await.unwrap());

        let node = s.inodes.resolve(&s.root.id, "/ok").await.unwrap();
        assert_eq!(Some(good), node.blob);
        assert_eq!(2, node.size);
    }

    #[tokio::test]
    async fn name_collision() {
        let s = setup().await;
        let blob = put_blob(&s.blob_service, b"new").await;
        s.inodes
            .create_file(&s.root.id, "f.txt", crate::fixtures::new_file(1))
            .await
            .unwrap();

        s.upload_service
            .register(Upload::new(Uuid::new_v4(), s.root.id, "f.txt", blob, Utc::now()))
            .await
            .unwrap();
        s.task.drain().await.unwrap();

        let node = s.inodes.resolve(&s.root.id, "/f (1).txt").await.unwrap();
        assert_eq!(Some(blob), node.blob);
    }
}
