use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::Task;
use crate::blobservice::BlobService;
use crate::inodes::Inodes;
use crate::{Error, Node};

const GC_BATCH_SIZE: usize = 10;

/// Reclaims soft-deleted nodes: drains their subtrees, hard-deletes every
/// node and releases the blobs of files.
#[derive(Clone)]
pub struct FsGcTask {
    inodes: Inodes,
    blob_service: Arc<dyn BlobService>,
}

impl FsGcTask {
    pub fn new(inodes: Inodes, blob_service: Arc<dyn BlobService>) -> Self {
        Self {
            inodes,
            blob_service,
        }
    }

    /// Runs until no soft-deleted node is left.
    pub async fn collect(&self) -> Result<(), Error> {
        loop {
            let to_delete = self.inodes.list_deleted(GC_BATCH_SIZE).await?;

            for node in &to_delete {
                let deleted_at = node.deleted_at.unwrap_or(node.last_modified_at);
                self.delete_node(node.clone(), node.id, deleted_at).await?;
            }

            if to_delete.len() < GC_BATCH_SIZE {
                return Ok(());
            }
        }
    }

    fn delete_node(
        &self,
        node: Node,
        sweep_root: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), Error>> {
        async move {
            if node.is_dir() {
                self.delete_dir(node, sweep_root, deleted_at).await
            } else {
                self.delete_file(node, sweep_root, deleted_at).await
            }
        }
        .boxed()
    }

    #[instrument(skip_all, fields(node.id=%dir.id), err)]
    async fn delete_dir(
        &self,
        dir: Node,
        sweep_root: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        loop {
            let children = self
                .inodes
                .list_children(&dir, None, GC_BATCH_SIZE)
                .await?;

            for child in &children {
                self.delete_node(child.clone(), sweep_root, deleted_at)
                    .await?;
            }

            if children.len() < GC_BATCH_SIZE {
                break;
            }
        }

        self.inodes.hard_delete(&dir.id).await
    }

    #[instrument(skip_all, fields(node.id=%file.id), err)]
    async fn delete_file(
        &self,
        file: Node,
        sweep_root: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let inodes = self.inodes.clone();
        let blob_service = self.blob_service.clone();

        tokio::spawn(async move {
            inodes.hard_delete(&file.id).await?;
            inodes
                .register_deletion(&file, deleted_at, &sweep_root)
                .await?;

            if let Some(blob) = file.blob {
                debug!(blob.id=%blob, "releasing blob");
                blob_service.delete(&blob).await?;
            }

            Ok::<_, Error>(())
        })
        .await?
    }
}

#[async_trait]
impl Task for FsGcTask {
    fn name(&self) -> &'static str {
        "fs-gc"
    }

    async fn run(&self, _args: serde_json::Value) -> Result<(), Error> {
        self.collect().await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::FsGcTask;
    use crate::blobservice::BlobService;
    use crate::inodes::Inodes;
    use crate::spacefs::SpaceFs;
    use crate::spaces::{MemorySpaceService, SpaceService};
    use crate::{blobservice, nodestore};

    async fn setup() -> (SpaceFs, Inodes, FsGcTask, std::sync::Arc<dyn BlobService>) {
        let inodes = Inodes::new(nodestore::from_addr("redb://").await.unwrap());
        let blob_service = blobservice::from_addr("memory://").await.unwrap();
        let space = MemorySpaceService::new(inodes.clone())
            .create(&Uuid::new_v4(), "gc", vec![])
            .await
            .unwrap();

        (
            SpaceFs::new(space, inodes.clone(), blob_service.clone()),
            inodes.clone(),
            FsGcTask::new(inodes, blob_service.clone()),
            blob_service,
        )
    }

    #[tokio::test]
    async fn collects_subtree() {
        let (fs, inodes, gc, blob_service) = setup().await;

        fs.create_dir_all("/keep").await.unwrap();
        fs.upload("/keep/k", Cursor::new(vec![0u8; 3])).await.unwrap();

        // more entries than one batch, so paging is exercised.
        fs.create_dir_all("/trash/sub").await.unwrap();
        let mut files = vec![];
        for i in 0..25 {
            files.push(
                fs.upload(&format!("/trash/sub/{}", i), Cursor::new(vec![0u8; 4]))
                    .await
                    .unwrap(),
            );
        }
        let lone = fs.upload("/lone", Cursor::new(vec![0u8; 7])).await.unwrap();

        assert_eq!(110, fs.get("/").await.unwrap().size);

        fs.remove_all("/trash").await.unwrap();
        fs.remove_all("/lone").await.unwrap();
        assert_eq!(3, fs.get("/").await.unwrap().size);

        gc.collect().await.unwrap();

        assert!(inodes.list_deleted(10).await.unwrap().is_empty());
        for f in files.iter().chain([&lone]) {
            assert!(inodes.get_by_id(&f.id).await.unwrap_err().is_not_found());
            assert!(!blob_service.has(&f.blob.unwrap()).await.unwrap());
        }

        assert_eq!(3, fs.get("/").await.unwrap().size);
        assert_eq!(3, fs.get("/keep").await.unwrap().size);
        assert_eq!(3, fs.get("/keep/k").await.unwrap().size);

        // running again is a no-op.
        gc.collect().await.unwrap();
    }

    #[tokio::test]
    async fn tolerates_missing_blob() {
        let (fs, inodes, gc, blob_service) = setup().await;

        let f = fs.upload("/f", Cursor::new(vec![1u8])).await.unwrap();
        blob_service.delete(&f.blob.unwrap()).await.unwrap();
        fs.remove_all("/f").await.unwrap();

        gc.collect().await.unwrap();
        assert!(inodes.list_deleted(10).await.unwrap().is_empty());
    }
}
