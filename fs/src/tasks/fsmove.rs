use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{parse_args, Task};
use crate::inodes::Inodes;
use crate::spaces::SpaceService;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FsMoveArgs {
    pub space_id: Uuid,
    pub source_inode: Uuid,
    pub target_path: String,
    pub moved_at: DateTime<Utc>,
}

/// Relinks a node to a new path inside its space.
#[derive(Clone)]
pub struct FsMoveTask {
    inodes: Inodes,
    space_service: Arc<dyn SpaceService>,
}

impl FsMoveTask {
    pub fn new(inodes: Inodes, space_service: Arc<dyn SpaceService>) -> Self {
        Self {
            inodes,
            space_service,
        }
    }

    #[instrument(skip(self), fields(space.id=%args.space_id, node.id=%args.source_inode), err)]
    pub async fn run_args(&self, args: FsMoveArgs) -> Result<(), Error> {
        let space = self.space_service.get(&args.space_id).await?;

        let source = match self.inodes.get_by_id(&args.source_inode).await {
            Ok(source) if !source.is_deleted() => source,
            Ok(_) => {
                debug!("source is deleted, nothing to move");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                debug!("source is gone, nothing to move");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let inodes = self.inodes.clone();
        tokio::spawn(async move {
            inodes
                .move_node(&space.root, &source, &args.target_path, args.moved_at)
                .await
        })
        .await??;

        Ok(())
    }
}

#[async_trait]
impl Task for FsMoveTask {
    fn name(&self) -> &'static str {
        "fs-move"
    }

    async fn run(&self, args: serde_json::Value) -> Result<(), Error> {
        self.run_args(parse_args(args)?).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use uuid::Uuid;

    use super::FsMoveTask;
    use crate::fixtures::new_file;
    use crate::inodes::Inodes;
    use crate::nodestore;
    use crate::spaces::{MemorySpaceService, SpaceService};
    use crate::tasks::Task;
    use crate::Error;

    #[tokio::test]
    async fn moves_by_json_args() {
        let inodes = Inodes::new(nodestore::from_addr("memory://").await.unwrap());
        let spaces = Arc::new(MemorySpaceService::new(inodes.clone()));
        let space = spaces.create(&Uuid::new_v4(), "s", vec![]).await.unwrap();
        let task = FsMoveTask::new(inodes.clone(), spaces);

        let file = inodes
            .create_file(&space.root, "a.txt", new_file(2))
            .await
            .unwrap();
        let moved_at = Utc::now();

        let args = serde_json::json!({
            "space-id": space.id,
            "source-inode": file.id,
            "target-path": "/dir/b.txt",
            "moved-at": moved_at,
        });
        task.run(args.clone()).await.unwrap();

        let moved = inodes.resolve(&space.root, "/dir/b.txt").await.unwrap();
        assert_eq!(file.id, moved.id);
        assert_eq!(moved_at, moved.last_modified_at);

        // replaying is fine.
        task.run(args).await.unwrap();
        assert_eq!(
            file.id,
            inodes.resolve(&space.root, "/dir/b.txt").await.unwrap().id
        );

        // a source that is gone counts as moved.
        let args = serde_json::json!({
            "space-id": space.id,
            "source-inode": Uuid::new_v4(),
            "target-path": "/c.txt",
            "moved-at": moved_at,
        });
        task.run(args).await.unwrap();

        assert!(matches!(
            task.run(serde_json::json!({"space-id": space.id})).await,
            Err(Error::Invalid(_))
        ));
    }
}
