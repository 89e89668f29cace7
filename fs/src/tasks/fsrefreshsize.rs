use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{parse_args, Task};
use crate::inodes::Inodes;
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FsRefreshSizeArgs {
    pub inode: Uuid,
    pub modified_at: DateTime<Utc>,
}

/// Recomputes the size of a directory and its ancestors from their
/// children, repairing any drift left by interrupted roll-ups.
#[derive(Clone)]
pub struct FsRefreshSizeTask {
    inodes: Inodes,
}

impl FsRefreshSizeTask {
    pub fn new(inodes: Inodes) -> Self {
        Self { inodes }
    }
}

#[async_trait]
impl Task for FsRefreshSizeTask {
    fn name(&self) -> &'static str {
        "fs-refresh-size"
    }

    async fn run(&self, args: serde_json::Value) -> Result<(), Error> {
        let args: FsRefreshSizeArgs = parse_args(args)?;
        self.inodes.refresh_size(&args.inode, args.modified_at).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::FsRefreshSizeTask;
    use crate::fixtures::new_file;
    use crate::inodes::Inodes;
    use crate::nodestore;
    use crate::tasks::Task;

    #[tokio::test]
    async fn repairs_drift() {
        let inodes = Inodes::new(nodestore::from_addr("memory://").await.unwrap());
        let root = inodes.create_root(Utc::now()).await.unwrap();
        let dir = inodes.create_dir_all(&root.id, "/a/b").await.unwrap();
        inodes.create_file(&dir.id, "f", new_file(8)).await.unwrap();

        // simulate a lost roll-up
        let file = inodes.resolve(&root.id, "/a/b/f").await.unwrap();
        inodes
            .register_write(&file, -8, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(0, inodes.get_by_id(&root.id).await.unwrap().size);

        let task = FsRefreshSizeTask::new(inodes.clone());
        let modified_at = Utc::now() + Duration::seconds(2);
        task.run(serde_json::json!({"inode": dir.id, "modified-at": modified_at}))
            .await
            .unwrap();

        let root = inodes.get_by_id(&root.id).await.unwrap();
        assert_eq!(8, root.size);
        assert_eq!(modified_at, root.last_modified_at);
        assert_eq!(8, inodes.resolve(&root.id, "/a").await.unwrap().size);
    }
}
