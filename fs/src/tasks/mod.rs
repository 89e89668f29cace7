use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{info_span, warn, Instrument};

use crate::Error;

mod fileupload;
mod fsgc;
mod fsmove;
mod fsrefreshsize;

pub use self::fileupload::FileUploadTask;
pub use self::fsgc::FsGcTask;
pub use self::fsmove::{FsMoveArgs, FsMoveTask};
pub use self::fsrefreshsize::{FsRefreshSizeArgs, FsRefreshSizeTask};

/// A background job, invoked by name with a flat JSON object of arguments.
///
/// Running a task twice with the same arguments must be safe.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, args: serde_json::Value) -> Result<(), Error>;
}

/// Parses the arguments of a task.
pub(crate) fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> Result<T, Error> {
    serde_json::from_value(args).map_err(|e| Error::Invalid(format!("invalid task args: {}", e)))
}

/// Holds the registered tasks and runs them by name.
#[derive(Clone, Default)]
pub struct TaskRunner {
    tasks: HashMap<&'static str, Arc<dyn Task>>,
}

impl TaskRunner {
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(task.name(), task);
    }

    /// Runs the task named `name`. Failures are logged and returned.
    pub async fn run(&self, name: &str, args: serde_json::Value) -> Result<(), Error> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("task {}", name)))?;

        let res = task
            .run(args)
            .instrument(info_span!("task", task.name = name))
            .await;

        if let Err(e) = &res {
            warn!(err=%e, task.name = name, "task failed");
        }

        res
    }
}
