use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::{ForwardingPipeline, MirrorContext, MirrorTask, TaskValidator, ValidationError};
use crate::config::TaskEntry;

/// Validates the task list up front and then runs one pipeline per task.
pub struct TaskRunner {
    validator: TaskValidator,
    context: MirrorContext,
}

impl TaskRunner {
    pub fn new(validator: TaskValidator, context: MirrorContext) -> Self {
        Self { validator, context }
    }

    /// Validates tasks in order and stops at the first invalid one.
    pub async fn preflight(
        &self,
        entries: Vec<TaskEntry>,
    ) -> Result<Vec<MirrorTask>, ValidationError> {
        let total = entries.len();
        let mut tasks = Vec::with_capacity(total);
        for (index, entry) in entries.into_iter().enumerate() {
            let position = index + 1;
            info!("verifying task #{} of {}", position, total);
            tasks.push(self.validator.validate(position, entry).await?);
        }
        Ok(tasks)
    }

    pub fn spawn(
        &self,
        tasks: Vec<MirrorTask>,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        tasks
            .into_iter()
            .map(|task| {
                let pipeline = ForwardingPipeline::new(task, self.context.clone());
                tokio::spawn(pipeline.run(shutdown.clone()))
            })
            .collect()
    }
}
