use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::{error, info};
use shared::{AnalysisResult, Task, TaskStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::tasks::model::TaskRecord;

#[derive(Error, Debug, PartialEq)]
pub enum TaskStoreError {
    #[error("Task {0} already exists")]
    Duplicate(Uuid),
    #[error("Task {id} is already {status}")]
    InvalidState { id: Uuid, status: TaskStatus },
    #[error("Task not found: {0}")]
    NotFound(Uuid),
}

/// Process-lifetime map of task id to task record. Cloning shares the map.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: Uuid) -> Result<(), TaskStoreError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&id) {
            error!("Refusing to create task {}: id already in use", id);
            return Err(TaskStoreError::Duplicate(id));
        }
        tasks.insert(id, TaskRecord::new(id));
        info!("Task {} created", id);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.get(&id).map(TaskRecord::to_task)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_completed(&self, id: Uuid, result: AnalysisResult) -> Result<(), TaskStoreError> {
        self.finish(id, |record| record.set_result(result))?;
        info!("Task {} completed", id);
        Ok(())
    }

    pub fn set_error(&self, id: Uuid, message: impl Into<String>) -> Result<(), TaskStoreError> {
        let message = message.into();
        self.finish(id, |record| record.set_error(message))?;
        info!("Task {} failed", id);
        Ok(())
    }

    /// Applies the single terminal transition while holding the write lock.
    fn finish<F>(&self, id: Uuid, apply: F) -> Result<(), TaskStoreError>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let record = tasks.get_mut(&id).ok_or_else(|| {
            error!("Terminal write for unknown task {}", id);
            TaskStoreError::NotFound(id)
        })?;
        let status = record.status();
        if status.is_terminal() {
            error!("Task {} is already {}, ignoring second terminal write", id, status);
            return Err(TaskStoreError::InvalidState { id, status });
        }
        apply(record);
        Ok(())
    }
}
