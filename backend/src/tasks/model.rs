use chrono::{DateTime, Utc};
use shared::{AnalysisResult, Task, TaskStatus};
use uuid::Uuid;

/// Where a task is in its lifecycle. The result and error message only exist
/// in the state they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Processing,
    Completed(AnalysisResult),
    Error(String),
}

impl TaskState {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskState::Processing => TaskStatus::Processing,
            TaskState::Completed(_) => TaskStatus::Completed,
            TaskState::Error(_) => TaskStatus::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: Uuid,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TaskState::Processing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    pub fn set_result(&mut self, result: AnalysisResult) {
        self.state = TaskState::Completed(result);
        self.updated_at = Utc::now();
    }

    pub fn set_error(&mut self, error: String) {
        self.state = TaskState::Error(error);
        self.updated_at = Utc::now();
    }

    pub fn to_task(&self) -> Task {
        let (result, error) = match &self.state {
            TaskState::Processing => (None, None),
            TaskState::Completed(result) => (Some(result.clone()), None),
            TaskState::Error(message) => (None, Some(message.clone())),
        };
        Task {
            id: self.id.to_string(),
            status: self.status(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
            result,
            error,
        }
    }
}
