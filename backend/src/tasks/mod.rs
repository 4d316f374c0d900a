pub mod model;
pub mod orchestrator;
pub mod task_store;
