pub mod model;
pub mod plugin;

pub use model::{CreateWorkflowInput, Workflow, WorkflowState};
pub use plugin::WorkflowPlugin;
