use async_trait::async_trait;

use crate::engine::registry::Plugin;
use crate::workflow::model::Workflow;

/// External callback supplying the activity plan for a workflow type.
///
/// `plugin_type` (inherited from `Plugin`) is the key under which the
/// plugin is registered and must match the substring before the first
/// `:` in any `workflow_type` it plans for.
#[async_trait]
pub trait WorkflowPlugin: Plugin {
    /// Produces the ordered list of activity types this workflow will run.
    /// An empty list means the workflow has nothing to do and should fail.
    async fn plan(&self, workflow: &Workflow) -> Vec<String>;
}
