use async_trait::async_trait;

use crate::activity::model::Activity;
use crate::engine::registry::Plugin;
use crate::workflow::model::Workflow;

/// Outcome of a failed activity callback.
///
/// Models the sentinel-as-exception contract as a tagged type rather than
/// an exception identity check: a plugin signals permanent failure by
/// returning `Permanent`, and anything else is `Temporary`.
#[derive(Debug, Clone)]
pub enum ActivityFailure {
    Permanent(String),
    Temporary(String),
}

impl std::fmt::Display for ActivityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityFailure::Permanent(msg) => write!(f, "permanent failure: {msg}"),
            ActivityFailure::Temporary(msg) => write!(f, "temporary failure: {msg}"),
        }
    }
}

impl std::error::Error for ActivityFailure {}

/// External callback implementing an activity's forward and reverse
/// effects. The same plugin handles both directions: `execute` is called
/// for the forward activity type, `rollback` for its `rollback:`-prefixed
/// counterpart.
#[async_trait]
pub trait ActivityPlugin: Plugin {
    async fn execute(&self, workflow: &Workflow, activity: &Activity)
        -> Result<(), ActivityFailure>;

    async fn rollback(
        &self,
        workflow: &Workflow,
        activity: &Activity,
    ) -> Result<(), ActivityFailure>;
}
