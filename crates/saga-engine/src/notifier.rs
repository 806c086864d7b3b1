use async_trait::async_trait;

use crate::activity::model::Activity;
use crate::workflow::model::Workflow;

/// Side-effect-free observer invoked at workflow/activity begin/end.
///
/// Every hook is best-effort: a failure is trapped by the executor, logged,
/// and never changes the workflow's outcome. `NoopNotifier` is the default
/// so executor code never has to branch on "is there a notifier" — there
/// always is one.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn begin_workflow(&self, _workflow: &Workflow) -> anyhow::Result<()> {
        Ok(())
    }

    async fn end_workflow(&self, _workflow: &Workflow) -> anyhow::Result<()> {
        Ok(())
    }

    async fn begin_activity(&self, _workflow: &Workflow, _activity: &Activity) -> anyhow::Result<()> {
        Ok(())
    }

    async fn end_activity(&self, _workflow: &Workflow, _activity: &Activity) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}
