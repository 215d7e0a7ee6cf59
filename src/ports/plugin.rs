use async_trait::async_trait;
use eyre::Result;

use crate::ports::{pipeline::PipelineContext, task::Task};

/// Plugin defines the port (interface) for one constructed plugin instance
/// participating in a pipeline.
///
/// A plugin instance is one construction of a plugin: reconfiguring a plugin
/// produces a fresh instance with a fresh `instance_id`, which is how the
/// mux and the per-instance data buckets distinguish generations.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The configured plugin name, shared across reconstructions.
    fn name(&self) -> &str;

    /// Process-unique tag for this construction of the plugin.
    fn instance_id(&self) -> &str;

    /// Called once when the plugin joins a pipeline.
    fn prepare(&self, _ctx: &dyn PipelineContext) {}

    /// Execute the plugin against one task. Errors returned here abort the
    /// pipeline run; recoverable outcomes are recorded on the task instead.
    async fn run(&self, ctx: &dyn PipelineContext, task: &dyn Task) -> Result<()>;

    /// Called when the plugin leaves a pipeline; instance-scoped state
    /// should be released here.
    fn cleanup(&self, _ctx: &dyn PipelineContext) {}

    /// Called once when the instance is torn down for good.
    fn close(&self) {}
}
