use std::sync::Arc;

use crate::ports::{DataBucket, PipelineContext};

/// In-memory [`PipelineContext`] implementation.
///
/// Holds the pipeline's identity, its declared plugin membership, and a
/// concurrent map of per-plugin-instance data buckets. Rewiring a pipeline
/// means constructing a fresh context with the new plugin list; the mux
/// treats the context as the source of truth for membership.
pub struct InMemoryPipelineContext {
    pipeline_name: String,
    plugin_names: Vec<String>,
    buckets: scc::HashMap<(String, String), Arc<DataBucket>>,
}

impl InMemoryPipelineContext {
    pub fn new(pipeline_name: impl Into<String>, plugin_names: Vec<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            plugin_names,
            buckets: scc::HashMap::new(),
        }
    }
}

impl PipelineContext for InMemoryPipelineContext {
    fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    fn plugin_names(&self) -> Vec<String> {
        self.plugin_names.clone()
    }

    fn data_bucket(&self, plugin_name: &str, instance_id: &str) -> Arc<DataBucket> {
        self.buckets
            .entry((plugin_name.to_string(), instance_id.to_string()))
            .or_insert_with(|| Arc::new(DataBucket::new()))
            .get()
            .clone()
    }

    fn delete_bucket(&self, plugin_name: &str, instance_id: &str) {
        self.buckets
            .remove(&(plugin_name.to_string(), instance_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_per_instance() {
        let ctx = InMemoryPipelineContext::new("pipeline-1", vec!["plugin-a".to_string()]);

        let bucket = ctx.data_bucket("plugin-a", "instance-1");
        bucket.query_data_with_bind_default("state", || Arc::new(42u64));

        let again = ctx.data_bucket("plugin-a", "instance-1");
        assert!(again.query_data("state").is_some());

        // A new instance id starts from an empty bucket.
        let fresh = ctx.data_bucket("plugin-a", "instance-2");
        assert!(fresh.query_data("state").is_none());
    }

    #[test]
    fn delete_bucket_releases_state_but_not_holders() {
        let ctx = InMemoryPipelineContext::new("pipeline-1", vec!["plugin-a".to_string()]);

        let bucket = ctx.data_bucket("plugin-a", "instance-1");
        bucket.query_data_with_bind_default("state", || Arc::new(42u64));
        ctx.delete_bucket("plugin-a", "instance-1");

        // The held reference still works; a re-query starts fresh.
        assert!(bucket.query_data("state").is_some());
        assert!(ctx
            .data_bucket("plugin-a", "instance-1")
            .query_data("state")
            .is_none());
    }
}
