use std::{any::Any, sync::Arc};

/// Values stored in a pipeline data bucket are opaque to the core.
pub type BucketValue = Arc<dyn Any + Send + Sync>;

/// PipelineContext defines the port (interface) the core consumes to learn
/// about the pipeline a request is executing in: its identity, its declared
/// plugin membership, and per-plugin-instance data storage.
///
/// Plugin lifecycle and configuration loading live behind this contract and
/// are out of scope for the core.
pub trait PipelineContext: Send + Sync {
    fn pipeline_name(&self) -> &str;

    /// The ordered list of plugin names belonging to this pipeline. Mux
    /// entries whose plugin is not in this list are dead and get swept on
    /// the next write touching the pipeline.
    fn plugin_names(&self) -> Vec<String>;

    /// Get or create the data bucket scoped to one plugin construction.
    /// The bucket is keyed by plugin name and instance id, so a
    /// reconfigured plugin starts from an empty bucket.
    fn data_bucket(&self, plugin_name: &str, instance_id: &str) -> Arc<DataBucket>;

    /// Drop the bucket for one plugin construction. Holders of values from
    /// the deleted bucket keep their references and finish naturally.
    fn delete_bucket(&self, plugin_name: &str, instance_id: &str);
}

/// Thread-safe keyed storage scoped to one plugin instance within a
/// pipeline. Readers and writers go through `scc`'s lock-free map, so
/// get-or-create on the request path never blocks behind a global lock.
#[derive(Default)]
pub struct DataBucket {
    data: scc::HashMap<String, BucketValue>,
}

impl DataBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value under `key`, creating it with `factory` if absent.
    /// Concurrent callers observe exactly one created value.
    pub fn query_data_with_bind_default<F>(&self, key: &str, factory: F) -> BucketValue
    where
        F: FnOnce() -> BucketValue,
    {
        self.data
            .entry(key.to_string())
            .or_insert_with(factory)
            .get()
            .clone()
    }

    /// Return the value under `key` without creating one.
    pub fn query_data(&self, key: &str) -> Option<BucketValue> {
        self.data.read(key, |_, value| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_default_creates_once() {
        let bucket = DataBucket::new();

        let first = bucket.query_data_with_bind_default("counter", || Arc::new(1u64));
        let second = bucket.query_data_with_bind_default("counter", || Arc::new(2u64));

        assert_eq!(*first.downcast::<u64>().unwrap(), 1);
        assert_eq!(*second.downcast::<u64>().unwrap(), 1);
    }

    #[test]
    fn query_data_missing_key() {
        let bucket = DataBucket::new();
        assert!(bucket.query_data("absent").is_none());
    }
}
