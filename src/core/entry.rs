//! Mux entry model.
//!
//! An entry binds a method + path pattern on a pipeline to a handler, owned
//! by one specific plugin construction. Entries are value types compared by
//! their routing identity; the handler is an opaque callback the router
//! stores and returns without ever inspecting.

use std::{collections::HashMap, fmt, sync::Arc};

use futures_util::future::BoxFuture;
use http::Method;

use crate::{core::pattern::PathParams, ports::Header};

/// Opaque per-entry callback invoked by the layer above the router once a
/// route resolves. The router never calls it.
pub type EntryHandler =
    Arc<dyn Fn(Arc<dyn Header>, PathParams) -> BoxFuture<'static, ()> + Send + Sync>;

/// One routing rule: `(pipeline, path pattern, method) -> handler`, owned by
/// a specific plugin instance.
#[derive(Clone)]
pub struct MuxEntry {
    /// Owning pipeline. Normalized to the adding context's pipeline name
    /// when the entry is installed.
    pub pipeline_name: String,
    /// Configured name of the owning plugin.
    pub plugin_name: String,
    /// Tag of the owning plugin construction; changes on reconfiguration.
    pub instance_id: String,
    /// Path pattern, e.g. `/r/{user}/{repo}`.
    pub path: String,
    pub method: Method,
    /// Orders candidates when defensive cross-pipeline tie-breaking is
    /// needed; higher wins.
    pub priority: i32,
    /// Allowed values per header name; dispatch metadata carried for the
    /// layer above, not consulted by the router.
    pub headers: HashMap<String, Vec<String>>,
    pub handler: EntryHandler,
}

impl MuxEntry {
    /// Whether two entries address the same routing cell.
    pub fn same_key(&self, other: &MuxEntry) -> bool {
        self.pipeline_name == other.pipeline_name
            && self.path == other.path
            && self.method == other.method
    }
}

impl fmt::Debug for MuxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxEntry")
            .field("pipeline_name", &self.pipeline_name)
            .field("plugin_name", &self.plugin_name)
            .field("instance_id", &self.instance_id)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("priority", &self.priority)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl PartialEq for MuxEntry {
    fn eq(&self, other: &Self) -> bool {
        // The handler is intentionally excluded.
        self.pipeline_name == other.pipeline_name
            && self.plugin_name == other.plugin_name
            && self.instance_id == other.instance_id
            && self.path == other.path
            && self.method == other.method
            && self.priority == other.priority
            && self.headers == other.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> EntryHandler {
        Arc::new(|_, _| Box::pin(async {}))
    }

    fn entry(pipeline: &str, path: &str, method: Method) -> MuxEntry {
        MuxEntry {
            pipeline_name: pipeline.to_string(),
            plugin_name: "plugin-a".to_string(),
            instance_id: "instance-1".to_string(),
            path: path.to_string(),
            method,
            priority: 0,
            headers: HashMap::new(),
            handler: noop_handler(),
        }
    }

    #[test]
    fn same_key_ignores_ownership() {
        let a = entry("pipeline-1", "/a", Method::GET);
        let mut b = entry("pipeline-1", "/a", Method::GET);
        b.plugin_name = "plugin-b".to_string();
        b.instance_id = "instance-2".to_string();
        assert!(a.same_key(&b));

        assert!(!a.same_key(&entry("pipeline-2", "/a", Method::GET)));
        assert!(!a.same_key(&entry("pipeline-1", "/b", Method::GET)));
        assert!(!a.same_key(&entry("pipeline-1", "/a", Method::POST)));
    }

    #[test]
    fn equality_skips_handler() {
        let a = entry("pipeline-1", "/a", Method::GET);
        let mut b = entry("pipeline-1", "/a", Method::GET);
        b.handler = noop_handler();
        assert_eq!(a, b);
    }
}
