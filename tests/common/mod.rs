//! Shared helpers for the integration tests: mock plugin identities,
//! pipeline contexts, entry builders, and rule table assertions.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use http::Method;
use synapse::{
    adapters::InMemoryPipelineContext,
    core::{duplicated_path, MuxEntry, ParamMux},
};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// One mock plugin construction; a fresh call to [`mock_plugin`] with the
/// same name models a reconfiguration of that plugin.
pub struct MockPlugin {
    pub name: String,
    pub instance_id: String,
}

pub fn mock_plugin(name: &str) -> MockPlugin {
    let n = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
    MockPlugin {
        name: name.to_string(),
        instance_id: format!("{name}#{n}"),
    }
}

pub fn pipeline_context(pipeline: &str, plugins: &[&str]) -> InMemoryPipelineContext {
    InMemoryPipelineContext::new(pipeline, plugins.iter().map(|p| p.to_string()).collect())
}

pub fn mux_entry(plugin: &MockPlugin, path: &str, method: &str, priority: i32) -> MuxEntry {
    MuxEntry {
        pipeline_name: String::new(),
        plugin_name: plugin.name.clone(),
        instance_id: plugin.instance_id.clone(),
        path: path.to_string(),
        method: method.parse::<Method>().expect("valid method token"),
        priority,
        headers: Default::default(),
        handler: Arc::new(|_, _| Box::pin(async {})),
    }
}

/// Assert the mux's table is exactly the expected set of
/// `(pipeline, path, method, owning instance)` cells.
pub fn assert_rule_table(mux: &ParamMux, expected: &[(&str, &str, &str, &MockPlugin)]) {
    let mut actual: Vec<(String, String, String, String)> = mux
        .entries()
        .into_iter()
        .map(|entry| {
            (
                entry.pipeline_name.clone(),
                entry.path.clone(),
                entry.method.to_string(),
                entry.instance_id.clone(),
            )
        })
        .collect();
    actual.sort();

    let mut wanted: Vec<(String, String, String, String)> = expected
        .iter()
        .map(|(pipeline, path, method, plugin)| {
            (
                pipeline.to_string(),
                path.to_string(),
                method.to_string(),
                plugin.instance_id.clone(),
            )
        })
        .collect();
    wanted.sort();

    assert_eq!(actual, wanted, "rule table mismatch");
}

/// Check the structural table invariants that hold regardless of the
/// pipeline contexts involved: one entry per cell, one live instance per
/// plugin name, and no overlapping patterns within a pipeline and method.
pub fn assert_invariants(mux: &ParamMux) {
    let entries = mux.entries();

    // I4: at most one entry per (pipeline, path, method).
    let mut cells: Vec<(&str, &str, String)> = entries
        .iter()
        .map(|e| (e.pipeline_name.as_str(), e.path.as_str(), e.method.to_string()))
        .collect();
    cells.sort();
    let before = cells.len();
    cells.dedup();
    assert_eq!(before, cells.len(), "duplicate routing cell");

    // I2: one instance id per plugin name anywhere in the table.
    let mut instances: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.plugin_name.as_str(), e.instance_id.as_str()))
        .collect();
    instances.sort();
    instances.dedup();
    let mut plugins: Vec<&str> = instances.iter().map(|(plugin, _)| *plugin).collect();
    plugins.dedup();
    assert_eq!(
        instances.len(),
        plugins.len(),
        "multiple live instances for one plugin name"
    );

    // I1: within a pipeline, same-method patterns never overlap.
    for (i, a) in entries.iter().enumerate() {
        for b in entries.iter().skip(i + 1) {
            if a.pipeline_name != b.pipeline_name || a.method != b.method || a.path == b.path {
                continue;
            }
            assert!(
                !duplicated_path(&a.path, &b.path).expect("stored patterns are valid"),
                "overlapping patterns '{}' and '{}' in pipeline '{}'",
                a.path,
                b.path,
                a.pipeline_name
            );
        }
    }
}
