//! Parameterized multi-pipeline request multiplexer.
//!
//! The mux keeps one global routing table across many independently edited
//! pipelines: `pipeline -> path pattern -> method -> entry`. Writers are
//! serialized by a single mutex and work on a private clone of the table;
//! readers load an atomically published snapshot pointer once per request
//! and traverse it without locks, so a reader can never observe a
//! half-applied write.
//!
//! Every write re-establishes the table invariants before publishing:
//! * no two patterns of one pipeline may overlap for the same method;
//! * at most one instance id per plugin name is live anywhere in the table
//!   (a changed instance id means the plugin was reconfigured, and the old
//!   construction's rules are garbage wherever they live, even under a
//!   different pipeline);
//! * entries of plugins no longer declared by their pipeline are swept.
//!
//! Route storage is a Vec per level so insertion order is preserved; the
//! tables are small and the serve path has to attempt pattern matches
//! linearly anyway.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use arc_swap::ArcSwap;
use http::Method;
use thiserror::Error;

use crate::{
    core::{
        entry::MuxEntry,
        pattern::{duplicated_path, parse_path, validate_pattern, PathParams, PatternError},
    },
    metrics,
    ports::{Header, PipelineContext, ResultCode},
};

/// Errors rejected by the mux write path. A rejected write publishes
/// nothing; the serving table is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxAddError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("plugin '{plugin}' is not a member of pipeline '{pipeline}'")]
    ForeignPlugin { plugin: String, pipeline: String },

    #[error(
        "pattern '{adding}' overlaps pattern '{existing}' for method {method} \
         in pipeline '{pipeline}'"
    )]
    DuplicatePattern {
        adding: String,
        existing: String,
        method: Method,
        pipeline: String,
    },
}

/// Errors surfaced by the serve path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no route matches path '{path}'")]
    NotFound { path: String },

    #[error("no {method} handler on path '{path}'")]
    MethodNotAllowed { path: String, method: Method },
}

impl RoutingError {
    /// The task result code this routing failure maps to.
    pub fn result_code(&self) -> ResultCode {
        match self {
            RoutingError::NotFound { .. } => ResultCode::NotFound,
            RoutingError::MethodNotAllowed { .. } => ResultCode::MethodNotAllowed,
        }
    }
}

/// A resolved route: the owning entry plus the parameters captured from the
/// request path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: MuxEntry,
    pub params: PathParams,
}

#[derive(Clone)]
struct StoredEntry {
    entry: MuxEntry,
    /// Global insertion stamp; lower means inserted earlier. Only consulted
    /// for the defensive cross-pipeline tie-break.
    seq: u64,
}

#[derive(Clone, Default)]
struct PathRules {
    path: String,
    cells: Vec<StoredEntry>,
}

#[derive(Clone, Default)]
struct PipelineRules {
    paths: Vec<PathRules>,
}

#[derive(Clone, Default)]
struct RuleTable {
    pipelines: HashMap<String, PipelineRules>,
}

impl RuleTable {
    fn entry_count(&self) -> usize {
        self.pipelines
            .values()
            .flat_map(|rules| rules.paths.iter())
            .map(|path_rules| path_rules.cells.len())
            .sum()
    }

    /// Remove entries of `pipeline` whose plugin is not in `live_plugins`.
    fn sweep_dead(&mut self, pipeline: &str, live_plugins: &[String]) -> usize {
        let Some(rules) = self.pipelines.get_mut(pipeline) else {
            return 0;
        };
        let before = rules.paths.iter().map(|p| p.cells.len()).sum::<usize>();
        for path_rules in &mut rules.paths {
            path_rules
                .cells
                .retain(|cell| live_plugins.contains(&cell.entry.plugin_name));
        }
        rules.paths.retain(|path_rules| !path_rules.cells.is_empty());
        let after = rules.paths.iter().map(|p| p.cells.len()).sum::<usize>();
        if rules.paths.is_empty() {
            self.pipelines.remove(pipeline);
        }
        before - after
    }

    /// Remove every entry owned by `instance_id`, in any pipeline.
    fn evict_instance(&mut self, instance_id: &str) -> usize {
        let mut evicted = 0;
        self.pipelines.retain(|_, rules| {
            for path_rules in &mut rules.paths {
                let before = path_rules.cells.len();
                path_rules
                    .cells
                    .retain(|cell| cell.entry.instance_id != instance_id);
                evicted += before - path_rules.cells.len();
            }
            rules.paths.retain(|path_rules| !path_rules.cells.is_empty());
            !rules.paths.is_empty()
        });
        evicted
    }

    /// Reject `adding` if it overlaps a surviving pattern of the same
    /// pipeline for the same method. A byte-equal path is the overwrite
    /// case, not a conflict.
    fn check_overlap(&self, pipeline: &str, adding: &MuxEntry) -> Result<(), MuxAddError> {
        let Some(rules) = self.pipelines.get(pipeline) else {
            return Ok(());
        };
        for path_rules in &rules.paths {
            if path_rules.path == adding.path {
                continue;
            }
            if !path_rules
                .cells
                .iter()
                .any(|cell| cell.entry.method == adding.method)
            {
                continue;
            }
            if duplicated_path(&path_rules.path, &adding.path)? {
                return Err(MuxAddError::DuplicatePattern {
                    adding: adding.path.clone(),
                    existing: path_rules.path.clone(),
                    method: adding.method.clone(),
                    pipeline: pipeline.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Install `entry` under `(pipeline, entry.path, entry.method)`,
    /// replacing any previous occupant of the cell.
    fn insert(&mut self, pipeline: &str, mut entry: MuxEntry, seq: u64) {
        entry.pipeline_name = pipeline.to_string();
        let rules = self.pipelines.entry(pipeline.to_string()).or_default();
        let path_index = match rules.paths.iter().position(|p| p.path == entry.path) {
            Some(index) => index,
            None => {
                rules.paths.push(PathRules {
                    path: entry.path.clone(),
                    cells: Vec::new(),
                });
                rules.paths.len() - 1
            }
        };
        let path_rules = &mut rules.paths[path_index];
        let stored = StoredEntry { entry, seq };
        match path_rules
            .cells
            .iter_mut()
            .find(|cell| cell.entry.method == stored.entry.method)
        {
            Some(cell) => *cell = stored,
            None => path_rules.cells.push(stored),
        }
    }

    /// Remove one cell iff it is owned by `instance_id`. Returns whether
    /// anything was removed.
    fn remove_cell(&mut self, pipeline: &str, path: &str, method: &Method, instance_id: &str) -> bool {
        let Some(rules) = self.pipelines.get_mut(pipeline) else {
            return false;
        };
        let Some(path_rules) = rules.paths.iter_mut().find(|p| p.path == path) else {
            return false;
        };
        let before = path_rules.cells.len();
        path_rules
            .cells
            .retain(|cell| !(cell.entry.method == *method && cell.entry.instance_id == instance_id));
        let removed = path_rules.cells.len() < before;
        if removed {
            rules.paths.retain(|p| !p.cells.is_empty());
            if rules.paths.is_empty() {
                self.pipelines.remove(pipeline);
            }
        }
        removed
    }

    /// Remove and return all entries of `pipeline` in insertion order.
    fn take_pipeline(&mut self, pipeline: &str) -> Vec<MuxEntry> {
        let Some(rules) = self.pipelines.remove(pipeline) else {
            return Vec::new();
        };
        rules
            .paths
            .into_iter()
            .flat_map(|path_rules| path_rules.cells)
            .map(|cell| cell.entry)
            .collect()
    }
}

#[derive(Default)]
struct WriterState {
    /// pipeline -> plugin -> live instance id. At most one record exists per
    /// plugin name across all pipelines; the lookup scans them all, which is
    /// what makes a plugin coming back under a different pipeline still
    /// supersede its old rules.
    generations: HashMap<String, HashMap<String, String>>,
    next_seq: u64,
}

fn live_instance(
    generations: &HashMap<String, HashMap<String, String>>,
    plugin: &str,
) -> Option<String> {
    generations
        .values()
        .find_map(|records| records.get(plugin).cloned())
}

fn record_instance(
    generations: &mut HashMap<String, HashMap<String, String>>,
    pipeline: &str,
    plugin: &str,
    instance_id: &str,
) {
    // Keep the record unique per plugin name, wherever it used to live.
    generations.retain(|_, records| {
        records.remove(plugin);
        !records.is_empty()
    });
    generations
        .entry(pipeline.to_string())
        .or_default()
        .insert(plugin.to_string(), instance_id.to_string());
}

fn sweep_dead_records(
    generations: &mut HashMap<String, HashMap<String, String>>,
    pipeline: &str,
    live_plugins: &[String],
) {
    if let Some(records) = generations.get_mut(pipeline) {
        records.retain(|plugin, _| live_plugins.contains(plugin));
        if records.is_empty() {
            generations.remove(pipeline);
        }
    }
}

/// The parameterized multiplexer.
///
/// Writers go through [`ParamMux::add_func`] and friends under a single
/// mutex; the serving read path ([`ParamMux::route`]) is lock-free.
pub struct ParamMux {
    table: ArcSwap<RuleTable>,
    writer: Mutex<WriterState>,
}

impl Default for ParamMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamMux {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RuleTable::default()),
            writer: Mutex::new(WriterState::default()),
        }
    }

    /// Install one entry for the context's pipeline.
    ///
    /// The arriving instance id wins: if the plugin name is currently
    /// recorded with a different instance id, in any pipeline, every entry
    /// of that older construction is evicted before the new entry lands.
    /// Dead entries of this pipeline are swept in the same write. Fails
    /// without publishing on a malformed pattern, a plugin outside the
    /// pipeline's declared set, or a pattern overlapping a surviving entry
    /// of the same pipeline and method.
    pub fn add_func(&self, ctx: &dyn PipelineContext, entry: MuxEntry) -> Result<(), MuxAddError> {
        validate_pattern(&entry.path)?;
        let pipeline = ctx.pipeline_name().to_string();
        let live_plugins = ctx.plugin_names();
        if !live_plugins.contains(&entry.plugin_name) {
            return Err(MuxAddError::ForeignPlugin {
                plugin: entry.plugin_name,
                pipeline,
            });
        }

        let mut writer = self.writer.lock().expect("mux writer mutex poisoned");
        let mut table = RuleTable::clone(&self.table.load());
        let mut generations = writer.generations.clone();

        table.sweep_dead(&pipeline, &live_plugins);
        sweep_dead_records(&mut generations, &pipeline, &live_plugins);

        match live_instance(&generations, &entry.plugin_name) {
            Some(stale_id) if stale_id != entry.instance_id => {
                let evicted = table.evict_instance(&stale_id);
                tracing::debug!(
                    plugin = %entry.plugin_name,
                    stale_instance = %stale_id,
                    evicted,
                    "plugin instance superseded, stale entries evicted"
                );
            }
            _ => {}
        }
        record_instance(&mut generations, &pipeline, &entry.plugin_name, &entry.instance_id);

        table.check_overlap(&pipeline, &entry)?;

        let seq = writer.next_seq;
        table.insert(&pipeline, entry, seq);

        writer.next_seq = seq + 1;
        writer.generations = generations;
        self.publish(table);
        Ok(())
    }

    /// Re-install a batch of entries under the context's pipeline,
    /// all-or-nothing.
    ///
    /// This is the restore half of a pipeline rewire: the batch is what a
    /// previous [`ParamMux::delete_funcs`] returned. Entries whose plugin is
    /// no longer declared by the pipeline, or whose instance id has been
    /// superseded since, are dropped silently; the recorded construction
    /// wins here, unlike `add_func`. Any entry violating a table invariant
    /// aborts the whole batch and leaves the table untouched.
    pub fn add_funcs(
        &self,
        ctx: &dyn PipelineContext,
        entries: Vec<MuxEntry>,
    ) -> Result<(), MuxAddError> {
        let pipeline = ctx.pipeline_name().to_string();
        let live_plugins = ctx.plugin_names();

        let mut writer = self.writer.lock().expect("mux writer mutex poisoned");
        let mut table = RuleTable::clone(&self.table.load());
        let mut generations = writer.generations.clone();
        let mut next_seq = writer.next_seq;

        table.sweep_dead(&pipeline, &live_plugins);
        sweep_dead_records(&mut generations, &pipeline, &live_plugins);

        for entry in entries {
            validate_pattern(&entry.path)?;
            if !live_plugins.contains(&entry.plugin_name) {
                tracing::debug!(
                    plugin = %entry.plugin_name,
                    pipeline = %pipeline,
                    path = %entry.path,
                    "dropping entry of plugin no longer in pipeline"
                );
                continue;
            }
            match live_instance(&generations, &entry.plugin_name) {
                Some(live_id) if live_id != entry.instance_id => {
                    tracing::debug!(
                        plugin = %entry.plugin_name,
                        instance = %entry.instance_id,
                        path = %entry.path,
                        "dropping entry of superseded plugin instance"
                    );
                    continue;
                }
                _ => {
                    record_instance(&mut generations, &pipeline, &entry.plugin_name, &entry.instance_id);
                }
            }

            table.check_overlap(&pipeline, &entry)?;
            table.insert(&pipeline, entry, next_seq);
            next_seq += 1;
        }

        writer.next_seq = next_seq;
        writer.generations = generations;
        self.publish(table);
        Ok(())
    }

    /// Remove the exact `(pipeline, path, method)` cell, but only if it is
    /// still owned by the supplied entry's instance. Anything else is a
    /// silent no-op.
    pub fn delete_func(&self, ctx: &dyn PipelineContext, entry: &MuxEntry) {
        let _writer = self.writer.lock().expect("mux writer mutex poisoned");
        let mut table = RuleTable::clone(&self.table.load());
        if table.remove_cell(
            ctx.pipeline_name(),
            &entry.path,
            &entry.method,
            &entry.instance_id,
        ) {
            self.publish(table);
        }
    }

    /// Remove and return every entry of the context's pipeline, in insertion
    /// order, and forget the pipeline's recorded plugin generations. The
    /// returned batch is the input for a later [`ParamMux::add_funcs`] when
    /// the pipeline is rewired under a new context.
    pub fn delete_funcs(&self, ctx: &dyn PipelineContext) -> Vec<MuxEntry> {
        let mut writer = self.writer.lock().expect("mux writer mutex poisoned");
        let mut table = RuleTable::clone(&self.table.load());
        let removed = table.take_pipeline(ctx.pipeline_name());
        writer.generations.remove(ctx.pipeline_name());
        if !removed.is_empty() {
            self.publish(table);
        }
        removed
    }

    /// Resolve a request to an entry and its captured path parameters.
    ///
    /// Lock-free: the published table is loaded once and traversed as an
    /// immutable snapshot. Cross-pipeline ties are impossible while the
    /// invariants hold, but are broken defensively by highest priority, then
    /// earliest insertion.
    pub fn route(&self, header: &dyn Header) -> Result<RouteMatch, RoutingError> {
        let table = self.table.load();
        let path = header.path();
        let method = header.method();

        let mut best: Option<(&StoredEntry, PathParams)> = None;
        let mut pattern_matched = false;

        for rules in table.pipelines.values() {
            for path_rules in &rules.paths {
                // Stored patterns were validated on insert.
                let Ok(candidate) = parse_path(path, &path_rules.path) else {
                    continue;
                };
                if !candidate.matched {
                    continue;
                }
                pattern_matched = true;
                let Some(stored) = path_rules
                    .cells
                    .iter()
                    .find(|cell| cell.entry.method == *method)
                else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some((current, _)) => {
                        stored.entry.priority > current.entry.priority
                            || (stored.entry.priority == current.entry.priority
                                && stored.seq < current.seq)
                    }
                };
                if better {
                    best = Some((stored, candidate.params));
                }
            }
        }

        match best {
            Some((stored, params)) => {
                metrics::increment_routed_total(&stored.entry.pipeline_name);
                Ok(RouteMatch {
                    entry: stored.entry.clone(),
                    params,
                })
            }
            None if pattern_matched => {
                metrics::increment_routing_failure("method_not_allowed");
                Err(RoutingError::MethodNotAllowed {
                    path: path.to_string(),
                    method: method.clone(),
                })
            }
            None => {
                metrics::increment_routing_failure("not_found");
                Err(RoutingError::NotFound {
                    path: path.to_string(),
                })
            }
        }
    }

    /// Snapshot of every installed entry, ordered by pipeline name and then
    /// insertion. Diagnostic surface; the serve path never uses it.
    pub fn entries(&self) -> Vec<MuxEntry> {
        let table = self.table.load();
        let mut pipelines: Vec<_> = table.pipelines.iter().collect();
        pipelines.sort_by(|(a, _), (b, _)| a.cmp(b));
        pipelines
            .into_iter()
            .flat_map(|(_, rules)| rules.paths.iter())
            .flat_map(|path_rules| path_rules.cells.iter())
            .map(|cell| cell.entry.clone())
            .collect()
    }

    fn publish(&self, table: RuleTable) {
        metrics::set_mux_entries(table.entry_count());
        self.table.store(Arc::new(table));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;

    use super::*;
    use crate::{
        adapters::{InMemoryPipelineContext, RequestHeader},
        core::entry::EntryHandler,
    };

    fn noop_handler() -> EntryHandler {
        Arc::new(|_, _| Box::pin(async {}))
    }

    fn entry(plugin: &str, instance: &str, path: &str, method: Method, priority: i32) -> MuxEntry {
        MuxEntry {
            pipeline_name: String::new(),
            plugin_name: plugin.to_string(),
            instance_id: instance.to_string(),
            path: path.to_string(),
            method,
            priority,
            headers: Default::default(),
            handler: noop_handler(),
        }
    }

    fn header(method: Method, path: &str) -> RequestHeader {
        let (parts, _) = http::Request::builder()
            .method(method)
            .uri(format!("http://gateway.local{path}"))
            .body(())
            .unwrap()
            .into_parts();
        RequestHeader::new(parts)
    }

    fn ctx(pipeline: &str, plugins: &[&str]) -> InMemoryPipelineContext {
        InMemoryPipelineContext::new(pipeline, plugins.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn route_captures_params() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/r/{user}/{repo}", Method::GET, 0))
            .unwrap();

        let matched = mux.route(&header(Method::GET, "/r/longcipher/synapse")).unwrap();
        assert_eq!(matched.entry.path, "/r/{user}/{repo}");
        assert_eq!(matched.params["user"], "longcipher");
        assert_eq!(matched.params["repo"], "synapse");
    }

    #[test]
    fn route_distinguishes_not_found_from_method_not_allowed() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/a", Method::GET, 0))
            .unwrap();

        let err = mux.route(&header(Method::GET, "/missing")).unwrap_err();
        assert!(matches!(err, RoutingError::NotFound { .. }));
        assert_eq!(err.result_code(), ResultCode::NotFound);

        let err = mux.route(&header(Method::POST, "/a")).unwrap_err();
        assert!(matches!(err, RoutingError::MethodNotAllowed { .. }));
        assert_eq!(err.result_code(), ResultCode::MethodNotAllowed);
    }

    #[test]
    fn route_strips_query_through_header() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/tags/{tag}", Method::GET, 0))
            .unwrap();

        let matched = mux
            .route(&header(Method::GET, "/tags/server-0.1?foo=bar"))
            .unwrap();
        assert_eq!(matched.params["tag"], "server-0.1");
    }

    #[test]
    fn overlapping_pattern_rejected_within_pipeline() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/r/{page}", Method::GET, 0))
            .unwrap();

        let err = mux
            .add_func(&ctx1, entry("plugin-a", "a1", "/r/index.html", Method::GET, 0))
            .unwrap_err();
        assert!(matches!(err, MuxAddError::DuplicatePattern { .. }));

        // A different method never conflicts.
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/r/index.html", Method::POST, 0))
            .unwrap();
    }

    #[test]
    fn overlapping_pattern_allowed_across_pipelines() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        let ctx2 = ctx("pipeline-2", &["plugin-b"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/r/{page}", Method::GET, 0))
            .unwrap();
        mux.add_func(&ctx2, entry("plugin-b", "b1", "/r/index.html", Method::GET, 5))
            .unwrap();

        // Defensive tie-break: higher priority wins.
        let matched = mux.route(&header(Method::GET, "/r/index.html")).unwrap();
        assert_eq!(matched.entry.pipeline_name, "pipeline-2");
    }

    #[test]
    fn same_key_add_overwrites() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/a", Method::GET, 0))
            .unwrap();
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/a", Method::GET, 7))
            .unwrap();

        let entries = mux.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, 7);
    }

    #[test]
    fn foreign_plugin_rejected() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        let err = mux
            .add_func(&ctx1, entry("plugin-x", "x1", "/a", Method::GET, 0))
            .unwrap_err();
        assert!(matches!(err, MuxAddError::ForeignPlugin { .. }));
        assert!(mux.entries().is_empty());
    }

    #[test]
    fn delete_func_requires_matching_instance() {
        let mux = ParamMux::new();
        let ctx1 = ctx("pipeline-1", &["plugin-a"]);
        mux.add_func(&ctx1, entry("plugin-a", "a1", "/a", Method::GET, 0))
            .unwrap();

        mux.delete_func(&ctx1, &entry("plugin-a", "other", "/a", Method::GET, 0));
        assert_eq!(mux.entries().len(), 1);

        mux.delete_func(&ctx1, &entry("plugin-a", "a1", "/a", Method::GET, 0));
        assert!(mux.entries().is_empty());
    }
}
