//! Synapse - the routing and admission core of a plugin-pipeline API gateway.
//!
//! Synapse provides the two subsystems at the heart of a plugin-based
//! gateway: a **parameterized HTTP multiplexer** that routes requests to
//! per-pipeline handlers by path pattern and method while keeping the global
//! routing table conflict-free across independently edited pipelines, and a
//! **throughput rate limiter** that enforces per-pipeline admission with
//! bounded queuing and cooperative cancellation.
//!
//! # Features
//! - `{name}` path-pattern matching with parameter capture, no regex
//! - Conservative overlap detection: ambiguous tables are rejected at
//!   install time instead of dispatching nondeterministically
//! - Generational garbage collection: reconfigured plugin instances
//!   supersede their old rules everywhere, even across pipelines
//! - Lock-free serving: writers clone-modify-publish an immutable table
//!   through an atomic pointer, readers load it once per request
//! - Token-bucket admission (via `governor`) with immediate-reject,
//!   bounded-queue, and wait-forever modes, all observing task cancellation
//! - Structured tracing via `tracing` and metrics via the `metrics` facade
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use synapse::{
//!     adapters::InMemoryPipelineContext,
//!     core::{MuxEntry, ParamMux},
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let mux = ParamMux::new();
//! let ctx = InMemoryPipelineContext::new("pipeline-1", vec!["http-input".to_string()]);
//! let entry = MuxEntry {
//!     pipeline_name: String::new(), // normalized from the context
//!     plugin_name: "http-input".to_string(),
//!     instance_id: "5f0c7c1e".to_string(),
//!     path: "/r/{user}/{repo}".to_string(),
//!     method: http::Method::GET,
//!     priority: 0,
//!     headers: Default::default(),
//!     handler: Arc::new(|_, _| Box::pin(async {})),
//! };
//! mux.add_func(&ctx, entry)?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits the core consumes: pipeline
//! context, task, header, plugin) from **adapters** (in-memory
//! implementations) while keeping business logic inside `core`. Wire
//! parsing, HTTP server framing, plugin lifecycle, and metrics backends are
//! external collaborators behind the ports.
//!
//! # Error Handling
//! Fallible configuration and table edits return domain error types
//! (`thiserror`); embedding boundaries use `eyre::Result`. The core never
//! panics on the request path, and a rejected table edit publishes nothing.
//!
//! # Concurrency
//! Mux writes are serialized by a single mutex; readers observe an
//! `arc-swap` published snapshot and never lock. Shared per-instance state
//! lives in `scc` maps.

pub mod adapters;
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

// Re-export the types most embeddings need.
pub use crate::{
    core::{
        duplicated_path, parse_path, MuxAddError, MuxEntry, ParamMux, PathMatch, PathParams,
        PatternError, RouteMatch, RoutingError, ThroughputRateLimiter,
    },
    ports::{Header, PipelineContext, Plugin, ResultCode, Task, TaskError},
};
