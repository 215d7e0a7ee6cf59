pub mod entry;
pub mod limiter;
pub mod mux;
pub mod pattern;

pub use entry::{EntryHandler, MuxEntry};
pub use limiter::ThroughputRateLimiter;
pub use mux::{MuxAddError, ParamMux, RouteMatch, RoutingError};
pub use pattern::{duplicated_path, parse_path, PathMatch, PathParams, PatternError};
