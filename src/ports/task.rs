use std::{any::Any, sync::Arc};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result codes a task can terminate with. The core only ever records the
/// first terminal code; later attempts to set one are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultCode {
    /// No terminal result recorded yet.
    #[default]
    Ok,
    /// Rejected or timed out by a throughput limit.
    FlowControl,
    /// The task's own cancellation fired while the core held it.
    TaskCancelled,
    ServiceUnavailable,
    InternalServerError,
    NotFound,
    MethodNotAllowed,
}

impl ResultCode {
    /// Whether this code ends the task. Every code except [`ResultCode::Ok`]
    /// is terminal.
    pub fn is_terminal(self) -> bool {
        self != ResultCode::Ok
    }
}

/// Error recorded on a task alongside its terminal result code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Values attached to a task are opaque to the core.
pub type TaskValue = Arc<dyn Any + Send + Sync>;

/// Task defines the port (interface) for one in-flight request execution.
///
/// The routing and admission core consumes this contract; it never creates
/// tasks itself. Implementations must be safe to share across the worker
/// threads serving a request.
pub trait Task: Send + Sync {
    /// Cancellation signal for this task. The token is cheap to clone and
    /// observable while the task is queued inside the core.
    fn cancel_token(&self) -> CancellationToken;

    /// The cause recorded when the task was cancelled, if any.
    fn cancel_cause(&self) -> Option<String>;

    /// Record a terminal error and result code. The first terminal result
    /// wins; once one is recorded this is a no-op.
    fn set_error(&self, error: TaskError, code: ResultCode);

    fn result_code(&self) -> ResultCode;

    fn error(&self) -> Option<TaskError>;

    /// Attach an opaque value under `key`, overwriting any previous value.
    fn set_value(&self, key: &str, value: TaskValue);

    fn value(&self, key: &str) -> Option<TaskValue>;
}
