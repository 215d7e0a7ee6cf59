use std::{collections::HashMap, sync::Mutex};

use tokio_util::sync::CancellationToken;

use crate::ports::{ResultCode, Task, TaskError, TaskValue};

#[derive(Default)]
struct TaskState {
    result_code: ResultCode,
    error: Option<TaskError>,
    cancel_cause: Option<String>,
    values: HashMap<String, TaskValue>,
}

/// In-memory [`Task`] implementation backing one request execution.
///
/// Cancellation is a [`CancellationToken`] so plugins can `select!` on it
/// while queued. The first terminal result recorded wins; later setters are
/// no-ops, which is what lets several admission layers race without
/// double-reporting.
#[derive(Default)]
pub struct RequestTask {
    cancel: CancellationToken,
    state: Mutex<TaskState>,
}

impl RequestTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the task. The cause is recorded before the token fires so
    /// observers woken by the token always see it.
    pub fn cancel(&self, cause: impl Into<String>) {
        {
            let mut state = self.state.lock().expect("task state mutex poisoned");
            if state.cancel_cause.is_none() {
                state.cancel_cause = Some(cause.into());
            }
        }
        self.cancel.cancel();
    }
}

impl Task for RequestTask {
    fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn cancel_cause(&self) -> Option<String> {
        self.state
            .lock()
            .expect("task state mutex poisoned")
            .cancel_cause
            .clone()
    }

    fn set_error(&self, error: TaskError, code: ResultCode) {
        if !code.is_terminal() {
            return;
        }
        let mut state = self.state.lock().expect("task state mutex poisoned");
        if state.result_code.is_terminal() {
            return;
        }
        state.error = Some(error);
        state.result_code = code;
    }

    fn result_code(&self) -> ResultCode {
        self.state
            .lock()
            .expect("task state mutex poisoned")
            .result_code
    }

    fn error(&self) -> Option<TaskError> {
        self.state
            .lock()
            .expect("task state mutex poisoned")
            .error
            .clone()
    }

    fn set_value(&self, key: &str, value: TaskValue) {
        self.state
            .lock()
            .expect("task state mutex poisoned")
            .values
            .insert(key.to_string(), value);
    }

    fn value(&self, key: &str) -> Option<TaskValue> {
        self.state
            .lock()
            .expect("task state mutex poisoned")
            .values
            .get(key)
            .cloned()
    }
}
