//! Throughput rate limiter plugin.
//!
//! Per-pipeline, per-plugin-instance admission gate over `governor`'s
//! token bucket. A request is either admitted immediately, queued up to the
//! configured timeout while its task's cancellation is observed, or failed
//! with a flow-control result. The bucket state lives in the pipeline data
//! bucket keyed by plugin name and instance id, so reconfiguring the plugin
//! starts metering from scratch while waiters on the old gate finish
//! naturally on the reference they already hold.

use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use eyre::Result;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use uuid::Uuid;

use crate::{
    config::{models::ThroughputLimiterConfig, validation::PluginConfigValidator, ValidationError},
    metrics,
    ports::{BucketValue, DataBucket, PipelineContext, Plugin, ResultCode, Task, TaskError},
};

/// Non-keyed limiter shared by all requests passing one plugin instance.
pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const ADMISSION_GATE_KEY: &str = "throughput.admission_gate";
const FLOW_CONTROL_STATS_KEY: &str = "throughput.flow_control_stats";

/// The admission decision state for one plugin instance.
///
/// `Closed` stands in for the original's "no limiter constructed" case: a
/// zero rate is represented explicitly and always fails the task instead of
/// leaving a null to trip over.
enum AdmissionGate {
    /// `tps == 0`: every request is flow-controlled.
    Closed,
    /// `tps == -1`: no limit, every request is admitted.
    Unbounded,
    /// `tps > 0`: token bucket with burst `floor(tps) + 1`.
    Limited {
        limiter: DirectRateLimiter,
        /// Reads the same monotonic source as the limiter's internal
        /// clock, so wait predictions compare like instants.
        clock: DefaultClock,
    },
}

impl AdmissionGate {
    fn from_tps(tps: f64) -> Self {
        if tps == 0.0 {
            tracing::warn!("zero throughput rate limit applied, no request can be admitted");
            return AdmissionGate::Closed;
        }
        if tps < 0.0 {
            return AdmissionGate::Unbounded;
        }

        let burst = NonZeroU32::new((tps as u32).saturating_add(1)).unwrap_or(NonZeroU32::MIN);
        match Quota::with_period(Duration::from_secs_f64(1.0 / tps)) {
            Some(quota) => AdmissionGate::Limited {
                limiter: RateLimiter::direct(quota.allow_burst(burst)),
                clock: DefaultClock::default(),
            },
            None => {
                // The replenish interval rounded down to zero; there is
                // nothing left to meter at that rate.
                tracing::warn!(tps, "throughput rate too high to meter, not limiting");
                AdmissionGate::Unbounded
            }
        }
    }
}

/// Flow-control observations for one plugin instance, kept alongside the
/// gate in the data bucket. Stands in for the pipeline statistics the full
/// gateway would aggregate.
#[derive(Default)]
struct FlowControlStats {
    inbound: AtomicU64,
    flow_controlled: AtomicU64,
}

impl FlowControlStats {
    fn record_inbound(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flow_controlled(&self) {
        self.flow_controlled.fetch_add(1, Ordering::Relaxed);
    }

    fn percentage(&self) -> f64 {
        let inbound = self.inbound.load(Ordering::Relaxed);
        if inbound == 0 {
            return 0.0;
        }
        self.flow_controlled.load(Ordering::Relaxed) as f64 / inbound as f64 * 100.0
    }
}

enum WaitOutcome {
    Admitted,
    DeadlineExceeded,
    Cancelled,
}

/// Per-pipeline throughput admission plugin.
pub struct ThroughputRateLimiter {
    conf: ThroughputLimiterConfig,
    instance_id: String,
}

impl ThroughputRateLimiter {
    /// Construct a limiter instance from a validated configuration. Each
    /// construction gets a fresh instance id, which is what scopes the gate
    /// state to one configuration generation.
    pub fn new(conf: ThroughputLimiterConfig) -> Result<Self, ValidationError> {
        PluginConfigValidator::validate_throughput_limiter(&conf)?;
        Ok(Self {
            conf,
            instance_id: Uuid::new_v4().to_string(),
        })
    }

    fn gate(&self, ctx: &dyn PipelineContext, bucket: &DataBucket) -> Option<Arc<AdmissionGate>> {
        let tps = self.conf.tps;
        let value = bucket.query_data_with_bind_default(ADMISSION_GATE_KEY, || {
            Arc::new(AdmissionGate::from_tps(tps)) as BucketValue
        });
        match value.downcast::<AdmissionGate>() {
            Ok(gate) => Some(gate),
            Err(_) => {
                tracing::warn!(
                    pipeline = %ctx.pipeline_name(),
                    plugin = %self.name(),
                    "unexpected state under the admission gate key, not limiting"
                );
                None
            }
        }
    }

    fn stats(&self, ctx: &dyn PipelineContext, bucket: &DataBucket) -> Option<Arc<FlowControlStats>> {
        let value = bucket.query_data_with_bind_default(FLOW_CONTROL_STATS_KEY, || {
            Arc::new(FlowControlStats::default()) as BucketValue
        });
        match value.downcast::<FlowControlStats>() {
            Ok(stats) => Some(stats),
            Err(_) => {
                tracing::warn!(
                    pipeline = %ctx.pipeline_name(),
                    plugin = %self.name(),
                    "unexpected state under the flow control stats key"
                );
                None
            }
        }
    }

    /// Queue the task for an admission slot, bounded by the configured
    /// timeout and the task's own cancellation. Exactly one terminal
    /// outcome is recorded on the task; admission records none.
    async fn queue_for_slot(
        &self,
        ctx: &dyn PipelineContext,
        task: &dyn Task,
        limiter: &DirectRateLimiter,
        clock: &DefaultClock,
    ) {
        if self.conf.timeout_msec == 0 {
            task.set_error(
                TaskError::new(
                    "service is unavailable caused by throughput rate limit (without queuing)",
                ),
                ResultCode::FlowControl,
            );
            metrics::increment_flow_controlled(ctx.pipeline_name(), self.name());
            return;
        }

        let deadline =
            (self.conf.timeout_msec > 0).then(|| Duration::from_millis(self.conf.timeout_msec as u64));

        if let Some(deadline) = deadline {
            match limiter.check() {
                // A slot freed up while we were deciding; take it.
                Ok(()) => {
                    metrics::increment_admitted(ctx.pipeline_name(), self.name());
                    return;
                }
                // The bucket already knows the wait cannot finish in time.
                Err(not_until) if not_until.wait_time_from(clock.now()) > deadline => {
                    task.set_error(
                        TaskError::new(
                            "service is unavailable caused by throughput rate limit \
                             (queuing timeout)",
                        ),
                        ResultCode::FlowControl,
                    );
                    metrics::increment_flow_controlled(ctx.pipeline_name(), self.name());
                    return;
                }
                Err(_) => {}
            }
        }

        let cancelled = task.cancel_token();
        let _timer = metrics::AdmissionWaitTimer::new(ctx.pipeline_name(), self.name());

        let outcome = match deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = cancelled.cancelled() => WaitOutcome::Cancelled,
                _ = limiter.until_ready() => WaitOutcome::Admitted,
                _ = tokio::time::sleep(deadline) => WaitOutcome::DeadlineExceeded,
            },
            None => tokio::select! {
                biased;
                _ = cancelled.cancelled() => WaitOutcome::Cancelled,
                _ = limiter.until_ready() => WaitOutcome::Admitted,
            },
        };

        match outcome {
            WaitOutcome::Admitted => {
                metrics::increment_admitted(ctx.pipeline_name(), self.name());
            }
            WaitOutcome::DeadlineExceeded => {
                task.set_error(
                    TaskError::new(
                        "service is unavailable caused by throughput rate limit (queuing timeout)",
                    ),
                    ResultCode::FlowControl,
                );
                metrics::increment_flow_controlled(ctx.pipeline_name(), self.name());
            }
            WaitOutcome::Cancelled => match task.cancel_cause() {
                Some(cause) => {
                    task.set_error(
                        TaskError::new(format!("task is cancelled by {cause}")),
                        ResultCode::TaskCancelled,
                    );
                }
                None => {
                    // Internal inconsistency: the token fired but nobody
                    // recorded a cause. Do not fail the task for it.
                    tracing::warn!(
                        pipeline = %ctx.pipeline_name(),
                        plugin = %self.name(),
                        "limiter wait cancelled but task still running"
                    );
                }
            },
        }
    }
}

#[async_trait]
impl Plugin for ThroughputRateLimiter {
    fn name(&self) -> &str {
        &self.conf.common.plugin_name
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn run(&self, ctx: &dyn PipelineContext, task: &dyn Task) -> Result<()> {
        let bucket = ctx.data_bucket(self.name(), &self.instance_id);
        let Some(gate) = self.gate(ctx, &bucket) else {
            // Conservative default: never fail a request over our own
            // bookkeeping.
            return Ok(());
        };
        let stats = self.stats(ctx, &bucket);
        if let Some(stats) = &stats {
            stats.record_inbound();
        }

        match gate.as_ref() {
            AdmissionGate::Closed => {
                task.set_error(
                    TaskError::new("service is unavailable caused by throughput rate limit"),
                    ResultCode::FlowControl,
                );
                metrics::increment_flow_controlled(ctx.pipeline_name(), self.name());
            }
            AdmissionGate::Unbounded => {
                metrics::increment_admitted(ctx.pipeline_name(), self.name());
            }
            AdmissionGate::Limited { limiter, clock } => {
                if limiter.check().is_ok() {
                    metrics::increment_admitted(ctx.pipeline_name(), self.name());
                } else {
                    if let Some(stats) = &stats {
                        stats.record_flow_controlled();
                    }
                    self.queue_for_slot(ctx, task, limiter, clock).await;
                }
            }
        }

        if task.result_code() == ResultCode::TaskCancelled {
            let error = task
                .error()
                .unwrap_or_else(|| TaskError::new("task is cancelled"));
            return Err(eyre::Report::new(error));
        }

        if let Some(key) = &self.conf.flow_control_percentage_key {
            match &stats {
                Some(stats) => task.set_value(key, Arc::new(stats.percentage())),
                None => tracing::warn!(
                    pipeline = %ctx.pipeline_name(),
                    plugin = %self.name(),
                    "flow control percentage unavailable, skipping output"
                ),
            }
        }

        Ok(())
    }

    fn cleanup(&self, ctx: &dyn PipelineContext) {
        ctx.delete_bucket(self.name(), &self.instance_id);
    }
}
