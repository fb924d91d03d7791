use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use relay_telemetry::MetricsRecorder;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::sink::OutputSink;

/// Body sent when no session is connected.
pub const NO_CLIENT_CONNECTED: &str = "No Client Connected";
/// Body sent when no session answered before the deadline.
pub const TIMED_OUT: &str = "Timed Out";

pub(crate) const DISPATCHES_COUNTER: &str = "relay.dispatches";
pub(crate) const LATENCY_HISTOGRAM: &str = "relay.dispatch_latency_ms";

/// Terminal result of a dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Responded(Value),
    TimedOut,
    NoTargets,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Responded(_) => "responded",
            Self::TimedOut => "timed_out",
            Self::NoTargets => "no_targets",
        }
    }

    /// Response body bytes for this outcome. Payloads are tab-indented JSON.
    pub fn render(&self) -> Bytes {
        match self {
            Self::Responded(payload) => match to_tab_indented(payload) {
                Ok(body) => Bytes::from(body),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response payload");
                    Bytes::from(payload.to_string())
                }
            },
            Self::TimedOut => Bytes::from_static(TIMED_OUT.as_bytes()),
            Self::NoTargets => Bytes::from_static(NO_CLIENT_CONNECTED.as_bytes()),
        }
    }
}

fn to_tab_indented(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// First-settle-wins arbitration for one dispatch.
///
/// Shared by every attempt and timeout guard of that dispatch. Exactly one
/// `settle` call wins and writes the sink; the rest return false.
pub struct Race {
    answered: AtomicBool,
    sink: OutputSink,
    started: Instant,
    metrics: Arc<MetricsRecorder>,
}

impl Race {
    pub fn new(sink: OutputSink, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            answered: AtomicBool::new(false),
            sink,
            started: Instant::now(),
            metrics,
        }
    }

    /// Try to make `outcome` the dispatch result.
    pub fn settle(&self, outcome: Outcome) -> bool {
        if self
            .answered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.sink.write_and_close(outcome.render());

        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .counter_inc(DISPATCHES_COUNTER, &[("outcome", outcome.label())], 1);
        self.metrics
            .histogram_observe(LATENCY_HISTOGRAM, &[], elapsed_ms);
        tracing::debug!(outcome = outcome.label(), elapsed_ms, "Dispatch settled");
        true
    }
}
