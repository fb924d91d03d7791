use std::sync::Arc;
use std::time::Duration;

use relay_core::protocol::status_message;
use relay_telemetry::MetricsRecorder;
use serde_json::Value;

use crate::guard::TimeoutGuard;
use crate::race::{Outcome, Race};
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::sink::{output_sink, SinkReader};

/// Default per-attempt deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) const ATTEMPTS_COUNTER: &str = "relay.attempts";
pub(crate) const SEND_FAILURES_COUNTER: &str = "relay.send_failures";

/// Fans a command out to every connected session and settles on the first
/// answer, the first timeout, or "no targets".
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        timeout: Duration,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            registry,
            timeout,
            metrics,
        }
    }

    /// Start a dispatch and return its response body immediately.
    ///
    /// Must be called from within a tokio runtime; all attempts run as
    /// spawned tasks.
    pub fn dispatch(&self, command: &str) -> SinkReader {
        let (sink, reader) = output_sink();
        let race = Arc::new(Race::new(sink, Arc::clone(&self.metrics)));

        let targets = self.registry.snapshot();
        if targets.is_empty() {
            tracing::info!(command, "No client connected");
            tokio::spawn(async move {
                race.settle(Outcome::NoTargets);
            });
            return reader;
        }

        tracing::debug!(command, targets = targets.len(), "Dispatching command");
        let command: Arc<str> = Arc::from(command);
        for session in targets {
            self.metrics.counter_inc(ATTEMPTS_COUNTER, &[], 1);
            tokio::spawn(run_attempt(
                Arc::clone(&command),
                session,
                Arc::clone(&race),
                self.timeout,
                Arc::clone(&self.metrics),
            ));
        }
        reader
    }
}

/// One (command, session) attempt racing its own timeout guard.
async fn run_attempt(
    command: Arc<str>,
    session: Session,
    race: Arc<Race>,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
) {
    let guard = TimeoutGuard::arm(Arc::clone(&race), timeout);

    let reply = match session.handle.send_command(&command) {
        Ok(reply) => reply,
        Err(e) => {
            metrics.counter_inc(SEND_FAILURES_COUNTER, &[("kind", e.error_kind())], 1);
            tracing::warn!(player = %session.name, command = %command, error = %e, "Failed to send command");
            // A send failure is not an answer; only the guard can settle for us.
            guard.expire().await;
            return;
        }
    };

    tokio::select! {
        result = reply => match result {
            Ok(payload) => {
                log_result(&session.name, &command, &payload);
                if !race.settle(Outcome::Responded(payload)) {
                    tracing::debug!(player = %session.name, command = %command, "Result superseded");
                }
            }
            Err(_) => {
                tracing::warn!(player = %session.name, command = %command, "Session closed before replying");
                guard.expire().await;
            }
        },
        _ = guard.expire() => {
            tracing::debug!(player = %session.name, command = %command, "Attempt timed out");
        }
    }
}

pub(crate) fn log_result(player: &str, command: &str, payload: &Value) {
    match status_message(payload) {
        Some(message) => tracing::info!(player, command, result = message, "Command result"),
        None => tracing::info!(player, command, result = %payload, "Command result"),
    }
}
