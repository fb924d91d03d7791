use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::protocol::EVENT_SCRIPT_LOADED;
use relay_core::ConnectionId;
use relay_telemetry::MetricsRecorder;

use crate::session::{Session, SessionHandle};

/// Chat message shown to every player when they connect.
pub const GREETING: &str = "Connected to Command Server";

pub(crate) const SESSIONS_GAUGE: &str = "relay.sessions";

/// Registry of connected game-client sessions, keyed by player name.
///
/// One mutex serializes every insert, removal and snapshot, so a snapshot
/// is always a consistent view of the connected set at that instant.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<dyn SessionHandle>>>,
    metrics: Arc<MetricsRecorder>,
}

impl SessionRegistry {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Insert (or replace) the session for `name`, greet the player and
    /// subscribe to script-load notifications.
    pub fn register(&self, name: impl Into<String>, handle: Arc<dyn SessionHandle>) {
        let name = name.into();
        let (replaced, count) = {
            let mut sessions = self.sessions.lock();
            let replaced = sessions.insert(name.clone(), Arc::clone(&handle));
            (replaced, sessions.len())
        };
        self.metrics.gauge_set(SESSIONS_GAUGE, &[], count as f64);

        if let Some(old) = replaced {
            tracing::warn!(
                player = %name,
                old_connection_id = %old.connection_id(),
                "Replaced session registered under the same name"
            );
        }
        tracing::info!(player = %name, connection_id = %handle.connection_id(), "Connected");

        if let Err(e) = handle.send_message(GREETING) {
            tracing::warn!(player = %name, error = %e, "Failed to send greeting");
        }
        if let Err(e) = handle.subscribe(EVENT_SCRIPT_LOADED) {
            tracing::warn!(player = %name, error = %e, "Failed to subscribe to script events");
        }
    }

    /// Remove the session for `name` if present.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.remove_where(name, |_| true);
        if removed {
            tracing::info!(player = %name, "Disconnected");
        }
        removed
    }

    /// Remove the session for `name` only if it still belongs to
    /// `connection_id`. A stale disconnect must not evict a newer
    /// connection that reused the name.
    pub fn deregister_connection(&self, name: &str, connection_id: &ConnectionId) -> bool {
        let removed = self.remove_where(name, |h| h.connection_id() == connection_id);
        if removed {
            tracing::info!(player = %name, connection_id = %connection_id, "Disconnected");
        } else {
            tracing::debug!(
                player = %name,
                connection_id = %connection_id,
                "Disconnect for a connection no longer registered"
            );
        }
        removed
    }

    fn remove_where(&self, name: &str, matches: impl Fn(&Arc<dyn SessionHandle>) -> bool) -> bool {
        let count = {
            let mut sessions = self.sessions.lock();
            if !sessions.get(name).is_some_and(&matches) {
                return false;
            }
            sessions.remove(name);
            sessions.len()
        };
        self.metrics.gauge_set(SESSIONS_GAUGE, &[], count as f64);
        true
    }

    /// Copy of every registered session, taken under the registry lock.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .iter()
            .map(|(name, handle)| Session {
                name: name.clone(),
                handle: Arc::clone(handle),
            })
            .collect()
    }

    /// Registered player names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockSession};
    use std::collections::HashSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MetricsRecorder::new()))
    }

    #[test]
    fn register_and_deregister() {
        let registry = registry();
        assert!(registry.is_empty());

        registry.register("Steve", MockSession::new(MockBehavior::Silent));
        registry.register("Alex", MockSession::new(MockBehavior::Silent));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Alex", "Steve"]);

        assert!(registry.deregister("Steve"));
        assert_eq!(registry.len(), 1);

        assert!(!registry.deregister("Steve"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_greets_and_subscribes() {
        let registry = registry();
        let session = MockSession::new(MockBehavior::Silent);
        registry.register("Steve", session.clone());

        assert_eq!(*session.messages.lock(), vec![GREETING.to_string()]);
        assert_eq!(*session.subscriptions.lock(), vec!["ScriptLoaded".to_string()]);
    }

    #[test]
    fn register_same_name_overwrites() {
        let registry = registry();
        let first = MockSession::new(MockBehavior::Silent);
        let second = MockSession::new(MockBehavior::Silent);
        registry.register("Steve", first);
        registry.register("Steve", second.clone());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].handle.connection_id(), second.connection_id());
    }

    #[test]
    fn stale_disconnect_keeps_newer_connection() {
        let registry = registry();
        let first = MockSession::new(MockBehavior::Silent);
        let second = MockSession::new(MockBehavior::Silent);
        registry.register("Steve", first.clone());
        registry.register("Steve", second.clone());

        assert!(!registry.deregister_connection("Steve", first.connection_id()));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister_connection("Steve", second.connection_id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = registry();
        registry.register("Steve", MockSession::new(MockBehavior::Silent));
        let snapshot = registry.snapshot();

        registry.deregister("Steve");
        registry.register("Alex", MockSession::new(MockBehavior::Silent));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "Steve");
    }

    #[test]
    fn sessions_gauge_tracks_count() {
        let metrics = Arc::new(MetricsRecorder::new());
        let registry = SessionRegistry::new(Arc::clone(&metrics));
        registry.register("Steve", MockSession::new(MockBehavior::Silent));
        registry.register("Alex", MockSession::new(MockBehavior::Silent));
        assert_eq!(metrics.gauge_get(SESSIONS_GAUGE, &[]), 2.0);

        registry.deregister("Alex");
        assert_eq!(metrics.gauge_get(SESSIONS_GAUGE, &[]), 1.0);
    }

    #[test]
    fn concurrent_mutation_and_snapshots() {
        use std::thread;

        let registry = Arc::new(registry());
        let mut handles = vec![];

        for t in 0..8 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let name = format!("player-{t}-{}", i % 10);
                    r.register(name.clone(), MockSession::new(MockBehavior::Silent));
                    let snapshot = r.snapshot();
                    let unique: HashSet<&str> = snapshot.iter().map(|s| s.name.as_str()).collect();
                    assert_eq!(unique.len(), snapshot.len(), "duplicate identity in snapshot");
                    if i % 3 == 0 {
                        r.deregister(&name);
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        // Every thread ends with names it registered last and never removed.
        let names: HashSet<String> = registry.names().into_iter().collect();
        assert_eq!(names.len(), registry.len());
        assert_eq!(registry.snapshot().len(), registry.len());
    }
}
