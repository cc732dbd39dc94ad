//! Connected client sessions and event fan-out.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ble2ws_core::Event;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::session::ClientSession;

/// Registry of connected clients indexed by client id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session.
    pub async fn add(&self, session: Arc<ClientSession>) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.id.clone(), session);
    }

    /// Remove a session by id.
    pub async fn remove(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.write().await.remove(client_id)
    }

    /// Look up a session.
    pub async fn get(&self, client_id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(client_id).cloned()
    }

    /// Number of connected clients.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of every session.
    pub async fn all(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Offer `event` to each distinct recipient. Returns how many accepted it.
    ///
    /// Events never wait for queue space. A client that has dropped too many
    /// is closed.
    pub async fn send_event(&self, recipients: &[String], event: &Event) -> usize {
        let json = match event.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };
        counter!("ble_events_total", "type" => event.event_type.name()).increment(1);

        let unique: BTreeSet<&str> = recipients.iter().map(String::as_str).collect();
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for id in unique {
            let Some(session) = sessions.get(id) else {
                continue;
            };
            if session.offer(json.clone()) {
                delivered += 1;
                continue;
            }
            counter!("ws_event_drops_total").increment(1);
            if session.over_drop_limit() && !session.is_closed() {
                warn!(
                    client_id = %session.id,
                    dropped = session.dropped_events(),
                    "client too slow, disconnecting"
                );
                session.close();
            }
        }
        debug!(event_type = %event.event_type, delivered, "event fan-out");
        delivered
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble2ws_core::MessageType;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_session(id: &str, capacity: usize) -> (Arc<ClientSession>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientSession::new(id.into(), tx)), rx)
    }

    fn event() -> Event {
        Event::new(
            MessageType::DidDisconnectPeripheral,
            json!({"address": "AA", "reason": "link_lost"}),
        )
    }

    #[tokio::test]
    async fn add_remove_count() {
        let registry = SessionRegistry::new();
        let (a, _ra) = make_session("a", 4);
        registry.add(a).await;
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.get("a").await.is_some());
        assert!(registry.remove("a").await.is_some());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn send_event_reaches_only_recipients_once() {
        let registry = SessionRegistry::new();
        let (a, mut ra) = make_session("a", 4);
        let (b, mut rb) = make_session("b", 4);
        registry.add(a).await;
        registry.add(b).await;

        let delivered = registry
            .send_event(&["a".into(), "a".into(), "ghost".into()], &event())
            .await;
        assert_eq!(delivered, 1);
        let msg = ra.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], 22);
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_client_closed_after_drop_limit() {
        let registry = SessionRegistry::new();
        let (slow, _rx) = make_session("slow", 1);
        registry.add(slow.clone()).await;
        for _ in 0..=crate::session::MAX_EVENT_DROPS + 1 {
            let _ = registry.send_event(&["slow".into()], &event()).await;
        }
        assert!(slow.is_closed());
    }
}
