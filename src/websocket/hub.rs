//! Live event fan-out
//!
//! One registry, guarded by a single lock, holds every open socket and the
//! reverse index from topic to sockets. `signalements.*` matches every
//! `signalements.{id}`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use super::messages::{ServerMessage, WsEvent};

pub type ConnectionId = String;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub max_connections: usize,
    /// Buffer of the in-process event tap
    pub broadcast_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            broadcast_capacity: 1024,
        }
    }
}

/// One open socket
pub struct ConnectionHandle {
    pub sender: mpsc::UnboundedSender<ServerMessage>,
    /// Set when the client presented a session token
    pub user_id: Option<i64>,
    pub subscriptions: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    sockets: HashMap<ConnectionId, ConnectionHandle>,
    by_topic: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn attach(&mut self, id: &str, topic: &str) {
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(id.to_string());
    }

    fn detach(&mut self, id: &str, topic: &str) {
        let emptied = match self.by_topic.get_mut(topic) {
            Some(ids) => {
                ids.remove(id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_topic.remove(topic);
        }
    }

    /// Sockets listening on the exact topic or on its `prefix.*` wildcard
    fn audience(&self, topic: &str) -> HashSet<&ConnectionId> {
        let wildcard = topic.split_once('.').map(|(prefix, _)| format!("{}.*", prefix));
        [Some(topic.to_string()), wildcard]
            .into_iter()
            .flatten()
            .filter_map(|key| self.by_topic.get(&key))
            .flatten()
            .collect()
    }

    fn fan_out(&self, event: &WsEvent) -> usize {
        let reached = self
            .audience(&event.topic)
            .into_iter()
            .filter_map(|id| self.sockets.get(id))
            .filter(|socket| socket.sender.send(event.message.clone()).is_ok())
            .count();
        if reached > 0 {
            tracing::trace!(topic = %event.topic, reached, "Event delivered");
        }
        reached
    }
}

pub struct ConnectionHub {
    registry: Arc<RwLock<Registry>>,
    tap: broadcast::Sender<WsEvent>,
    /// Published events, delivered in order by a single dispatcher task
    outbound: mpsc::UnboundedSender<WsEvent>,
    /// Receiving end until the dispatcher is started
    pending: Mutex<Option<mpsc::UnboundedReceiver<WsEvent>>>,
    config: HubConfig,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        let (tap, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let (outbound, queue) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            tap,
            outbound,
            pending: Mutex::new(Some(queue)),
            config,
        }
    }

    /// Adds a socket; refused once `max_connections` are open
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
        user_id: Option<i64>,
    ) -> Result<ConnectionId, HubError> {
        let mut registry = self.registry.write().await;
        if registry.sockets.len() >= self.config.max_connections {
            return Err(HubError::TooManyConnections(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        registry.sockets.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                user_id,
                subscriptions: HashSet::new(),
            },
        );
        tracing::info!(connection_id = %id, user_id = ?user_id, open = registry.sockets.len(), "Socket opened");
        Ok(id)
    }

    pub async fn unregister(&self, id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(socket) = registry.sockets.remove(id) {
            for topic in &socket.subscriptions {
                registry.detach(id, topic);
            }
            tracing::info!(connection_id = %id, "Socket closed");
        }
    }

    /// Returns the topics actually added. Malformed topics and
    /// `users.{id}` of someone else are dropped.
    pub async fn subscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<String>, HubError> {
        let mut registry = self.registry.write().await;
        let user_id = registry
            .sockets
            .get(id)
            .ok_or(HubError::ConnectionNotFound)?
            .user_id;

        let accepted: Vec<String> = topics
            .into_iter()
            .filter(|topic| {
                let ok = is_valid_topic(topic) && may_subscribe(user_id, topic);
                if !ok {
                    tracing::warn!(connection_id = %id, topic = %topic, "Subscription refused");
                }
                ok
            })
            .collect();

        for topic in &accepted {
            registry.attach(id, topic);
        }
        if let Some(socket) = registry.sockets.get_mut(id) {
            socket.subscriptions.extend(accepted.iter().cloned());
        }
        Ok(accepted)
    }

    /// Returns the topics the socket was actually listening on
    pub async fn unsubscribe(&self, id: &str, topics: Vec<String>) -> Result<Vec<String>, HubError> {
        let mut registry = self.registry.write().await;
        let socket = registry
            .sockets
            .get_mut(id)
            .ok_or(HubError::ConnectionNotFound)?;

        let removed: Vec<String> = topics
            .into_iter()
            .filter(|topic| socket.subscriptions.remove(topic))
            .collect();
        for topic in &removed {
            registry.detach(id, topic);
        }
        Ok(removed)
    }

    /// Number of sockets reached
    pub async fn broadcast(&self, event: &WsEvent) -> usize {
        self.registry.read().await.fan_out(event)
    }

    /// Non-async publish for service code. Events reach sockets in publish
    /// order; those published before a runtime exists wait in the queue.
    pub fn publish(&self, event: WsEvent) {
        let _ = self.tap.send(event.clone());
        if self.outbound.send(event).is_ok() {
            self.start_dispatcher();
        }
    }

    fn start_dispatcher(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let queue = match self.pending.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(mut queue) = queue else {
            return;
        };

        let registry = Arc::clone(&self.registry);
        runtime.spawn(async move {
            while let Some(event) = queue.recv().await {
                registry.read().await.fan_out(&event);
            }
        });
        tracing::debug!("Event dispatcher started");
    }

    pub async fn send_to(&self, id: &str, message: ServerMessage) -> Result<(), HubError> {
        let registry = self.registry.read().await;
        let socket = registry.sockets.get(id).ok_or(HubError::ConnectionNotFound)?;
        socket.sender.send(message).map_err(|_| HubError::SendFailed)
    }

    /// Every published event, whatever its topic
    pub fn subscribe_broadcast(&self) -> broadcast::Receiver<WsEvent> {
        self.tap.subscribe()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.sockets.len()
    }

    pub async fn subscription_count(&self, topic: &str) -> usize {
        self.registry
            .read()
            .await
            .by_topic
            .get(topic)
            .map_or(0, HashSet::len)
    }
}

/// signalements.* | signalements.{id} | users.{id} | system
fn is_valid_topic(topic: &str) -> bool {
    if topic == "system" || topic == "signalements.*" {
        return true;
    }
    ["signalements.", "users."].iter().any(|prefix| {
        topic
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    })
}

fn may_subscribe(user_id: Option<i64>, topic: &str) -> bool {
    match topic.strip_prefix("users.") {
        Some(rest) => user_id.is_some_and(|uid| uid.to_string() == rest),
        None => true,
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Connection limit reached ({0})")]
    TooManyConnections(usize),

    #[error("Unknown connection")]
    ConnectionNotFound,

    #[error("Socket closed before the message was sent")]
    SendFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Statut;

    #[test]
    fn test_valid_topics() {
        assert!(is_valid_topic("signalements.*"));
        assert!(is_valid_topic("signalements.12"));
        assert!(is_valid_topic("users.3"));
        assert!(is_valid_topic("system"));

        assert!(!is_valid_topic("signalements."));
        assert!(!is_valid_topic("users.*"));
        assert!(!is_valid_topic("metrics.mood"));
        assert!(!is_valid_topic(""));
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = hub.register(tx, None).await.unwrap();
        assert_eq!(hub.connection_count().await, 1);

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_user_topic_requires_matching_user() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx, Some(3)).await.unwrap();

        let subscribed = hub
            .subscribe(&id, vec!["users.3".to_string(), "users.4".to_string()])
            .await
            .unwrap();
        assert_eq!(subscribed, vec!["users.3"]);

        let (anon_tx, _anon_rx) = mpsc::unbounded_channel();
        let anon = hub.register(anon_tx, None).await.unwrap();
        assert!(hub.subscribe(&anon, vec!["users.3".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let hub = ConnectionHub::new(HubConfig {
            max_connections: 1,
            broadcast_capacity: 16,
        });
        let (tx1, _) = mpsc::unbounded_channel();
        let (tx2, _) = mpsc::unbounded_channel();

        hub.register(tx1, None).await.unwrap();
        let result = hub.register(tx2, None).await;
        assert!(matches!(result, Err(HubError::TooManyConnections(1))));
    }

    #[tokio::test]
    async fn test_wildcard_and_direct_delivery() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let all = hub.register(tx1, None).await.unwrap();
        let one = hub.register(tx2, None).await.unwrap();
        let other = hub.register(tx3, None).await.unwrap();

        hub.subscribe(&all, vec!["signalements.*".to_string()]).await.unwrap();
        hub.subscribe(&one, vec!["signalements.7".to_string()]).await.unwrap();
        hub.subscribe(&other, vec!["signalements.8".to_string()]).await.unwrap();

        let sent = hub
            .broadcast(&WsEvent::status_changed(7, Statut::Nouveau, Statut::EnCours))
            .await;

        assert_eq!(sent, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_published_events_keep_their_order() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx, None).await.unwrap();
        hub.subscribe(&id, vec!["signalements.*".to_string()]).await.unwrap();

        let steps = [
            (Statut::Nouveau, Statut::EnCours),
            (Statut::EnCours, Statut::Termine),
            (Statut::Termine, Statut::EnCours),
            (Statut::EnCours, Statut::Annule),
        ];
        for _ in 0..25 {
            for (old, new) in steps {
                hub.publish(WsEvent::status_changed(7, old, new));
            }
        }

        for _ in 0..25 {
            for (_, expected) in steps {
                let message = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                match message {
                    ServerMessage::StatusChanged { new_status, .. } => assert_eq!(new_status, expected),
                    other => panic!("unexpected message: {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_publish_without_runtime_only_feeds_tap() {
        let hub = ConnectionHub::new(HubConfig::default());
        let mut tap = hub.subscribe_broadcast();

        hub.publish(WsEvent::system("maintenance"));

        assert_eq!(tap.try_recv().unwrap().topic, "system");
    }

    #[tokio::test]
    async fn test_unregister_clears_topic_index() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx, None).await.unwrap();

        hub.subscribe(&id, vec!["signalements.*".to_string()]).await.unwrap();
        assert_eq!(hub.subscription_count("signalements.*").await, 1);

        hub.unregister(&id).await;
        assert_eq!(hub.subscription_count("signalements.*").await, 0);
    }
}
