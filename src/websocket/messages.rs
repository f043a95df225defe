//! WebSocket Message Types
//!
//! Messages exchanged between connected clients (mobile app, back-office)
//! and the Voirie server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Notification, NotificationType, Signalement, Statut};

/// Client → server frames
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to topics (e.g. "signalements.*", "users.12")
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    /// Keepalive
    Ping,
}

/// Server → client frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<i64>,
    },
    Subscribed { topics: Vec<String> },
    Unsubscribed { topics: Vec<String> },
    /// A signalement was reported
    SignalementCreated {
        signalement_id: i64,
        latitude: f64,
        longitude: f64,
        description: String,
        status: Statut,
        date_signalement: DateTime<Utc>,
    },
    /// A signalement moved to another status
    StatusChanged {
        signalement_id: i64,
        old_status: Statut,
        new_status: Statut,
        changed_at: DateTime<Utc>,
    },
    /// A notification addressed to the subscribed user
    Notification {
        id: i64,
        kind: NotificationType,
        title: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signalement_id: Option<i64>,
        created_at: DateTime<Utc>,
    },
    /// Server-wide announcement
    System { message: String },
    Pong,
    /// Error message
    Error { message: String },
}

/// A frame addressed to a topic
#[derive(Debug, Clone)]
pub struct WsEvent {
    /// Topic this event belongs to (e.g. "signalements.42")
    pub topic: String,
    pub message: ServerMessage,
}

impl WsEvent {
    pub fn signalement_created(s: &Signalement) -> Self {
        Self {
            topic: format!("signalements.{}", s.id),
            message: ServerMessage::SignalementCreated {
                signalement_id: s.id,
                latitude: s.latitude,
                longitude: s.longitude,
                description: s.description.clone(),
                status: s.status,
                date_signalement: s.date_signalement,
            },
        }
    }

    pub fn status_changed(signalement_id: i64, old_status: Statut, new_status: Statut) -> Self {
        Self {
            topic: format!("signalements.{}", signalement_id),
            message: ServerMessage::StatusChanged {
                signalement_id,
                old_status,
                new_status,
                changed_at: Utc::now(),
            },
        }
    }

    /// Delivered on the recipient's `users.{id}` topic
    pub fn notification(n: &Notification) -> Self {
        Self {
            topic: format!("users.{}", n.user_id),
            message: ServerMessage::Notification {
                id: n.id,
                kind: n.notification_type,
                title: n.title.clone(),
                message: n.message.clone(),
                signalement_id: n.signalement_id,
                created_at: n.created_at,
            },
        }
    }

    pub fn system(message: &str) -> Self {
        Self {
            topic: "system".to_string(),
            message: ServerMessage::System {
                message: message.to_string(),
            },
        }
    }
}
