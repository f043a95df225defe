//! WebSocket Real-Time Updates
//!
//! Pushes signalement events and user notifications to connected clients.
//!
//! ## Architecture
//!
//! - **ConnectionHub**: Manages active connections and subscriptions
//! - **Handler**: Handles the WebSocket upgrade and message processing
//! - **Messages**: Client and server message formats
//!
//! ## Topics
//!
//! - `signalements.*` - every signalement event
//! - `signalements.{id}` - events of one signalement
//! - `users.{id}` - notifications of one user (requires `?token=`)
//! - `system` - server announcements
//!
//! ## Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8080/ws?token=' + token);
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 'subscribe', topics: ['signalements.*', 'users.12']}));
//! };
//! ```

mod handler;
mod hub;
mod messages;

pub use handler::websocket_handler;
pub use hub::{ConnectionHub, HubConfig, HubError};
pub use messages::{ClientMessage, ServerMessage, WsEvent};
