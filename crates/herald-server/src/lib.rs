//! # herald-server
//!
//! Real-time notification relay over Axum HTTP + `WebSocket`.
//!
//! - `WebSocket` gateway on any non-HTTP path (`/`, `/ws`, ...): clients send
//!   `{"type":"register","userId":"..."}` to bind the connection to an identity
//! - [`ConnectionRegistry`]: identity → live connections, snapshot lookups
//! - [`NotificationDispatcher`]: fan-out to every open connection of each
//!   target, excluding the sender's own connections
//! - `POST /send` trigger, `/health`, and Prometheus `/metrics`
//! - Heartbeat pings, a `max_connections` slot limit, and graceful shutdown
//!   that drains every session

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod trigger;
pub mod websocket;

pub use config::ServerConfig;
pub use dispatch::{DeliveryStats, Dispatched, Notification, NotificationDispatcher};
pub use errors::{ServerError, TriggerError};
pub use registry::{ConnectionRegistry, Registration};
pub use server::NotificationServer;
