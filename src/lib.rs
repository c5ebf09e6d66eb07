//! Authenticated WebSocket gateway multiplexing real-time services (echo,
//! container log streaming, presence/chat rooms, resume-review notifications)
//! over a single host, bridged to RabbitMQ for cross-service events.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod message;
pub mod mq;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod websocket;
