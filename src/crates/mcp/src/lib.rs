//! Tool-server connection manager
//!
//! Maintains the lifecycle of external tool servers (register → connect →
//! discover → call → disconnect → unregister) over three transports:
//! subprocess stdio, HTTP, and WebSocket. Servers speak a JSON-RPC 2.0
//! dialect with correlated request ids, request deadlines, and asynchronous
//! `*_changed` notifications that refresh the capability caches.
//!
//! The [`McpManager`] exclusively owns each server's transport and protocol
//! client; callers hold only the server id.

pub mod client;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod protocol;
pub mod testing;
pub mod transport;
pub mod types;

pub use client::{ClientEvent, ProtocolClient};
pub use error::{McpError, Result};
pub use manager::{McpConfig, McpManager, RegisterServer, ServerNotification};
pub use persistence::ServerStore;
pub use transport::{Transport, TransportConfig, TransportFactory, TransportHandle};
pub use types::{
    RegisteredServer, ServerInfo, ServerStatus, ToolCallResult, ToolDefinition,
};
