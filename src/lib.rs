//! LAN file relay: devices register over WebSocket, senders upload over HTTP
//! and the relay streams each file to the selected receivers in chunks.

pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod tasks;
pub mod transfer;
