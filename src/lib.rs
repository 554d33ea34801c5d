//! edgelink core library
//!
//! The core broker of an edge gateway: it accepts device-protocol connectors
//! over WebSocket, a cloud control plane over MQTT, and routes JSON-RPC
//! commands between the two while mirroring device state into a durable
//! store.

pub mod broker;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod cron;
pub mod dom;
pub mod jsonrpc;
pub mod logging;
pub mod mqtt;
pub mod scripts;
pub mod server;
pub mod store;
