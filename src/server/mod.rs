//! Connector-facing server.

pub mod ws;

pub use ws::Hub;
