//! voxflow-gateway: WebSocket front door for the response pipeline.
//!
//! Admits streams under backpressure limits, assembles two-phase requests,
//! and relays ordered response units back to the client.

pub mod admission;
pub mod connection;
pub mod server;
pub mod state;

pub use server::start_gateway;
pub use state::GatewayState;
