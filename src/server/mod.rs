//! Bridge server implementation
//!
//! Handles the local publish entrypoint, the realtime token service and health checks.

mod bridge;

pub use bridge::{create_router, run_bridge_server, BridgeConfig, BridgeState};
