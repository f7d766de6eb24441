//! MERIDIAN node
//!
//! The HTTP façade and the runtime that wires the coordinator, the
//! proposer and the in-process validators into one serving process.

pub mod api;
pub mod runtime;

pub use api::{create_router, start_api_server, ApiResponse};
pub use runtime::{NodeBuilder, NodeRuntime};
