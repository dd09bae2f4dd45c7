//! HTTP binding for fluxgate.
//!
//! Registers one axum route per loaded flux definition and owns the server
//! lifecycle: plugins are set up by the engine before any route exists,
//! requests build a fresh [`FlowContext`](fluxgate_engine::FlowContext)
//! and delegate to the executor, and shutdown tears plugins down exactly
//! once.

pub mod router;
pub mod server;

pub use router::build_router;
pub use server::{Server, ServerError};
