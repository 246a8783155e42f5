//! HTTP API.
//!
//! Routes are versioned under `/api/v0`; the OpenAPI document is served
//! next to a Swagger UI for exploration.

mod server;
mod v0;

pub use server::{SharedState, router, serve};
