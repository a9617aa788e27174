//! REST surface and workflow commands for volgrid.
//!
//! Handlers decode a request, build the initial metadata record, lay out
//! a transaction plan and hand it to the engine; step functions carry
//! the per-node work and are registered here at process start.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
pub mod steps;
pub mod types;

pub use error::ApiError;
pub use router::create_router;
pub use state::{AppState, Services};
pub use steps::{register_steps, StepDeps};
