//! Core types for the volgrid cluster daemon: the cluster metadata model,
//! the error taxonomy, configuration and the event bus.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod options;
pub mod types;

pub use config::Config;
pub use error::{Error, ErrorCode, Result};
pub use events::{ClusterEvent, EventBus};
