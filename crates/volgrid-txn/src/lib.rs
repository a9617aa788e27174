//! Distributed transaction framework for volgrid.
//!
//! A transaction is an ordered plan of named steps, each targeted at a
//! set of nodes, bracketed by a cluster-wide lock acquire/release. The
//! engine dispatches steps in order (parallel across nodes within one
//! step), streams per-node results back to the initiator, rolls back on
//! failure, and always releases the lock.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod dispatch;
pub mod registry;
pub mod step;
pub mod txn;

pub use context::{ContextSnapshot, NodeResult, TxnCtx};
pub use dispatch::{execute_local, LocalDispatcher, StepDispatcher, StepRequest, StepResponse};
pub use registry::{Registry, StepFn, StepFuture};
pub use step::{create_lock_steps, Step, DEFAULT_STEP_TIMEOUT, LOCK_STEP, UNLOCK_STEP};
pub use txn::{Txn, TxnOptions, TxnState};
