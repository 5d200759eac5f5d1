//! Resilient agent invocation.
//!
//! Drives the external AI coding-agent subprocess: pseudo-terminal wrapping,
//! concurrent output readers, a hard deadline, and transparent recovery from
//! expired OAuth credentials.

pub mod auth;
pub mod invoker;

pub use auth::{CredentialManager, CredentialRefresher};
pub use invoker::{AgentConfig, AgentInvoker, InvocationResult, InvokeOptions};
