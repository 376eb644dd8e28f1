//! The Agent Protocol: file contract, phase state machine, and staleness
//! detection for the sandboxed agent a workflow drives.

pub mod agent_provider;
pub mod control;
pub mod files;
pub mod staleness;

pub use agent_provider::AgentProvider;
pub use control::ControlPaths;
pub use files::{retry_read_json, write_json_atomic, ProtocolError};
pub use staleness::is_stale;
