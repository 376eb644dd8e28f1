//! Activity implementations behind the `TransformRun` reconciler: clone,
//! execute (via the sandbox/protocol crates), verify, diff, PR creation,
//! report collection, and chat notification.

pub mod clone;
pub mod execute;
pub mod notify;
pub mod pr;
pub mod report;
pub mod retry;
pub mod validation;
pub mod verify;

pub use retry::with_retry;
