//! The reconciler layer: turns `TransformRun`/`TransformGroupRun` CRDs into
//! running workflows by driving `fleetlift-activities` through the phase
//! state machines in [`phases`].

pub mod classify;
pub mod context;
pub mod crds;
pub mod dispatch;
pub mod driver;
pub mod phases;
pub mod signals;
pub mod transform;

pub use context::Context;
pub use crds::{TransformGroupRun, TransformGroupRunSpec, TransformGroupRunStatus};
pub use crds::{TransformRun, TransformRunSpec, TransformRunStatus};
pub use driver::Driver;
