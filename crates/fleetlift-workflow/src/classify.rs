//! Maps each activity crate's specific error enum onto the shared error
//! taxonomy (`FleetliftError`), the boundary where the workflow layer
//! decides retriability. Activities stay leaf functions that don't know
//! about retry policy; this module is the only place that does the
//! classifying.

use fleetlift_activities::clone::CloneError;
use fleetlift_activities::execute::ExecuteError;
use fleetlift_activities::pr::PrError;
use fleetlift_activities::report::ReportError;
use fleetlift_activities::verify::VerifyError;
use fleetlift_core::FleetliftError;

pub fn clone_err(e: CloneError) -> FleetliftError {
    let retriable = matches!(
        e,
        CloneError::Sandbox(_) | CloneError::CloneFailed { .. } | CloneError::SetupFailed { .. }
    );
    if retriable {
        FleetliftError::Infrastructure(e.to_string())
    } else {
        FleetliftError::Validation(e.to_string())
    }
}

pub fn execute_err(e: ExecuteError) -> FleetliftError {
    match e {
        ExecuteError::Sandbox(s) => FleetliftError::Infrastructure(s.to_string()),
        ExecuteError::Protocol(p) => FleetliftError::Infrastructure(p.to_string()),
        ExecuteError::Stale => FleetliftError::Staleness("agent status went stale".to_string()),
    }
}

pub fn verify_err(e: VerifyError) -> FleetliftError {
    match e {
        VerifyError::Sandbox(s) => FleetliftError::Infrastructure(s.to_string()),
        VerifyError::Failed {
            repo,
            command,
            exit_code,
            stderr,
        } => FleetliftError::Application {
            exit_code,
            message: format!("verifier '{command}' failed in {repo}: {stderr}"),
        },
    }
}

pub fn pr_err(e: PrError) -> FleetliftError {
    let retriable = matches!(e, PrError::Sandbox(_) | PrError::GitHub(_));
    if retriable {
        FleetliftError::Infrastructure(e.to_string())
    } else {
        FleetliftError::Validation(e.to_string())
    }
}

pub fn report_err(e: ReportError) -> FleetliftError {
    match e {
        ReportError::Sandbox(s) => FleetliftError::Infrastructure(s.to_string()),
        ReportError::NotFound(_) | ReportError::Io(_) => FleetliftError::Partial(e.to_string()),
    }
}
