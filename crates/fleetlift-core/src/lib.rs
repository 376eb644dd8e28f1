//! Core data model, error taxonomy, and configuration for Fleetlift.

pub mod config;
pub mod error;
pub mod model;

pub use error::{FleetliftError, Result};
