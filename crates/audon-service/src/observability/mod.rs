//! Observability for the Audon service.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
