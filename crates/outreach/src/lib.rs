//! Job application outreach: discovers postings for a curated set of companies, classifies
//! them into career tracks and submits at most one application per company per day under
//! persistent rate limits.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
