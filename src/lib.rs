//! Merrymaker core: the job-processing backbone for the instrumented
//! browser-scanning platform. This crate owns the job queue, the recurring
//! scheduler, the reaper, and the rules-evaluation/alert-dispatch pipeline.
//! Everything else (the HTTP API, the UI, the browser worker itself) is an
//! external collaborator that talks to the types exposed here.

pub mod common;
pub mod config;
pub mod error;
pub mod kernel;
pub mod jobs;
pub mod scheduler;
pub mod reaper;
pub mod rules;
pub mod failure_notifier;
pub mod site;

pub use config::Config;
pub use error::{ErrorKind, MerrymakerError};
