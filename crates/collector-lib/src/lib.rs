//! Telemetry collection for PTP grand master nodes
//!
//! This crate provides the core functionality for:
//! - Running tagged shell scripts in cluster containers and debug pods
//! - Polling the E810 NIC, DPLL, GNSS receiver and PTP management client
//! - Following daemon logs without duplicating overlapping windows
//! - Verifying the node environment against the supported baseline
//! - Detecting the configured PTP interfaces

pub mod callbacks;
pub mod clients;
pub mod collectors;
pub mod detect;
pub mod devices;
pub mod error;
pub mod fetcher;
pub mod loglines;
pub mod runner;
pub mod snapshot;
pub mod status;
pub mod utils;
pub mod validations;
pub mod verify;

pub use callbacks::{Callback, FileCallback, OutputFormat, Reportable};
pub use clients::{Clientset, ExecContext};
pub use error::{exit_code_for, CollectorError, ExitCode, Result};
pub use runner::{CollectorRunner, RunnerConfig};
pub use status::{CollectorHealth, StatusRegistry};
