//! Application-level orchestration utilities.
//!
//! This module owns the run lifecycle (submit/cancel/clear through a single controller actor)
//! and post-run processing such as report building and exports. UI/CLI layers call into this
//! module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{spawn_controller, RunController};
pub(crate) use post_process::{build_report, export_json};

#[cfg(feature = "tui")]
pub(crate) use controller::{ControllerHandle, SubscriptionId};
#[cfg(feature = "tui")]
pub(crate) use post_process::{default_export_name, process_run_completion};
