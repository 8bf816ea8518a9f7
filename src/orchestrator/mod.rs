//! Application-level orchestration utilities.
//!
//! This module owns the workbench (catalog, executor and on-disk stores behind
//! name-based requests) and post-run processing such as auto-save and exports.
//! CLI layers call into this module to keep responsibilities separated.

mod post_process;
mod workbench;

pub(crate) use post_process::{
    auto_save, export_csv, export_json, process_run_completion, PostRunOptions,
};
pub(crate) use workbench::{RunRequest, Workbench, WorkspacePaths};
