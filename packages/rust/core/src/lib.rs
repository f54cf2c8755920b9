//! Core pipeline orchestration for schemalib.
//!
//! This crate ties together fetching, graph building, usage sampling,
//! automation and security collection, annotation and corpus emission into
//! the end-to-end [`build_library`] workflow.

pub mod annotate;
pub mod automation;
pub mod pipeline;
mod remote;
pub mod security;

pub use annotate::{AnnotateReport, StageData, annotate, write_annotations};
pub use automation::{AUTOMATION_OP, AutomationCollector, trigger_line_counts};
pub use pipeline::{BuildConfig, BuildReport, ProgressReporter, SilentProgress, build_library};
pub use remote::{Collected, IN_BATCH_SIZE, RemoteContext};
pub use security::{SECURITY_OP, SecurityCollector};
