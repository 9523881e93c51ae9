//! # vane - Network Verification Core
//!
//! `vane` captures show-command output from a fleet of Arista EOS devices and
//! runs verification test cases against it. Every device is queried in
//! parallel, in JSON and in text, before any test runs; each test case then
//! works on the captured data through a [`testops::TestOps`] context and
//! leaves a YAML result file for the report generator.
//!
//! ## Features
//!
//! - **Two Drivers**: eAPI (JSON-RPC over HTTPS) and an interactive SSH shell,
//!   behind one [`driver::DeviceConn`] trait
//! - **Command Repair**: a batch that fails on one unsupported command is
//!   retried without it ([`dispatch::send_cmds`])
//! - **Parallel Capture**: one Tokio task per device, every failure reported
//! - **Prompt Handling**: SSH sessions track EOS modes with a prompt state machine
//! - **Result Files**: deterministic YAML results plus plain-text verification files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use futures::future::BoxFuture;
//! use vane::config::VaneContext;
//! use vane::fleet::init_duts;
//! use vane::runner::{Suite, TestCase, run_suite};
//! use vane::testops::TestOps;
//!
//! fn test_version<'a>(ops: &'a mut TestOps<'_>) -> BoxFuture<'a, ()> {
//!     Box::pin(async move {
//!         ops.actual_output = ops
//!             .show_output_json("show version")
//!             .and_then(|v| v.get("modelName"))
//!             .cloned()
//!             .unwrap_or_default();
//!         ops.compare_outputs();
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = VaneContext::load(
//!         "definitions.yaml",
//!         "duts.yaml",
//!         &[PathBuf::from("test_definition.yaml")],
//!     )?;
//!     let mut duts = init_duts(&ctx).await?;
//!
//!     let mut suite = Suite::new("test_base.py");
//!     suite.add(TestCase {
//!         name: "test_version",
//!         doc: "TS: Run show version",
//!         run: test_version,
//!     });
//!
//!     let summary = run_suite(&ctx, &suite, &mut duts).await;
//!     println!("{} passed, {} failed", summary.passed, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`config::VaneContext`] - Run parameters, inventory and test definitions
//! - [`driver`] - eAPI and SSH connection drivers
//! - [`fleet`] - Connects every device and captures the command list
//! - [`testops::TestOps`] - Per-test context and result persistence
//! - [`error::VaneError`] - Crate level error type

pub mod config;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod fleet;
pub mod report;
pub mod runner;
pub mod templates;
pub mod testops;
pub mod worker;

pub use config::VaneContext;
pub use error::{Result, VaneError};
