//! Suite runner binding test functions to devices.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{error, info};

use crate::config::VaneContext;
use crate::report::ResultRecord;
use crate::testops::{TestOps, parse_test_steps};
use crate::worker::DutRecord;

/// Async test body. The returned future borrows the context it is given.
pub type TestFn = for<'a, 'b> fn(&'a mut TestOps<'b>) -> BoxFuture<'a, ()>;

/// A test function and the documentation its test steps come from.
#[derive(Clone)]
pub struct TestCase {
    /// Must match a test case name of the suite's parameter table.
    pub name: &'static str,
    pub doc: &'static str,
    pub run: TestFn,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub struct Suite {
    /// Must match a suite name of the test definitions.
    pub name: String,
    pub tests: Vec<TestCase>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tests: Vec::new(),
        }
    }

    pub fn add(&mut self, test: TestCase) {
        self.tests.push(test)
    }
}

/// A (test case, device) pair that produced no result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError {
    pub test_case: String,
    pub dut: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct SuiteSummary {
    pub suite: String,
    pub passed: usize,
    pub failed: usize,
    pub errors: Vec<TestError>,
    pub records: Vec<ResultRecord>,
}

impl SuiteSummary {
    pub fn errored(&self) -> usize {
        self.errors.len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "test panicked".to_string()
    }
}

/// Runs every selected test case of `suite` on every device.
///
/// A test that cannot start or whose result cannot be written is recorded
/// in [`SuiteSummary::errors`]; the suite goes on. Such a pair writes no
/// result or verification file, so the report generator never sees it. A
/// panicking test body is recorded as a failed result carrying the panic
/// message.
pub async fn run_suite(ctx: &VaneContext, suite: &Suite, duts: &mut [DutRecord]) -> SuiteSummary {
    let mut summary = SuiteSummary {
        suite: suite.name.clone(),
        ..SuiteSummary::default()
    };
    if !ctx.parameters.test_suites.matches(&suite.name) {
        info!("Skipping unselected suite {}", suite.name);
        return summary;
    }

    for test in &suite.tests {
        if !ctx.parameters.test_cases.matches(test.name) {
            info!("Skipping unselected test case {}", test.name);
            continue;
        }
        let steps = parse_test_steps(test.doc);
        for dut in duts.iter_mut() {
            let dut_name = dut.name().to_string();
            let mut ops = match TestOps::new(ctx, &suite.name, test.name, steps.clone(), dut) {
                Ok(ops) => ops,
                Err(err) => {
                    error!("{dut_name}: {} not started: {err}", test.name);
                    summary.errors.push(TestError {
                        test_case: test.name.to_string(),
                        dut: dut_name,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let outcome = AssertUnwindSafe((test.run)(&mut ops)).catch_unwind().await;
            if let Err(payload) = outcome {
                let msg = panic_message(payload.as_ref());
                error!("{dut_name}: {} panicked: {msg}", test.name);
                ops.test_result = false;
                ops.output_msg = format!("test body panicked: {msg}");
            }

            match ops.post_testcase() {
                Ok(record) => {
                    if record.test_result {
                        summary.passed += 1;
                    } else {
                        summary.failed += 1;
                    }
                    summary.records.push(record);
                }
                Err(err) => {
                    error!("{dut_name}: result of {} not written: {err}", test.name);
                    summary.errors.push(TestError {
                        test_case: test.name.to_string(),
                        dut: dut_name,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    info!(
        "Suite {}: {} passed, {} failed, {} errored",
        summary.suite,
        summary.passed,
        summary.failed,
        summary.errored()
    );
    summary
}
