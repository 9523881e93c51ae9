//! Per-test context.
//!
//! A [`TestOps`] is built for one test case on one device, handed to the
//! test body, and consumed by [`TestOps::post_testcase`], which persists the
//! outcome. Construction fails when a show command the test case declares
//! was never captured on the device, so test bodies can index captured
//! output without checking.

use log::{debug, info};
use serde_json::Value;

use crate::config::{TestCaseParams, VaneContext};
use crate::dispatch::send_cmds;
use crate::driver::{Encoding, result_text};
use crate::error::{Result, VaneError};
use crate::report::{self, ResultRecord};
use crate::worker::{CommandCapture, DutRecord, NeighborInterface};

/// Marker that starts a test step line in a test case's documentation.
const TEST_STEP_MARKER: &str = "TS:";

/// Extracts the `TS:` lines of a test case's documentation, in order.
pub fn parse_test_steps(doc: &str) -> Vec<String> {
    doc.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(TEST_STEP_MARKER))
        .map(|step| step.trim().to_string())
        .collect()
}

pub struct TestOps<'a> {
    ctx: &'a VaneContext,
    dut: &'a mut DutRecord,
    suite: String,
    /// Private copy of the declared parameters.
    params: TestCaseParams,

    pub expected_output: Value,
    pub actual_output: Value,
    pub output_msg: String,
    pub comment: String,
    pub test_result: bool,
    pub actual_results: Vec<Value>,
    pub expected_results: Vec<Value>,
    pub test_steps: Vec<String>,

    show_cmds: Vec<String>,
    show_cmd_txts: Vec<String>,
}

impl<'a> TestOps<'a> {
    /// Resolves `test_case` in `suite` and checks its show commands were
    /// captured on `dut`.
    pub fn new(
        ctx: &'a VaneContext,
        suite: &str,
        test_case: &str,
        test_steps: Vec<String>,
        dut: &'a mut DutRecord,
    ) -> Result<Self> {
        let not_found = || VaneError::TestCaseNotFound {
            suite: suite.to_string(),
            test_case: test_case.to_string(),
        };
        let params = ctx
            .suite(suite)
            .and_then(|s| s.find(test_case))
            .cloned()
            .ok_or_else(not_found)?;

        let declared = params.declared_show_cmds();
        let mut show_cmd_txts = Vec::with_capacity(declared.len());
        for cmd in &declared {
            let Some(capture) = dut.output.get(cmd) else {
                return Err(VaneError::MissingShowCommand {
                    test_case: test_case.to_string(),
                    dut: dut.name().to_string(),
                    command: cmd.clone(),
                });
            };
            show_cmd_txts.push(capture.text.clone());
        }
        debug!("{}: starting {} in {}", dut.name(), test_case, suite);

        Ok(Self {
            ctx,
            dut,
            suite: suite.to_string(),
            expected_output: params.expected_output.clone(),
            comment: params.comment.clone().unwrap_or_default(),
            params,
            actual_output: Value::Null,
            output_msg: String::new(),
            test_result: false,
            actual_results: Vec::new(),
            expected_results: Vec::new(),
            test_steps,
            show_cmds: declared,
            show_cmd_txts,
        })
    }

    pub fn dut_name(&self) -> &str {
        self.dut.name()
    }

    pub fn test_case(&self) -> &str {
        &self.params.name
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn params(&self) -> &TestCaseParams {
        &self.params
    }

    pub fn interface_list(&self) -> &[NeighborInterface] {
        &self.dut.interface_list
    }

    /// Commands recorded for the verification file so far.
    pub fn show_cmds(&self) -> &[String] {
        &self.show_cmds
    }

    pub fn show_output(&self, cmd: &str) -> Option<&CommandCapture> {
        self.dut.output.get(cmd)
    }

    /// Parsed output of `cmd`, `None` if it was not captured as JSON.
    pub fn show_output_json(&self, cmd: &str) -> Option<&Value> {
        self.show_output(cmd)
            .filter(|c| c.has_json())
            .map(|c| &c.json)
    }

    /// Raw output of `cmd`, `None` if it was not captured as text.
    pub fn show_output_text(&self, cmd: &str) -> Option<&str> {
        self.show_output(cmd)
            .filter(|c| c.has_text())
            .map(|c| c.text.as_str())
    }

    /// Runs extra commands on the device during the test.
    ///
    /// Commands go through the same shrink-and-retry dispatch as the
    /// pre-test capture. Surviving commands and their text output are added
    /// to the verification record; with JSON encoding the text is fetched
    /// with a second, text-encoded dispatch.
    pub async fn run_show_cmds(&mut self, cmds: &[String], encoding: Encoding) -> Vec<Value> {
        let (outputs, survived) = send_cmds(self.dut.conn.as_mut(), cmds, encoding).await;
        let texts: Vec<String> = match encoding {
            Encoding::Text => outputs.iter().map(|v| result_text(v).to_string()).collect(),
            Encoding::Json => {
                let (text_outputs, text_cmds) =
                    send_cmds(self.dut.conn.as_mut(), &survived, Encoding::Text).await;
                survived
                    .iter()
                    .map(|cmd| {
                        text_cmds
                            .iter()
                            .position(|c| c == cmd)
                            .and_then(|i| text_outputs.get(i))
                            .map(|v| result_text(v).to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            }
        };
        self.show_cmds.extend(survived);
        self.show_cmd_txts.extend(texts);
        outputs
    }

    /// Sets `test_result` from `actual_output == expected_output`.
    pub fn compare_outputs(&mut self) -> bool {
        self.test_result = self.actual_output == self.expected_output;
        if !self.test_result {
            self.output_msg = format!(
                "On {}, actual output {} does not match expected output {}",
                self.dut.name(),
                self.actual_output,
                self.expected_output
            );
        }
        self.test_result
    }

    /// Sets `test_result` from `actual_results == expected_results`.
    pub fn compare_results(&mut self) -> bool {
        self.test_result = self.actual_results == self.expected_results;
        if !self.test_result {
            let mismatches: Vec<String> = self
                .actual_results
                .iter()
                .zip(self.expected_results.iter())
                .enumerate()
                .filter(|(_, (actual, expected))| actual != expected)
                .map(|(i, (actual, expected))| {
                    format!("result {i}: actual {actual}, expected {expected}")
                })
                .collect();
            self.output_msg = if mismatches.is_empty() {
                format!(
                    "On {}, {} actual result(s) against {} expected",
                    self.dut.name(),
                    self.actual_results.len(),
                    self.expected_results.len()
                )
            } else {
                format!("On {}, {}", self.dut.name(), mismatches.join("; "))
            };
        }
        self.test_result
    }

    /// Persists the outcome and returns the written record.
    pub fn post_testcase(self) -> Result<ResultRecord> {
        let mut params = self.params;
        params.expected_output = self.expected_output;
        params.comment = (!self.comment.is_empty()).then_some(self.comment);
        params.show_cmds = self.show_cmds;

        let fail_or_skip_reason = if self.test_result {
            String::new()
        } else {
            self.output_msg.clone()
        };

        let record = ResultRecord {
            params,
            test_suite: self.suite,
            dut: self.dut.name().to_string(),
            test_result: self.test_result,
            output_msg: self.output_msg,
            actual_output: self.actual_output,
            actual_results: self.actual_results,
            expected_results: self.expected_results,
            show_cmd_txts: self.show_cmd_txts,
            test_steps: self.test_steps,
            fail_or_skip_reason,
        };

        let parameters = &self.ctx.parameters;
        let path = report::write_result(&parameters.results_dir, &record)?;
        report::write_verification(&parameters.report_dir, &record)?;
        info!(
            "{}: {} {} ({})",
            record.dut,
            record.params.name,
            if record.test_result { "passed" } else { "failed" },
            path.display()
        );
        Ok(record)
    }
}
