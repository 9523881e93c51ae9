//! Result files read by the report generator.
//!
//! Two artifacts per (test case, device):
//!
//! ```text
//! <results_dir>/result-<test_case>-<dut>.yml
//! <report_dir>/TEST RESULTS/<test_id> <test_case>/<test_id> <dut> Verification.txt
//! ```
//!
//! The verification file exists only for test cases carrying a `test_id`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{TestCaseParams, export_yaml, write_file};
use crate::error::Result;

/// Directory under `report_dir` holding verification files.
pub const TEST_RESULTS_DIR: &str = "TEST RESULTS";

/// Outcome of one test case on one device.
///
/// The test-case parameters are flattened into the record, so the file
/// carries the declared fields next to the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResultRecord {
    #[serde(flatten)]
    pub params: TestCaseParams,
    pub test_suite: String,
    pub dut: String,
    pub test_result: bool,
    #[serde(default)]
    pub output_msg: String,
    #[serde(default)]
    pub actual_output: Value,
    #[serde(default)]
    pub actual_results: Vec<Value>,
    #[serde(default)]
    pub expected_results: Vec<Value>,
    /// Raw text of every command in `show_cmds`, index-aligned.
    #[serde(default)]
    pub show_cmd_txts: Vec<String>,
    #[serde(default)]
    pub test_steps: Vec<String>,
    /// `output_msg` when the test failed, empty otherwise.
    #[serde(default)]
    pub fail_or_skip_reason: String,
}

pub fn result_file_name(test_case: &str, dut: &str) -> String {
    format!("result-{test_case}-{dut}.yml")
}

pub fn verification_file_path(
    report_dir: &Path,
    test_id: &str,
    test_case: &str,
    dut: &str,
) -> PathBuf {
    report_dir
        .join(TEST_RESULTS_DIR)
        .join(format!("{test_id} {test_case}"))
        .join(format!("{test_id} {dut} Verification.txt"))
}

/// Writes the YAML result file and returns its path.
pub fn write_result(results_dir: &Path, record: &ResultRecord) -> Result<PathBuf> {
    let path = results_dir.join(result_file_name(&record.params.name, &record.dut));
    export_yaml(&path, record)?;
    Ok(path)
}

/// Numbered `<n>. <dut># <cmd>` blocks, each followed by the command's text.
pub fn render_verification(record: &ResultRecord) -> String {
    let mut out = String::new();
    for (n, (cmd, text)) in record
        .params
        .show_cmds
        .iter()
        .zip(record.show_cmd_txts.iter())
        .enumerate()
    {
        let _ = write!(out, "{}. {}# {}\n\n{}\n\n", n + 1, record.dut, cmd, text);
    }
    out
}

/// Writes the verification file when the test case has a `test_id`.
pub fn write_verification(report_dir: &Path, record: &ResultRecord) -> Result<Option<PathBuf>> {
    let Some(test_id) = record.params.test_id.as_deref() else {
        return Ok(None);
    };
    let path = verification_file_path(report_dir, test_id, &record.params.name, &record.dut);
    write_file(&path, render_verification(record).as_bytes())?;
    Ok(Some(path))
}

/// JSON Schema of [`ResultRecord`], pretty printed.
pub fn result_schema_json() -> Result<String> {
    let schema = schemars::schema_for!(ResultRecord);
    Ok(serde_json::to_string_pretty(&schema)?)
}
