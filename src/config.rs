//! Run configuration: definitions, DUT inventory and test definitions.
//!
//! Everything here is loaded once, before any device is contacted, into a
//! [`VaneContext`]. The context is passed by reference to the orchestrator,
//! the per-test context and the suite runner; nothing else reads
//! configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use log::{error, info};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::driver::ssh::SecurityLevel;
use crate::error::{Result, VaneError};

/// Commands prepended to the command list when requested by parameters.
pub const SHOW_VERSION: &str = "show version";
pub const SHOW_CLOCK: &str = "show clock";

/// How a device is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// eAPI over HTTPS.
    #[default]
    Https,
    /// eAPI over plain HTTP.
    Http,
    /// Interactive CLI over SSH.
    Ssh,
}

/// Name filter for suites and test cases: `All` or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Selection {
    One(String),
    Many(Vec<String>),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::One("All".to_string())
    }
}

impl Selection {
    /// Returns true if `name` is selected.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Selection::One(one) => one.eq_ignore_ascii_case("all") || one == name,
            Selection::Many(many) => many.iter().any(|n| n == name),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("reports/results")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_ssh_port() -> u16 {
    22
}

/// Run parameters, the `parameters:` section of the definitions file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Parameters {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// Transport used for devices that do not name one.
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub eapi_port: Option<u16>,
    #[serde(default)]
    pub verify_certs: bool,
    /// Per-request / per-command timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_security: SecurityLevel,
    /// Capture `show version` on every device.
    #[serde(default)]
    pub show_version: bool,
    /// Capture `show clock` on every device.
    #[serde(default)]
    pub show_clock: bool,
    #[serde(default)]
    pub test_suites: Selection,
    #[serde(default)]
    pub test_cases: Selection,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            report_dir: default_report_dir(),
            transport: Transport::default(),
            eapi_port: None,
            verify_certs: false,
            timeout_secs: default_timeout_secs(),
            ssh_port: default_ssh_port(),
            ssh_security: SecurityLevel::default(),
            show_version: false,
            show_clock: false,
            test_suites: Selection::default(),
            test_cases: Selection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DefinitionsFile {
    #[serde(default)]
    parameters: Parameters,
}

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// A static link declared in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborLink {
    #[serde(rename = "neighborDevice")]
    pub neighbor_device: String,
    #[serde(rename = "neighborPort")]
    pub neighbor_port: String,
    pub port: String,
    #[serde(default)]
    pub media_type: String,
}

/// One device of the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DutEntry {
    pub name: String,
    pub mgmt_ip: String,
    pub username: String,
    pub password: Secret,
    #[serde(default)]
    pub enable_password: Option<Secret>,
    #[serde(default)]
    pub role: String,
    /// Overrides [`Parameters::transport`] for this device.
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub neighbors: Vec<NeighborLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DutsFile {
    #[serde(default)]
    duts: Vec<DutEntry>,
}

/// Parameters of one test case as declared in the test definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TestCaseParams {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub show_cmds: Vec<String>,
    #[serde(default)]
    pub expected_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    /// Keys this crate does not interpret; carried into the result file.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestCaseParams {
    /// `show_cmd` followed by `show_cmds`, without duplicates or blanks.
    pub fn declared_show_cmds(&self) -> Vec<String> {
        let mut cmds: IndexSet<String> = IndexSet::new();
        if let Some(cmd) = self.show_cmd.as_ref().filter(|c| !c.trim().is_empty()) {
            cmds.insert(cmd.clone());
        }
        for cmd in self.show_cmds.iter().filter(|c| !c.trim().is_empty()) {
            cmds.insert(cmd.clone());
        }
        cmds.into_iter().collect()
    }
}

/// One test suite and its parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteDef {
    pub name: String,
    #[serde(default)]
    pub testcases: Vec<TestCaseParams>,
}

impl TestSuiteDef {
    /// Exact-name scan of the parameter table.
    pub fn find(&self, test_case: &str) -> Option<&TestCaseParams> {
        self.testcases.iter().find(|tc| tc.name == test_case)
    }
}

/// Computes the ordered, de-duplicated command list of the selected tests.
pub fn collect_show_cmds(parameters: &Parameters, suites: &[TestSuiteDef]) -> Vec<String> {
    let mut cmds: IndexSet<String> = IndexSet::new();
    if parameters.show_version {
        cmds.insert(SHOW_VERSION.to_string());
    }
    if parameters.show_clock {
        cmds.insert(SHOW_CLOCK.to_string());
    }
    for suite in suites
        .iter()
        .filter(|s| parameters.test_suites.matches(&s.name))
    {
        for tc in suite
            .testcases
            .iter()
            .filter(|tc| parameters.test_cases.matches(&tc.name))
        {
            cmds.extend(tc.declared_show_cmds());
        }
    }
    cmds.into_iter().collect()
}

/// Everything a run needs, loaded once.
#[derive(Debug, Clone)]
pub struct VaneContext {
    pub parameters: Parameters,
    pub duts: Vec<DutEntry>,
    pub test_defs: Vec<TestSuiteDef>,
    /// Commands captured on every device before tests run.
    pub show_cmds: Vec<String>,
}

impl VaneContext {
    /// Builds a context from already parsed parts.
    pub fn from_parts(
        parameters: Parameters,
        duts: Vec<DutEntry>,
        test_defs: Vec<TestSuiteDef>,
    ) -> Result<Self> {
        let mut seen = IndexSet::new();
        for dut in &duts {
            if !seen.insert(dut.name.as_str()) {
                return Err(VaneError::InvalidConfig(format!(
                    "duplicate dut name '{}'",
                    dut.name
                )));
            }
        }
        let show_cmds = collect_show_cmds(&parameters, &test_defs);
        Ok(Self {
            parameters,
            duts,
            test_defs,
            show_cmds,
        })
    }

    /// Loads the definitions file, the DUT inventory and one or more test
    /// definition files (their suites are concatenated in order).
    pub fn load(
        definitions: impl AsRef<Path>,
        duts: impl AsRef<Path>,
        test_definitions: &[PathBuf],
    ) -> Result<Self> {
        let definitions: DefinitionsFile = import_yaml(definitions)?;
        let duts: DutsFile = import_yaml(duts)?;
        let mut suites = Vec::new();
        for path in test_definitions {
            let mut file: Vec<TestSuiteDef> = import_yaml(path)?;
            suites.append(&mut file);
        }
        let ctx = Self::from_parts(definitions.parameters, duts.duts, suites)?;
        info!(
            "Loaded {} duts, {} test suites, {} show commands",
            ctx.duts.len(),
            ctx.test_defs.len(),
            ctx.show_cmds.len()
        );
        Ok(ctx)
    }

    /// Same as [`load`](Self::load), but an unusable configuration ends the
    /// process with status 1.
    pub fn load_or_exit(
        definitions: impl AsRef<Path>,
        duts: impl AsRef<Path>,
        test_definitions: &[PathBuf],
    ) -> Self {
        match Self::load(definitions, duts, test_definitions) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!("Unusable run configuration: {err}");
                eprintln!("vane: unusable run configuration: {err}");
                std::process::exit(1);
            }
        }
    }

    /// Finds a suite by name.
    pub fn suite(&self, name: &str) -> Option<&TestSuiteDef> {
        self.test_defs.iter().find(|s| s.name == name)
    }

    /// Transport used for `dut`.
    pub fn transport_for(&self, dut: &DutEntry) -> Transport {
        dut.transport.unwrap_or(self.parameters.transport)
    }
}

/// Reads and parses a YAML file.
pub fn import_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| VaneError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| VaneError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Renders `value` as YAML into `path`, creating parent directories.
pub fn export_yaml<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let rendered = serde_yaml::to_string(value).map_err(|source| VaneError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, rendered.as_bytes())
}

pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| VaneError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| VaneError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITES: &str = r#"
- name: test_system.py
  testcases:
    - name: test_version_on_
      show_cmd: show version
      expected_output: 4.30.1F
      test_id: TN1.1
      custom_key: kept
    - name: test_lldp_on_
      show_cmds: [show lldp neighbors, show version]
      expected_output: {peers: 2}
- name: test_clock.py
  testcases:
    - name: test_ntp_on_
      show_cmd: show ntp status
"#;

    fn suites() -> Vec<TestSuiteDef> {
        serde_yaml::from_str(SUITES).expect("suites parse")
    }

    #[test]
    fn selection_all_matches_anything() {
        assert!(Selection::default().matches("whatever"));
        assert!(Selection::One("all".to_string()).matches("x"));
        assert!(Selection::One("x".to_string()).matches("x"));
        assert!(!Selection::One("x".to_string()).matches("y"));
        assert!(Selection::Many(vec!["a".to_string(), "b".to_string()]).matches("b"));
        assert!(!Selection::Many(vec![]).matches("b"));
    }

    #[test]
    fn show_cmds_are_ordered_and_unique() {
        let params = Parameters {
            show_clock: true,
            ..Parameters::default()
        };
        let cmds = collect_show_cmds(&params, &suites());
        assert_eq!(
            cmds,
            vec![
                "show clock".to_string(),
                "show version".to_string(),
                "show lldp neighbors".to_string(),
                "show ntp status".to_string(),
            ]
        );
    }

    #[test]
    fn show_cmds_follow_suite_and_case_selection() {
        let params = Parameters {
            test_suites: Selection::Many(vec!["test_system.py".to_string()]),
            test_cases: Selection::One("test_lldp_on_".to_string()),
            ..Parameters::default()
        };
        let cmds = collect_show_cmds(&params, &suites());
        assert_eq!(cmds, vec!["show lldp neighbors", "show version"]);
    }

    #[test]
    fn unknown_testcase_keys_are_kept() {
        let suites = suites();
        let tc = suites[0].find("test_version_on_").expect("present");
        assert_eq!(tc.extra.get("custom_key"), Some(&Value::from("kept")));
        assert_eq!(tc.test_id.as_deref(), Some("TN1.1"));
        assert!(suites[0].find("test_version_on").is_none());
    }

    #[test]
    fn duts_file_parses_inventory_fields() {
        let raw = r#"
duts:
  - name: leaf1
    mgmt_ip: 10.0.0.1
    username: admin
    password: secret
    role: leaf
    transport: ssh
    neighbors:
      - neighborDevice: spine1
        neighborPort: Ethernet1
        port: Ethernet49/1
"#;
        let file: DutsFile = serde_yaml::from_str(raw).expect("duts parse");
        let dut = &file.duts[0];
        assert_eq!(dut.transport, Some(Transport::Ssh));
        assert_eq!(dut.password.expose(), "secret");
        assert_eq!(dut.neighbors[0].neighbor_device, "spine1");
        assert!(!format!("{dut:?}").contains("secret"));
    }

    #[test]
    fn duplicate_dut_names_are_rejected() {
        let dut = DutEntry {
            name: "leaf1".to_string(),
            mgmt_ip: "10.0.0.1".to_string(),
            username: "admin".to_string(),
            password: Secret::new("pw"),
            enable_password: None,
            role: String::new(),
            transport: None,
            neighbors: Vec::new(),
        };
        let err = VaneContext::from_parts(Parameters::default(), vec![dut.clone(), dut], vec![])
            .expect_err("duplicates must fail");
        assert!(matches!(err, VaneError::InvalidConfig(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = import_yaml::<Vec<TestSuiteDef>>("/nonexistent/definitions.yaml")
            .expect_err("missing file");
        assert!(matches!(err, VaneError::Io { .. }));
    }
}
