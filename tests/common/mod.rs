#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use vane::config::{DutEntry, Parameters, Secret, TestCaseParams, TestSuiteDef, Transport};
use vane::driver::{ConnectionFactory, DeviceConn, Encoding, text_result};
use vane::error::{CommandError, Result, VaneError};
use vane::VaneContext;
use vane::worker::DutRecord;

/// Batches seen by a fake device, in order.
pub type CallLog = Arc<Mutex<Vec<(Vec<String>, Encoding)>>>;

/// Scripted behaviour of one fake device.
#[derive(Clone, Default)]
pub struct Script {
    /// Commands rejected when sent as JSON.
    pub reject_json: HashSet<String>,
    /// Commands rejected when sent as text.
    pub reject_text: HashSet<String>,
    /// Fixed JSON replies; other commands get a generated object.
    pub json: HashMap<String, Value>,
    pub fail_setup: bool,
    /// Panics when asked to run this command.
    pub panic_on: Option<String>,
    pub calls: CallLog,
}

impl Script {
    pub fn rejecting_json(cmds: &[&str]) -> Self {
        Self {
            reject_json: cmds.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn rejecting_both(cmds: &[&str]) -> Self {
        let set: HashSet<String> = cmds.iter().map(|c| c.to_string()).collect();
        Self {
            reject_json: set.clone(),
            reject_text: set,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Vec<String>, Encoding)> {
        self.calls.lock().expect("call log").clone()
    }
}

pub struct FakeConn {
    name: String,
    transport: Transport,
    script: Script,
}

impl FakeConn {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            transport: Transport::Https,
            script,
        }
    }
}

pub fn text_of(device: &str, cmd: &str) -> String {
    format!("{device} says {cmd}")
}

#[async_trait]
impl DeviceConn for FakeConn {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        "192.0.2.1"
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    async fn set_up_conn(&mut self) -> Result<()> {
        if self.script.fail_setup {
            return Err(VaneError::NotConnected(self.name.clone()));
        }
        Ok(())
    }

    async fn run_commands(&mut self, cmds: &[String], encoding: Encoding) -> Result<Vec<Value>> {
        self.script
            .calls
            .lock()
            .expect("call log")
            .push((cmds.to_vec(), encoding));
        let rejected = match encoding {
            Encoding::Json => &self.script.reject_json,
            Encoding::Text => &self.script.reject_text,
        };
        let mut out = Vec::with_capacity(cmds.len());
        for (index, cmd) in cmds.iter().enumerate() {
            if self.script.panic_on.as_deref() == Some(cmd.as_str()) {
                panic!("scripted panic on {cmd}");
            }
            if rejected.contains(cmd) {
                return Err(CommandError::cli(
                    cmd,
                    index,
                    cmds.len(),
                    "This is an unconverted command",
                    Vec::new(),
                )
                .into());
            }
            out.push(match encoding {
                Encoding::Json => self
                    .script
                    .json
                    .get(cmd)
                    .cloned()
                    .unwrap_or_else(|| json!({ "device": self.name, "command": cmd })),
                Encoding::Text => text_result(text_of(&self.name, cmd)),
            });
        }
        Ok(out)
    }
}

/// Factory handing out [`FakeConn`]s scripted per device name.
#[derive(Default)]
pub struct FakeFactory {
    pub scripts: HashMap<String, Script>,
    pub built: Mutex<Vec<(String, Transport)>>,
}

impl FakeFactory {
    pub fn with(mut self, device: &str, script: Script) -> Self {
        self.scripts.insert(device.to_string(), script);
        self
    }
}

impl ConnectionFactory for FakeFactory {
    fn build(
        &self,
        dut: &DutEntry,
        transport: Transport,
        _parameters: &Parameters,
    ) -> Result<Box<dyn DeviceConn>> {
        self.built
            .lock()
            .expect("build log")
            .push((dut.name.clone(), transport));
        let script = self.scripts.get(&dut.name).cloned().unwrap_or_default();
        let mut conn = FakeConn::new(&dut.name, script);
        conn.transport = transport;
        Ok(Box::new(conn))
    }
}

pub fn cmds(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| c.to_string()).collect()
}

pub fn dut(name: &str) -> DutEntry {
    DutEntry {
        name: name.to_string(),
        mgmt_ip: "192.0.2.1".to_string(),
        username: "admin".to_string(),
        password: Secret::new("admin"),
        enable_password: None,
        role: "leaf".to_string(),
        transport: None,
        neighbors: Vec::new(),
    }
}

pub fn test_case(name: &str, show_cmds: &[&str]) -> TestCaseParams {
    TestCaseParams {
        name: name.to_string(),
        show_cmds: cmds(show_cmds),
        ..TestCaseParams::default()
    }
}

/// Context whose result and report directories live under `dir`.
pub fn context(dir: &Path, duts: &[&str], suites: Vec<TestSuiteDef>) -> VaneContext {
    let parameters = Parameters {
        results_dir: dir.join("results"),
        report_dir: dir.join("reports"),
        ..Parameters::default()
    };
    VaneContext::from_parts(parameters, duts.iter().map(|n| dut(n)).collect(), suites)
        .expect("valid context")
}

/// A record whose output map already holds `captured`.
pub fn captured_record(name: &str, captured: &[&str], script: Script) -> DutRecord {
    let mut record = DutRecord::new(dut(name), Box::new(FakeConn::new(name, script)));
    for cmd in captured {
        record.output.insert(
            cmd.to_string(),
            vane::worker::CommandCapture {
                json: json!({ "command": cmd }),
                text: text_of(name, cmd),
            },
        );
    }
    record
}
