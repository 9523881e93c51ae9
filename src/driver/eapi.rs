//! eAPI driver: JSON-RPC `runCmds` against `/command-api`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DutEntry, Parameters, Secret, Transport};
use crate::driver::{DeviceConn, Encoding};
use crate::error::{CommandError, Result, TraceEntry, VaneError};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize)]
struct EapiRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: EapiParams<'a>,
    id: String,
}

#[derive(Debug, Serialize)]
struct EapiParams<'a> {
    version: u32,
    cmds: Vec<EapiCommand<'a>>,
    format: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EapiCommand<'a> {
    Simple(&'a str),
    WithInput { cmd: &'a str, input: &'a str },
}

#[derive(Debug, Deserialize)]
struct EapiResponse {
    #[serde(default)]
    result: Option<Vec<Value>>,
    #[serde(default)]
    error: Option<EapiError>,
}

#[derive(Debug, Deserialize)]
struct EapiError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Vec<Value>,
}

/// eAPI connection to one device.
pub struct EapiConn {
    name: String,
    host: String,
    url: String,
    transport: Transport,
    username: String,
    password: Secret,
    enable_password: Option<Secret>,
    verify_certs: bool,
    timeout: Duration,
    client: Option<Client>,
}

impl EapiConn {
    pub fn new(dut: &DutEntry, transport: Transport, parameters: &Parameters) -> Self {
        let (scheme, default_port) = match transport {
            Transport::Http => ("http", 80),
            _ => ("https", 443),
        };
        let port = parameters.eapi_port.unwrap_or(default_port);
        Self {
            name: dut.name.clone(),
            host: dut.mgmt_ip.clone(),
            url: format!("{scheme}://{}:{port}/command-api", dut.mgmt_ip),
            transport,
            username: dut.username.clone(),
            password: dut.password.clone(),
            enable_password: dut.enable_password.clone(),
            verify_certs: parameters.verify_certs,
            timeout: Duration::from_secs(parameters.timeout_secs),
            client: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_request<'a>(&'a self, cmds: &'a [String], encoding: Encoding) -> EapiRequest<'a> {
        let enable = match &self.enable_password {
            Some(pw) => EapiCommand::WithInput {
                cmd: "enable",
                input: pw.expose(),
            },
            None => EapiCommand::Simple("enable"),
        };
        let mut batch = Vec::with_capacity(cmds.len() + 1);
        batch.push(enable);
        batch.extend(cmds.iter().map(|c| EapiCommand::Simple(c.as_str())));
        EapiRequest {
            jsonrpc: "2.0",
            method: "runCmds",
            params: EapiParams {
                version: 1,
                cmds: batch,
                format: encoding.as_str(),
            },
            id: format!("vane-{}", REQUEST_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    fn http_error(&self, source: reqwest::Error) -> VaneError {
        VaneError::Http {
            host: self.host.clone(),
            source,
        }
    }
}

/// Converts a JSON-RPC error into a [`CommandError`].
///
/// `data` holds one entry per command the device attempted, the leading
/// `enable` included; the failing command is the first entry with `errors`.
fn command_error(cmds: &[String], error: EapiError) -> CommandError {
    let failed = error
        .data
        .iter()
        .position(|entry| entry.get("errors").is_some())
        .and_then(|pos| pos.checked_sub(1));
    let command = failed
        .and_then(|i| cmds.get(i))
        .cloned()
        .unwrap_or_default();
    let completed = failed.unwrap_or(0);
    let trace = cmds
        .iter()
        .zip(error.data.iter().skip(1))
        .take(completed)
        .map(|(command, output)| TraceEntry {
            command: command.clone(),
            output: output.clone(),
        })
        .collect();
    CommandError {
        code: error.code,
        message: error.message,
        command,
        trace,
    }
}

#[async_trait]
impl DeviceConn for EapiConn {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    async fn set_up_conn(&mut self) -> Result<()> {
        let mut builder = Client::builder().timeout(self.timeout);
        if self.transport == Transport::Https && !self.verify_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| self.http_error(e))?;
        debug!("{}: eapi client ready for {}", self.name, self.url);
        self.client = Some(client);
        Ok(())
    }

    async fn run_commands(&mut self, cmds: &[String], encoding: Encoding) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let Some(client) = self.client.as_ref() else {
            return Err(VaneError::NotConnected(self.host.clone()));
        };
        let request = self.build_request(cmds, encoding);
        trace!("{}: runCmds {:?} ({})", self.name, cmds, encoding.as_str());

        let response = client
            .post(&self.url)
            .basic_auth(&self.username, Some(self.password.expose()))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaneError::Protocol {
                host: self.host.clone(),
                message: format!("status {status}: {body}"),
            });
        }

        let reply: EapiResponse = response.json().await.map_err(|e| self.http_error(e))?;
        if let Some(error) = reply.error {
            return Err(command_error(cmds, error).into());
        }
        let Some(mut results) = reply.result else {
            return Err(VaneError::Protocol {
                host: self.host.clone(),
                message: "reply carries neither result nor error".to_string(),
            });
        };
        if results.len() != cmds.len() + 1 {
            return Err(VaneError::Protocol {
                host: self.host.clone(),
                message: format!(
                    "expected {} results, got {}",
                    cmds.len() + 1,
                    results.len()
                ),
            });
        }
        results.remove(0);
        Ok(results)
    }
}

impl std::fmt::Debug for EapiConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EapiConn")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("connected", &self.client.is_some())
            .finish()
    }
}
