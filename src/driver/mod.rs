//! Device connection drivers.
//!
//! [`DeviceConn`] is the contract every driver honours; callers never know
//! which one they hold. Two implementations exist:
//!
//! - [`EapiConn`]: JSON-RPC `runCmds` over HTTP(S).
//! - [`ShellConn`]: an interactive SSH shell, with JSON obtained through
//!   `| json`.
//!
//! Both return one `serde_json::Value` per command. JSON encoding yields the
//! parsed object; text encoding yields `{"output": "<raw text>"}`.

pub mod eapi;
pub mod ssh;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{DutEntry, Parameters, Transport};
use crate::error::{Result, VaneError};

pub use eapi::EapiConn;
pub use ssh::ShellConn;

/// Output encoding requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Text,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Text => "text",
        }
    }
}

/// Result of one command issued through [`DeviceConn::enable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableResult {
    pub command: String,
    pub result: Value,
    pub encoding: Encoding,
}

/// Wraps raw text the way eAPI returns text-encoded results.
pub fn text_result(output: impl Into<String>) -> Value {
    json!({ "output": output.into() })
}

/// Extracts the raw text of a text-encoded result.
pub fn result_text(result: &Value) -> &str {
    result.get("output").and_then(Value::as_str).unwrap_or("")
}

/// Uniform access to one device.
#[async_trait]
pub trait DeviceConn: Send {
    /// Device name, for logs.
    fn name(&self) -> &str;

    /// Management address.
    fn host(&self) -> &str;

    fn transport(&self) -> Transport;

    /// Opens the persistent session.
    async fn set_up_conn(&mut self) -> Result<()>;

    /// Runs `cmds` in order and returns one result per command.
    ///
    /// A command the device rejects ends the batch with
    /// [`VaneError::Command`]; an empty batch returns an empty list.
    async fn run_commands(&mut self, cmds: &[String], encoding: Encoding) -> Result<Vec<Value>>;

    /// Running configuration, one line per element.
    async fn get_config(&mut self, params: Option<&str>) -> Result<Vec<String>> {
        let command = match params {
            Some(p) if !p.trim().is_empty() => format!("show running-config {}", p.trim()),
            _ => "show running-config".to_string(),
        };
        let results = self.run_commands(&[command], Encoding::Text).await?;
        Ok(results
            .first()
            .map(result_text)
            .unwrap_or("")
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Runs privileged commands.
    ///
    /// With `strict` the batch is sent at once and fails as a whole. Otherwise
    /// commands go one by one and a command rejected in JSON is retried in
    /// text.
    async fn enable(
        &mut self,
        cmds: &[String],
        encoding: Encoding,
        strict: bool,
    ) -> Result<Vec<EnableResult>> {
        if strict {
            let results = self.run_commands(cmds, encoding).await?;
            return Ok(cmds
                .iter()
                .cloned()
                .zip(results)
                .map(|(command, result)| EnableResult {
                    command,
                    result,
                    encoding,
                })
                .collect());
        }

        let mut out = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            let single = std::slice::from_ref(cmd);
            let (result, used) = match self.run_commands(single, encoding).await {
                Ok(mut r) => (r.pop().unwrap_or(Value::Null), encoding),
                Err(VaneError::Command(err)) if encoding == Encoding::Json => {
                    debug!("{}: '{}' has no json form ({err}), retrying as text", self.name(), cmd);
                    let mut r = self.run_commands(single, Encoding::Text).await?;
                    (r.pop().unwrap_or(Value::Null), Encoding::Text)
                }
                Err(err) => return Err(err),
            };
            out.push(EnableResult {
                command: cmd.clone(),
                result,
                encoding: used,
            });
        }
        Ok(out)
    }

    /// Applies configuration commands and returns one result per command.
    async fn config(&mut self, cmds: &[String]) -> Result<Vec<Value>> {
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        let mut batch = Vec::with_capacity(cmds.len() + 2);
        batch.push("configure".to_string());
        batch.extend(cmds.iter().cloned());
        batch.push("end".to_string());
        let mut results = self.run_commands(&batch, Encoding::Json).await?;
        results.pop();
        if !results.is_empty() {
            results.remove(0);
        }
        Ok(results)
    }
}

/// Builds the connection for an inventory entry.
pub trait ConnectionFactory: Send + Sync {
    fn build(&self, dut: &DutEntry, transport: Transport, parameters: &Parameters)
    -> Result<Box<dyn DeviceConn>>;
}

/// Default factory: eAPI for `http`/`https`, SSH shell for `ssh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFactory;

impl ConnectionFactory for DriverFactory {
    fn build(
        &self,
        dut: &DutEntry,
        transport: Transport,
        parameters: &Parameters,
    ) -> Result<Box<dyn DeviceConn>> {
        Ok(match transport {
            Transport::Https | Transport::Http => {
                Box::new(EapiConn::new(dut, transport, parameters))
            }
            Transport::Ssh => Box::new(ShellConn::new(dut, parameters)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rejects every command containing "bogus", echoes the rest.
    struct Picky {
        calls: Vec<(Vec<String>, Encoding)>,
    }

    #[async_trait]
    impl DeviceConn for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn host(&self) -> &str {
            "127.0.0.1"
        }

        fn transport(&self) -> Transport {
            Transport::Https
        }

        async fn set_up_conn(&mut self) -> Result<()> {
            Ok(())
        }

        async fn run_commands(&mut self, cmds: &[String], encoding: Encoding) -> Result<Vec<Value>> {
            self.calls.push((cmds.to_vec(), encoding));
            let mut out = Vec::new();
            for (i, cmd) in cmds.iter().enumerate() {
                if cmd.contains("bogus") && encoding == Encoding::Json {
                    return Err(crate::error::CommandError::cli(
                        cmd,
                        i,
                        cmds.len(),
                        "invalid command",
                        Vec::new(),
                    )
                    .into());
                }
                out.push(match encoding {
                    Encoding::Json => json!({ "cmd": cmd }),
                    Encoding::Text => text_result(format!("{cmd}\nline two")),
                });
            }
            Ok(out)
        }
    }

    fn picky() -> Picky {
        Picky { calls: Vec::new() }
    }

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn non_strict_enable_falls_back_to_text_per_command() {
        let mut conn = picky();
        let results = conn
            .enable(&cmds(&["show version", "show bogus"]), Encoding::Json, false)
            .await
            .expect("enable succeeds");
        assert_eq!(results[0].encoding, Encoding::Json);
        assert_eq!(results[1].encoding, Encoding::Text);
        assert_eq!(result_text(&results[1].result), "show bogus\nline two");
        assert_eq!(conn.calls.len(), 3);
    }

    #[tokio::test]
    async fn strict_enable_fails_atomically() {
        let mut conn = picky();
        let err = conn
            .enable(&cmds(&["show version", "show bogus"]), Encoding::Json, true)
            .await
            .expect_err("strict batch fails");
        assert!(matches!(err, VaneError::Command(_)));
        assert_eq!(conn.calls.len(), 1);
    }

    #[tokio::test]
    async fn config_strips_mode_commands() {
        let mut conn = picky();
        let results = conn
            .config(&cmds(&["hostname leaf1"]))
            .await
            .expect("config succeeds");
        assert_eq!(results, vec![json!({ "cmd": "hostname leaf1" })]);
        assert_eq!(
            conn.calls[0].0,
            cmds(&["configure", "hostname leaf1", "end"])
        );
    }

    #[tokio::test]
    async fn get_config_splits_lines() {
        let mut conn = picky();
        let lines = conn.get_config(Some("section bgp")).await.expect("config text");
        assert_eq!(lines, vec!["show running-config section bgp", "line two"]);
    }
}
