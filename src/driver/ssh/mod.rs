//! Interactive SSH shell driver.
//!
//! One persistent shell per device. Structured output comes from EOS's
//! `| json` filter; rejected commands are recognised by the fixed EOS error
//! strings in [`crate::templates::EOS_CLI_ERRORS`].

mod security;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use crate::config::{DutEntry, Parameters, Secret, Transport};
use crate::driver::{DeviceConn, Encoding, text_result};
use crate::error::{CommandError, ConnectError, Result, TraceEntry, VaneError};
use crate::templates::match_cli_error;

pub use security::SecurityLevel;
use session::{Output, SessionSpec, ShellSession};

const ENABLE_MODE: &str = "enable";
const CONFIG_MODE: &str = "config";

/// SSH shell connection to one device.
pub struct ShellConn {
    name: String,
    host: String,
    port: u16,
    username: String,
    password: Secret,
    enable_password: Option<Secret>,
    security: SecurityLevel,
    timeout: Duration,
    session: Option<ShellSession>,
}

impl ShellConn {
    pub fn new(dut: &DutEntry, parameters: &Parameters) -> Self {
        Self {
            name: dut.name.clone(),
            host: dut.mgmt_ip.clone(),
            port: parameters.ssh_port,
            username: dut.username.clone(),
            password: dut.password.clone(),
            enable_password: dut.enable_password.clone(),
            security: parameters.ssh_security,
            timeout: Duration::from_secs(parameters.timeout_secs),
            session: None,
        }
    }

    async fn open(&self) -> std::result::Result<ShellSession, ConnectError> {
        ShellSession::open(SessionSpec {
            user: &self.username,
            addr: &self.host,
            port: self.port,
            password: self.password.expose(),
            enable_password: self.enable_password.as_ref().map(Secret::expose),
            security: self.security,
            timeout: self.timeout,
        })
        .await
    }

    fn session_error(&self, source: ConnectError) -> VaneError {
        VaneError::Session {
            host: self.host.clone(),
            source,
        }
    }

    /// Runs one line in `mode`, reconnecting once on a transient failure.
    async fn exec(&mut self, line: &str, mode: &str) -> Result<Output> {
        let timeout = self.timeout;
        let first = match self.session.as_mut() {
            Some(session) => session.write_with_mode(line, mode, timeout).await,
            None => return Err(VaneError::NotConnected(self.host.clone())),
        };
        match first {
            Ok(output) => Ok(output),
            Err(err) if err.is_transient() => {
                warn!("{}: session failed on '{}' ({err}), reconnecting", self.name, line);
                let fresh = self.open().await.map_err(|e| self.session_error(e))?;
                let retried = self
                    .session
                    .insert(fresh)
                    .write_with_mode(line, mode, timeout)
                    .await;
                retried.map_err(|e| self.session_error(e))
            }
            Err(err) => Err(self.session_error(err)),
        }
    }

    async fn leave_config(&mut self) -> Result<()> {
        let timeout = self.timeout;
        let Some(session) = self.session.as_mut() else {
            return Err(VaneError::NotConnected(self.host.clone()));
        };
        let switched = session.switch_mode(ENABLE_MODE, timeout).await;
        match switched {
            Ok(None) => Ok(()),
            Ok(Some(output)) => {
                warn!("{}: could not leave configuration mode: {}", self.name, output.content);
                Ok(())
            }
            Err(err) => Err(self.session_error(err)),
        }
    }
}

/// Reason a shell response counts as a rejected command, if any.
fn rejection(output: &Output) -> Option<String> {
    match_cli_error(&output.all).or_else(|| {
        (!output.success).then(|| {
            output
                .content
                .lines()
                .last()
                .unwrap_or("command rejected")
                .trim_start_matches('%')
                .trim()
                .to_string()
        })
    })
}

#[async_trait]
impl DeviceConn for ShellConn {
    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn transport(&self) -> Transport {
        Transport::Ssh
    }

    async fn set_up_conn(&mut self) -> Result<()> {
        if let Some(mut old) = self.session.take() {
            old.close().await;
        }
        let session = self.open().await.map_err(|e| self.session_error(e))?;
        debug!("{}: shell session established", self.name);
        self.session = Some(session);
        Ok(())
    }

    async fn run_commands(&mut self, cmds: &[String], encoding: Encoding) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(cmds.len());
        let mut trace = Vec::new();
        for (index, cmd) in cmds.iter().enumerate() {
            let line = match encoding {
                Encoding::Json => format!("{cmd} | json"),
                Encoding::Text => cmd.clone(),
            };
            let output = self.exec(&line, ENABLE_MODE).await?;
            if let Some(reason) = rejection(&output) {
                return Err(CommandError::cli(cmd, index, cmds.len(), &reason, trace).into());
            }
            let value = match encoding {
                Encoding::Json => match serde_json::from_str::<Value>(output.content.trim()) {
                    Ok(value) => value,
                    Err(err) => {
                        let reason = format!("invalid json output: {err}");
                        return Err(
                            CommandError::cli(cmd, index, cmds.len(), &reason, trace).into()
                        );
                    }
                },
                Encoding::Text => text_result(output.content),
            };
            trace.push(TraceEntry {
                command: cmd.clone(),
                output: value.clone(),
            });
            results.push(value);
        }
        Ok(results)
    }

    async fn config(&mut self, cmds: &[String]) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(cmds.len());
        let mut trace = Vec::new();
        for (index, cmd) in cmds.iter().enumerate() {
            let output = self.exec(cmd, CONFIG_MODE).await?;
            if let Some(reason) = rejection(&output) {
                if let Err(err) = self.leave_config().await {
                    warn!("{}: {err}", self.name);
                }
                return Err(CommandError::cli(cmd, index, cmds.len(), &reason, trace).into());
            }
            let value = text_result(output.content);
            trace.push(TraceEntry {
                command: cmd.clone(),
                output: value.clone(),
            });
            results.push(value);
        }
        if !cmds.is_empty() {
            self.leave_config().await?;
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(success: bool, content: &str) -> Output {
        Output {
            success,
            content: content.to_string(),
            all: format!("show thing\r\n{content}\r\nleaf1#"),
        }
    }

    #[test]
    fn eos_error_strings_are_rejections() {
        let out = output(false, "% Invalid input (at token 1: 'bogus')");
        assert_eq!(
            rejection(&out).as_deref(),
            Some("Invalid input (at token 1: 'bogus')")
        );
        let out = output(true, "% This is an unconverted command");
        assert_eq!(
            rejection(&out).as_deref(),
            Some("This is an unconverted command")
        );
    }

    #[test]
    fn unknown_error_line_uses_last_content_line() {
        let out = output(false, "partial output\n% Permission denied");
        assert_eq!(rejection(&out).as_deref(), Some("Permission denied"));
        let out = output(false, "");
        assert_eq!(rejection(&out).as_deref(), Some("command rejected"));
    }

    #[test]
    fn clean_output_is_accepted() {
        let out = output(true, "{\"modelName\": \"vEOS-lab\"}");
        assert_eq!(rejection(&out), None);
    }
}
