use std::collections::HashMap;
use std::time::Duration;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::{debug, trace};
use russh::ChannelMsg;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::device::{IGNORE_START_LINE, PromptMachine};
use crate::error::ConnectError;
use crate::templates::{self, ENABLE_PASSWORD_PARAM};

use super::SecurityLevel;

/// Commands sent once the first prompt is seen.
const ON_OPEN_COMMANDS: &[&str] = &["terminal length 0", "terminal width 32767"];

/// Output of one command.
#[derive(Debug, Clone)]
pub(crate) struct Output {
    /// False when the state machine saw an error line.
    pub success: bool,
    /// Output without the echoed command and the trailing prompt.
    pub content: String,
    pub all: String,
}

/// Login credentials and policy for one shell session.
pub(crate) struct SessionSpec<'a> {
    pub user: &'a str,
    pub addr: &'a str,
    pub port: u16,
    pub password: &'a str,
    pub enable_password: Option<&'a str>,
    pub security: SecurityLevel,
    pub timeout: Duration,
}

/// Turns SSH data chunks into text without splitting multi-byte characters.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk completes it. Invalid bytes elsewhere become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push_str(&String::from_utf8_lossy(
                                &self.pending[valid..valid + len],
                            ));
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Output between the echoed `command` and the trailing prompt, with `\n`
/// line endings.
fn command_content(all: &str, command: &str) -> String {
    let normalized = all.replace("\r\n", "\n");
    let mut content = normalized.as_str();
    if !command.is_empty()
        && let Some(rest) = content.strip_prefix(command)
    {
        content = rest.trim_start_matches(['\n', '\r']);
    }
    match content.rfind('\n') {
        Some(pos) => content[..pos].to_string(),
        None => String::new(),
    }
}

/// A persistent interactive shell on an EOS device.
pub(crate) struct ShellSession {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    machine: PromptMachine,
    device_addr: String,
}

impl ShellSession {
    pub(crate) async fn open(spec: SessionSpec<'_>) -> Result<ShellSession, ConnectError> {
        let device_addr = format!("{}@{}:{}", spec.user, spec.addr, spec.port);

        let mut params = HashMap::new();
        if let Some(enable) = spec.enable_password {
            params.insert(ENABLE_PASSWORD_PARAM.to_string(), format!("{enable}\n"));
        }
        let mut machine = PromptMachine::new(&templates::eos(), params)?;

        let config = Config {
            preferred: spec.security.preferred(),
            inactivity_timeout: Some(spec.timeout),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (spec.addr.to_string(), spec.port),
            spec.user,
            AuthMethod::with_password(spec.password),
            spec.security.server_check(),
            config,
        )
        .await?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, mut receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut carry = Utf8Carry::default();
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = carry.decode(data);
                                if !text.is_empty() && sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended", io_task_device_addr);
        });

        let mut buffer = String::new();
        let mut initial_output = String::new();

        let init_result = tokio::time::timeout(spec.timeout, async {
            loop {
                let Some(data) = receiver_from_shell.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                trace!("{:?}", data);
                buffer.push_str(&data);
                initial_output.push_str(&data);

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer.drain(..=newline_pos).collect::<String>();
                    machine.read(line.trim_end());
                }

                if !buffer.is_empty() {
                    if machine.is_prompt(&buffer) {
                        machine.read(&buffer);
                        return Ok(());
                    }
                    if let Some(reply) = machine.input_for(&buffer) {
                        machine.read(&buffer);
                        buffer.clear();
                        sender_to_shell.send(reply).await?;
                    }
                }
            }
        })
        .await;

        match init_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(ConnectError::InitTimeout(if initial_output.is_empty() {
                    "waiting for initial prompt".to_string()
                } else {
                    initial_output
                }));
            }
        }

        let mut session = Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            machine,
            device_addr,
        };
        for command in ON_OPEN_COMMANDS {
            session.write(command, spec.timeout).await?;
        }
        debug!(
            "{} Shell ready in {} mode",
            session.device_addr,
            session.machine.current_state()
        );
        Ok(session)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    /// Sends one command and collects output until the next prompt.
    pub(crate) async fn write(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        let machine = &mut self.machine;
        let recv = &mut self.recv;
        let sender = &self.sender;

        while recv.try_recv().is_ok() {}

        sender.send(format!("{command}\n")).await?;

        let mut clean_output = String::new();
        let mut line_buffer = String::new();
        let mut line = String::new();

        let result = tokio::time::timeout(timeout, async {
            let mut is_error = false;
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                line_buffer.push_str(&data);

                while let Some(newline_pos) = line_buffer.find('\n') {
                    line.clear();
                    line.extend(line_buffer.drain(..=newline_pos));
                    let trim_start = IGNORE_START_LINE.replace(&line, "");
                    machine.read(trim_start.trim_end());
                    if machine.error() {
                        is_error = true;
                    }
                    clean_output.push_str(&trim_start);
                }

                // The prompt arrives without a trailing newline.
                if !line_buffer.is_empty() {
                    if machine.is_prompt(&line_buffer) {
                        machine.read(&line_buffer);
                        clean_output.push_str(&line_buffer);
                        return Ok(!is_error);
                    }
                    if let Some(reply) = machine.input_for(&line_buffer) {
                        machine.read(&line_buffer);
                        line_buffer.clear();
                        trace!("Input required by the device");
                        sender.send(reply).await?;
                    }
                }
            }
        })
        .await;

        let success = match result {
            Err(_) => return Err(ConnectError::ExecTimeout(clean_output)),
            Ok(Err(err)) => return Err(err),
            Ok(Ok(success)) => success,
        };

        let all = clean_output;
        Ok(Output {
            success,
            content: command_content(&all, command),
            all,
        })
    }

    /// Moves the CLI to `mode` through the template's mode graph.
    pub(crate) async fn switch_mode(
        &mut self,
        mode: &str,
        timeout: Duration,
    ) -> Result<Option<Output>, ConnectError> {
        let path = self.machine.transition_path(mode)?;
        for (command, target_state) in path {
            debug!("{} mode command: {}", self.device_addr, command);
            let output = self.write(&command, timeout).await?;
            if !output.success || self.machine.current_state() != target_state {
                return Ok(Some(output));
            }
        }
        Ok(None)
    }

    /// Runs `command` in `mode`, switching modes first when needed.
    ///
    /// A failed mode switch is returned as an unsuccessful output.
    pub(crate) async fn write_with_mode(
        &mut self,
        command: &str,
        mode: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        if let Some(mut failed) = self.switch_mode(mode, timeout).await? {
            failed.success = false;
            return Ok(failed);
        }
        self.write(command, timeout).await
    }

    pub(crate) async fn close(&mut self) {
        self.recv.close();
        if self.is_connected()
            && let Err(e) = self.sender.send("exit\n".to_string()).await
        {
            debug!("{} Failed to send exit: {:?}", self.device_addr, e);
        }
        debug!("{} SSH session closed", self.device_addr);
    }
}
