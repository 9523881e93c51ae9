//! Built-in CLI templates.
//!
//! Only Arista EOS is shipped: its prompts, pager, error lines and mode
//! transitions, plus the fixed set of error strings that mark a command as
//! rejected when it is sent over an interactive shell.

use crate::device::{InputResponse, InputState, ModeTransition, PromptState, PromptTemplate};

/// Runtime parameter name holding the enable password.
pub const ENABLE_PASSWORD_PARAM: &str = "EnablePassword";

/// Substrings that mark an EOS command as rejected.
///
/// `% This is an unconverted command` is what EOS prints for `| json` on a
/// command that has no structured model.
pub const EOS_CLI_ERRORS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unavailable command",
    "% This is an unconverted command",
    "% Cannot",
];

/// Returns the first known CLI error contained in `output`, as a short reason.
pub fn match_cli_error(output: &str) -> Option<String> {
    EOS_CLI_ERRORS.iter().find_map(|marker| {
        output.find(marker).map(|pos| {
            output[pos..]
                .lines()
                .next()
                .unwrap_or(marker)
                .trim_start_matches('%')
                .trim()
                .to_string()
        })
    })
}

/// ASCII hostname as EOS prints it in a prompt.
const HOSTNAME: &str = r"[A-Za-z0-9_.\-@/:]+";

fn prompt(state: &str, pattern: &str) -> PromptState {
    PromptState {
        state: state.to_string(),
        patterns: vec![pattern.to_string()],
    }
}

fn edge(from: &str, command: &str, to: &str) -> ModeTransition {
    ModeTransition {
        from: from.to_string(),
        command: command.to_string(),
        to: to.to_string(),
    }
}

/// Template for Arista EOS.
///
/// ```text
/// switch>                  login
/// switch#                  enable
/// switch(config)#          config
/// switch(config-if-Et1)#   config
/// ```
pub fn eos() -> PromptTemplate {
    PromptTemplate {
        name: "arista_eos".to_string(),
        // Config first: `switch(config)#` would also match the enable prompt.
        prompts: vec![
            prompt("Config", &format!(r"^{HOSTNAME}\(config[A-Za-z0-9_.\-@/:+]*\)#\s*$")),
            prompt("Enable", &format!(r"^{HOSTNAME}#\s*$")),
            prompt("Login", &format!(r"^{HOSTNAME}>\s*$")),
        ],
        inputs: vec![InputState {
            state: "EnablePassword".to_string(),
            patterns: vec![r"^\x00*\r?Password:\s*$".to_string()],
            response: InputResponse::Param(ENABLE_PASSWORD_PARAM.to_string()),
        }],
        more_patterns: vec![r"^\s*--More--\s*$".to_string()],
        error_patterns: vec![r"^% .+$".to_string()],
        transitions: vec![
            edge("Login", "enable", "Enable"),
            edge("Enable", "configure terminal", "Config"),
            edge("Config", "end", "Enable"),
            edge("Enable", "disable", "Login"),
        ],
    }
}
