//! Batch execution with error-driven shrinking.
//!
//! Command support differs between EOS releases and platforms. A batch that
//! fails because of one unsupported command is retried without that command
//! until it succeeds or nothing is left.

use log::{debug, info, warn};
use serde_json::Value;

use crate::driver::{DeviceConn, Encoding};

/// Removes from `cmds` the longest command named in `error` and returns it.
///
/// Commands are scanned in list order and a candidate replaces the current
/// pick when it is at least as long, so among equally long matches the last
/// one wins. Returns `None`, leaving `cmds` untouched, when no command occurs
/// in the error text.
pub fn remove_cmd(error: &str, cmds: &mut Vec<String>) -> Option<String> {
    let mut pick: Option<usize> = None;
    for (index, cmd) in cmds.iter().enumerate() {
        if !error.contains(cmd.as_str()) {
            continue;
        }
        match pick {
            Some(current) if cmd.len() < cmds[current].len() => {}
            _ => pick = Some(index),
        }
    }
    pick.map(|index| cmds.remove(index))
}

/// Runs `cmds` on `conn`, dropping one failing command per round.
///
/// Returns the outputs and the commands that produced them, index-aligned.
/// Never fails: an error that names none of the remaining commands ends the
/// loop with an empty result.
pub async fn send_cmds(
    conn: &mut dyn DeviceConn,
    cmds: &[String],
    encoding: Encoding,
) -> (Vec<Value>, Vec<String>) {
    let mut remaining = cmds.to_vec();
    loop {
        if remaining.is_empty() {
            return (Vec::new(), remaining);
        }
        debug!(
            "{}: sending {} command(s) as {}",
            conn.name(),
            remaining.len(),
            encoding.as_str()
        );
        match conn.run_commands(&remaining, encoding).await {
            Ok(outputs) => return (outputs, remaining),
            Err(err) => {
                let text = err.to_string();
                match remove_cmd(&text, &mut remaining) {
                    Some(dropped) => {
                        info!(
                            "{}: dropping '{}' from {} batch: {}",
                            conn.name(),
                            dropped,
                            encoding.as_str(),
                            text
                        );
                    }
                    None => {
                        warn!(
                            "{}: {} batch failed and no command can be dropped: {}",
                            conn.name(),
                            encoding.as_str(),
                            text
                        );
                        return (Vec::new(), Vec::new());
                    }
                }
            }
        }
    }
}
