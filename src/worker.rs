//! Per-device capture of the run's show commands.

use indexmap::IndexMap;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DutEntry;
use crate::dispatch::send_cmds;
use crate::driver::{DeviceConn, Encoding, result_text};

/// Output of one show command in both encodings.
///
/// An empty string marks an encoding the device did not produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCapture {
    pub json: Value,
    pub text: String,
}

impl Default for CommandCapture {
    fn default() -> Self {
        Self {
            json: Value::String(String::new()),
            text: String::new(),
        }
    }
}

impl CommandCapture {
    pub fn has_json(&self) -> bool {
        !matches!(&self.json, Value::String(s) if s.is_empty())
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }
}

/// A cabled link of the device, taken from the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NeighborInterface {
    pub hostname: String,
    pub interface_name: String,
    pub z_hostname: String,
    pub z_interface_name: String,
    pub media_type: String,
}

/// One device under test and everything captured from it.
///
/// Owned by exactly one task at a time; the connection is never shared.
pub struct DutRecord {
    pub entry: DutEntry,
    pub conn: Box<dyn DeviceConn>,
    /// Captures keyed by command, in command-list order.
    pub output: IndexMap<String, CommandCapture>,
    pub interface_list: Vec<NeighborInterface>,
}

impl DutRecord {
    pub fn new(entry: DutEntry, conn: Box<dyn DeviceConn>) -> Self {
        Self {
            entry,
            conn,
            output: IndexMap::new(),
            interface_list: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

impl std::fmt::Debug for DutRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DutRecord")
            .field("name", &self.entry.name)
            .field("mgmt_ip", &self.entry.mgmt_ip)
            .field("transport", &self.conn.transport())
            .field("commands", &self.output.len())
            .finish()
    }
}

/// Neighbor interfaces declared for `entry` in the inventory.
pub fn return_interfaces(entry: &DutEntry) -> Vec<NeighborInterface> {
    entry
        .neighbors
        .iter()
        .map(|link| NeighborInterface {
            hostname: entry.name.clone(),
            interface_name: link.port.clone(),
            z_hostname: link.neighbor_device.clone(),
            z_interface_name: link.neighbor_port.clone(),
            media_type: link.media_type.clone(),
        })
        .collect()
}

/// Captures every command of `show_cmds` on `dut` in JSON and in text.
///
/// The two encodings are dispatched separately, so a command dropped from
/// one batch can still be captured by the other. `dut.output` is replaced and
/// holds exactly one entry per command.
pub async fn dut_worker(dut: &mut DutRecord, show_cmds: &[String]) {
    let (json_outputs, json_cmds) = send_cmds(dut.conn.as_mut(), show_cmds, Encoding::Json).await;
    let (text_outputs, text_cmds) = send_cmds(dut.conn.as_mut(), show_cmds, Encoding::Text).await;

    let mut output = IndexMap::with_capacity(show_cmds.len());
    for cmd in show_cmds {
        let mut capture = CommandCapture::default();
        if let Some(json) = json_cmds
            .iter()
            .position(|c| c == cmd)
            .and_then(|i| json_outputs.get(i))
        {
            capture.json = json.clone();
        }
        if let Some(text) = text_cmds
            .iter()
            .position(|c| c == cmd)
            .and_then(|i| text_outputs.get(i))
        {
            capture.text = result_text(text).to_string();
        }
        output.insert(cmd.clone(), capture);
    }

    debug!(
        "{}: captured {} json / {} text of {} command(s)",
        dut.name(),
        json_cmds.len(),
        text_cmds.len(),
        show_cmds.len()
    );
    dut.output = output;
    dut.interface_list = return_interfaces(&dut.entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NeighborLink, Secret};

    #[test]
    fn interfaces_follow_declared_links() {
        let entry = DutEntry {
            name: "leaf1".to_string(),
            mgmt_ip: "192.0.2.10".to_string(),
            username: "admin".to_string(),
            password: Secret::new("admin"),
            enable_password: None,
            role: "leaf".to_string(),
            transport: None,
            neighbors: vec![NeighborLink {
                neighbor_device: "spine1".to_string(),
                neighbor_port: "Ethernet1".to_string(),
                port: "Ethernet49/1".to_string(),
                media_type: "100GBASE-SR4".to_string(),
            }],
        };
        let list = return_interfaces(&entry);
        assert_eq!(
            list,
            vec![NeighborInterface {
                hostname: "leaf1".to_string(),
                interface_name: "Ethernet49/1".to_string(),
                z_hostname: "spine1".to_string(),
                z_interface_name: "Ethernet1".to_string(),
                media_type: "100GBASE-SR4".to_string(),
            }]
        );
    }

    #[test]
    fn default_capture_is_empty_in_both_encodings() {
        let capture = CommandCapture::default();
        assert!(!capture.has_json());
        assert!(!capture.has_text());
        assert_eq!(capture.json, Value::String(String::new()));
    }
}
