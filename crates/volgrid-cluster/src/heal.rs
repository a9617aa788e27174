//! Heal reporting seam.
//!
//! Per-brick heal counts come from an external helper binary that emits
//! an XML report. The trait hides the helper invocation; the parser
//! turns its output into the JSON shape served by the REST surface.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use volgrid_core::{Error, Result};

/// Per-brick heal counters, as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealBrickEntry {
    /// ID of the node hosting the brick.
    #[serde(rename = "hostId")]
    pub host_id: String,
    /// Brick identifier, `host:path`.
    pub name: String,
    /// Connection status reported by the helper.
    pub status: String,
    /// Total entries needing attention.
    #[serde(rename = "totalNumberOfEntries")]
    pub total_entries: u64,
    /// Entries waiting to be healed.
    #[serde(rename = "numberOfEntriesInHealPending")]
    pub entries_in_heal_pending: u64,
    /// Entries in split brain.
    #[serde(rename = "numberOfEntriesInSplitBrain")]
    pub entries_in_split_brain: u64,
    /// Entries currently being healed.
    #[serde(rename = "numberOfEntriesPossiblyHealing")]
    pub entries_possibly_healing: u64,
}

// XML shape emitted by the heal helper.

#[derive(Debug, Deserialize)]
struct CliOutput {
    #[serde(rename = "healInfo")]
    heal_info: HealInfoXml,
}

#[derive(Debug, Deserialize)]
struct HealInfoXml {
    bricks: BricksXml,
}

#[derive(Debug, Deserialize, Default)]
struct BricksXml {
    #[serde(rename = "brick", default)]
    bricks: Vec<BrickXml>,
}

#[derive(Debug, Deserialize)]
struct BrickXml {
    #[serde(rename = "@hostUuid")]
    host_uuid: String,
    name: String,
    status: String,
    #[serde(rename = "totalNumberOfEntries", default)]
    total_entries: u64,
    #[serde(rename = "numberOfEntriesInHealPending", default)]
    entries_in_heal_pending: u64,
    #[serde(rename = "numberOfEntriesInSplitBrain", default)]
    entries_in_split_brain: u64,
    #[serde(rename = "numberOfEntriesPossiblyHealing", default)]
    entries_possibly_healing: u64,
}

/// Parses the helper's XML report into per-brick entries.
pub fn parse_heal_info(xml: &str) -> Result<Vec<HealBrickEntry>> {
    let parsed: CliOutput = quick_xml::de::from_str(xml)
        .map_err(|e| Error::internal(format!("malformed heal report: {e}")))?;
    Ok(parsed
        .heal_info
        .bricks
        .bricks
        .into_iter()
        .map(|b| HealBrickEntry {
            host_id: b.host_uuid,
            name: b.name,
            status: b.status,
            total_entries: b.total_entries,
            entries_in_heal_pending: b.entries_in_heal_pending,
            entries_in_split_brain: b.entries_in_split_brain,
            entries_possibly_healing: b.entries_possibly_healing,
        })
        .collect())
}

/// Runs the heal helper for a volume.
#[async_trait]
pub trait HealReporter: Send + Sync + 'static {
    /// Invokes the helper with `volname` and `args`, returning its raw
    /// output.
    async fn run(&self, volname: &str, args: &[String]) -> Result<String>;
}

/// Reporter that shells out to the heal helper binary.
pub struct CommandHealReporter {
    binary: PathBuf,
}

impl CommandHealReporter {
    /// Creates a reporter invoking `binary`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl HealReporter for CommandHealReporter {
    async fn run(&self, volname: &str, args: &[String]) -> Result<String> {
        debug!(volume = %volname, ?args, helper = %self.binary.display(), "running heal helper");
        let output = tokio::process::Command::new(&self.binary)
            .arg(volname)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                Error::internal(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            return Err(Error::internal(format!(
                "heal helper exited with {}",
                output.status
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| Error::internal(format!("heal helper emitted invalid UTF-8: {e}")))
    }
}

/// Reporter returning a fixed payload. Test double.
pub struct StaticHealReporter {
    output: String,
}

impl StaticHealReporter {
    /// Creates a reporter that always returns `output`.
    #[must_use]
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }
}

#[async_trait]
impl HealReporter for StaticHealReporter {
    async fn run(&self, _volname: &str, _args: &[String]) -> Result<String> {
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cliOutput>
  <healInfo>
    <bricks>
      <brick hostUuid="5d5f6f7a-0000-0000-0000-000000000001">
        <name>host-1:/export/v/b0</name>
        <status>Connected</status>
        <totalNumberOfEntries>3</totalNumberOfEntries>
        <numberOfEntriesInHealPending>2</numberOfEntriesInHealPending>
        <numberOfEntriesInSplitBrain>1</numberOfEntriesInSplitBrain>
        <numberOfEntriesPossiblyHealing>0</numberOfEntriesPossiblyHealing>
      </brick>
      <brick hostUuid="5d5f6f7a-0000-0000-0000-000000000002">
        <name>host-2:/export/v/b1</name>
        <status>Connected</status>
        <totalNumberOfEntries>0</totalNumberOfEntries>
      </brick>
    </bricks>
  </healInfo>
</cliOutput>"#;

    #[test]
    fn test_parse_heal_info() {
        let entries = parse_heal_info(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "host-1:/export/v/b0");
        assert_eq!(entries[0].total_entries, 3);
        assert_eq!(entries[0].entries_in_split_brain, 1);
        assert_eq!(entries[1].total_entries, 0);
        assert_eq!(entries[1].status, "Connected");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_heal_info("<not-heal-output/>").is_err());
        assert!(parse_heal_info("definitely not xml").is_err());
    }

    #[tokio::test]
    async fn test_static_reporter_round_trip() {
        let reporter = StaticHealReporter::new(SAMPLE);
        let raw = reporter.run("v", &[]).await.unwrap();
        let entries = parse_heal_info(&raw).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_entry_json_field_names() {
        let entry = HealBrickEntry {
            host_id: "x".to_string(),
            name: "h:/b".to_string(),
            status: "Connected".to_string(),
            total_entries: 1,
            entries_in_heal_pending: 1,
            entries_in_split_brain: 0,
            entries_possibly_healing: 0,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("hostId").is_some());
        assert!(json.get("totalNumberOfEntries").is_some());
    }
}
