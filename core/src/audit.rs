use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::warn;

/// Append-only, line-formatted event log. Auditing never fails the
/// pipeline; write errors degrade to a logged warning.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(dir: &Path) -> AuditLog {
        AuditLog {
            path: dir.join("audit.log"),
        }
    }

    /// `[timestamp] KIND | key=value key=value`
    pub fn append(&self, kind: &str, fields: &[(&str, String)]) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut line = format!("[{timestamp}] {kind}");
        if !fields.is_empty() {
            line.push_str(" |");
            for (key, value) in fields {
                line.push_str(&format!(" {key}={value}"));
            }
        }
        line.push('\n');

        if let Err(err) = self.write_line(&line) {
            warn!("audit log write failed: {err}");
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
