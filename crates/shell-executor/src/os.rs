//! Remote operating system detection

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::transport::Shell;

/// Release probes, tried in order until one is available on the host
pub const RELEASE_PROBES: [&str; 3] = ["sw_vers", "lsb_release -a", "cat /etc/os-release"];

/// Ordered, de-duplicated list of PATH entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemPath {
    items: Vec<String>,
}

impl SystemPath {
    /// Split a `:` separated PATH value
    pub fn parse(value: &str) -> Self {
        let mut path = Self::default();
        for item in value.trim().split(':') {
            path.push(item);
        }
        path
    }

    /// Append an entry unless it is empty or already present
    pub fn push(&mut self, item: impl AsRef<str>) -> bool {
        let item = item.as_ref().trim();
        if item.is_empty() || self.items.iter().any(|existing| existing == item) {
            return false;
        }
        self.items.push(item.to_string());
        true
    }

    /// Entries in order
    pub fn items(&self) -> &[String] {
        &self.items
    }

    /// Value suitable for `export PATH=...`
    pub fn env_value(&self) -> String {
        self.items.join(":")
    }
}

/// Profile of the remote host a session is connected to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingSystem {
    /// Kernel name from `uname -s`, lowercased
    pub system: String,
    /// Distribution or product name
    pub name: String,
    /// Distribution or product version
    pub version: String,
    /// Machine hardware from `uname -m`
    pub hardware: String,
    /// Normalized architecture (`amd64`, `arm64`, ...)
    pub architecture: String,
    /// Login user
    pub user: String,
    /// Working PATH
    pub path: SystemPath,
}

impl OperatingSystem {
    /// Probe the remote host through the shell
    pub async fn detect(shell: &mut dyn Shell, timeout: Option<Duration>) -> Result<Self> {
        let mut os = Self::default();
        for probe in RELEASE_PROBES {
            let output = shell.run(probe, timeout, &[]).await?;
            if is_unavailable(&output) {
                continue;
            }
            os.apply_release(&output);
            break;
        }

        os.system = first_line(&shell.run("uname -s", timeout, &[]).await?).to_lowercase();
        os.set_hardware(first_line(&shell.run("uname -m", timeout, &[]).await?));

        let output = shell.run("echo $PATH", timeout, &[]).await?;
        if let Some(line) = output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with('/') && (line.contains(':') || !line.contains(' ')))
        {
            os.path = SystemPath::parse(line);
        }

        os.user = first_line(&shell.run("echo $USER", timeout, &[]).await?).to_string();

        debug!(
            system = %os.system,
            name = %os.name,
            version = %os.version,
            architecture = %os.architecture,
            "detected operating system"
        );
        Ok(os)
    }

    /// Apply `key: value` or `key=value` release lines
    pub fn apply_release(&mut self, output: &str) {
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
                continue;
            };
            let key: String = key
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '_')
                .collect::<String>()
                .to_lowercase();
            let value = value.trim().trim_matches('"');
            let slot = match key.as_str() {
                "productname" | "distributorid" | "id" => &mut self.name,
                "productversion" | "release" | "versionid" => &mut self.version,
                _ => continue,
            };
            if slot.is_empty() {
                *slot = value.to_string();
            }
        }
    }

    fn set_hardware(&mut self, hardware: &str) {
        self.hardware = hardware.to_string();
        self.architecture = match hardware {
            "x86_64" | "amd64" => "amd64".to_string(),
            "aarch64" | "arm64" => "arm64".to_string(),
            other => other.to_string(),
        };
    }
}

fn is_unavailable(output: &str) -> bool {
    let output = output.to_lowercase();
    output.trim().is_empty()
        || output.contains("not found")
        || output.contains("no such file or directory")
}

fn first_line(output: &str) -> &str {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
}
