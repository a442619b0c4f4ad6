//! Regex extraction of values from command output

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shell_criteria::ValueStore;

use crate::error::{Error, Result};
use crate::transport::strip_control_sequences;

/// Copy the first capture group of `reg_expr` into `key`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Extract {
    /// Expression with at least one capture group
    pub reg_expr: String,
    /// Dotted destination key
    pub key: String,
    /// Remove the key before matching
    #[serde(default)]
    pub reset: bool,
    /// Fail when nothing was extracted
    #[serde(default)]
    pub required: bool,
}

impl Extract {
    /// Rule writing the first capture of `reg_expr` to `key`
    pub fn new(reg_expr: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            reg_expr: reg_expr.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    /// Clear the key before each pass
    pub fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Fail when the key is absent afterwards
    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Apply rules to output lines, writing to both the store and the flat map
pub fn extract(
    rules: &[Extract],
    lines: &[&str],
    state: &mut ValueStore,
    extracted: &mut Map<String, Value>,
) -> Result<()> {
    for rule in rules {
        if rule.reset {
            extracted.remove(&rule.key);
            state.remove(&rule.key);
        }
        let expression = Regex::new(&rule.reg_expr).map_err(|source| Error::InvalidRegex {
            expression: rule.reg_expr.clone(),
            source,
        })?;
        if expression.captures_len() < 2 {
            return Err(Error::configuration(format!(
                "extraction regex '{}' for key '{}' has no capture group",
                rule.reg_expr, rule.key
            )));
        }

        for line in lines.iter().filter(|line| !line.trim().is_empty()) {
            let Some(value) = first_capture(&expression, line)
                .or_else(|| first_capture(&expression, &strip_control_sequences(line)))
            else {
                continue;
            };
            extracted.insert(rule.key.clone(), Value::String(value.clone()));
            state.set(&rule.key, Value::String(value));
        }

        if rule.required && !extracted.contains_key(&rule.key) && !state.contains(&rule.key) {
            return Err(Error::MissingExtraction {
                key: rule.key.clone(),
                expression: rule.reg_expr.clone(),
            });
        }
    }
    Ok(())
}

fn first_capture(expression: &Regex, line: &str) -> Option<String> {
    expression
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_status() {
        let rules = [Extract::new(r#""testStatus":"([^"]+)""#, "status")];
        let mut state = ValueStore::new();
        let mut extracted = Map::new();
        extract(&rules, &[r#"{"testStatus":"done"}"#], &mut state, &mut extracted).unwrap();
        assert_eq!(extracted["status"], "done");
        assert_eq!(state.get("status"), Some(&json!("done")));
    }

    #[test]
    fn test_reset_leaves_no_stale_value() {
        let rules = [Extract::new(r"build (\d+)", "build.id").with_reset()];
        let mut state = ValueStore::new();
        let mut extracted = Map::new();

        extract(&rules, &["build 41"], &mut state, &mut extracted).unwrap();
        assert_eq!(state.get("build.id"), Some(&json!("41")));

        extract(&rules, &["no build here"], &mut state, &mut extracted).unwrap();
        assert!(!extracted.contains_key("build.id"));
        assert!(!state.contains("build.id"));
    }

    #[test]
    fn test_later_lines_win_and_colors_are_stripped() {
        let rules = [Extract::new(r"^version: (\S+)$", "version")];
        let mut state = ValueStore::new();
        let mut extracted = Map::new();
        let lines = ["version: 1.0", "", "\x1b[32mversion: 1.1\x1b[0m"];
        extract(&rules, &lines, &mut state, &mut extracted).unwrap();
        assert_eq!(extracted["version"], "1.1");
    }

    #[test]
    fn test_required_and_invalid_rules() {
        let mut state = ValueStore::new();
        let mut extracted = Map::new();

        let required = [Extract::new(r"pid=(\d+)", "pid").with_required()];
        let err = extract(&required, &["nothing"], &mut state, &mut extracted).unwrap_err();
        assert!(matches!(err, Error::MissingExtraction { ref key, .. } if key == "pid"));

        let invalid = [Extract::new(r"(unclosed", "x")];
        let err = extract(&invalid, &["x"], &mut state, &mut extracted).unwrap_err();
        assert!(matches!(err, Error::InvalidRegex { .. }));

        let no_group = [Extract::new(r"pid=\d+", "pid")];
        let err = extract(&no_group, &["pid=42"], &mut state, &mut extracted).unwrap_err();
        assert!(matches!(err, Error::Configuration { ref reason } if reason.contains("no capture group")));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert!(!state.contains("pid"));
    }
}
