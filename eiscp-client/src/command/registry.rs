//! Read-only table of known commands.
//!
//! The table is built once from a list of [`CommandInfo`] records (usually a
//! TOML catalogue) and never changes afterwards. Value patterns are compiled
//! up front so a bad catalogue is rejected at load time instead of at the
//! first message that reaches it.
//!
//! Catalogue format:
//!
//! ```toml
//! [[command]]
//! code = "PWR"
//! name = "system-power"
//! zone = "main"
//! description = "System Power Command"
//!
//! [[command.value]]
//! code = "00"
//! name = "standby"
//!
//! [[command.value]]
//! code = "01"
//! name = "on"
//! ```

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use eiscp_protocol::CODE_LEN;

use crate::error::RegistryError;

/// How a matched value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Shown as received.
    #[default]
    Raw,
    /// Hex-encoded integer, shown in decimal.
    Hexadecimal,
}

/// One declared value of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSpec {
    /// Pattern the whole value must match. A literal such as `01` matches
    /// only itself.
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub value_type: ValueType,
}

impl ValueSpec {
    pub fn raw(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: String::new(),
            value_type: ValueType::Raw,
        }
    }

    pub fn hexadecimal(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            value_type: ValueType::Hexadecimal,
            ..Self::raw(code, name)
        }
    }
}

/// A known command and its declared values, in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    pub code: String,
    pub name: String,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "value")]
    pub values: Vec<ValueSpec>,
}

fn default_zone() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    #[serde(default, rename = "command")]
    commands: Vec<CommandInfo>,
}

/// Parse a TOML catalogue into command records without validating them.
pub fn parse_catalogue(contents: &str) -> Result<Vec<CommandInfo>, RegistryError> {
    let catalogue: Catalogue = toml::from_str(contents)?;
    Ok(catalogue.commands)
}

#[derive(Debug)]
struct Entry {
    info: CommandInfo,
    /// One compiled pattern per entry of `info.values`.
    matchers: Vec<Regex>,
}

/// Immutable lookup table from command code to [`CommandInfo`].
#[derive(Debug, Default)]
pub struct CommandRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Build a registry, compiling every value pattern.
    pub fn new(commands: impl IntoIterator<Item = CommandInfo>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();

        for info in commands {
            if info.code.len() != CODE_LEN || !info.code.is_ascii() {
                return Err(RegistryError::InvalidCode(info.code));
            }
            if registry.index.contains_key(&info.code) {
                return Err(RegistryError::DuplicateCode(info.code));
            }

            let matchers = info
                .values
                .iter()
                .map(|value| {
                    Regex::new(&format!("^(?:{})$", value.code)).map_err(|source| {
                        RegistryError::InvalidPattern {
                            code: info.code.clone(),
                            pattern: value.code.clone(),
                            source,
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            registry
                .index
                .insert(info.code.clone(), registry.entries.len());
            registry.entries.push(Entry { info, matchers });
        }

        Ok(registry)
    }

    /// Build a registry from a TOML catalogue.
    pub fn from_toml_str(contents: &str) -> Result<Self, RegistryError> {
        Self::new(parse_catalogue(contents)?)
    }

    pub fn get(&self, code: &str) -> Option<&CommandInfo> {
        self.index.get(code).map(|&i| &self.entries[i].info)
    }

    /// Command and compiled value patterns, in declaration order.
    pub(crate) fn lookup(&self, code: &str) -> Option<(&CommandInfo, &[Regex])> {
        self.index.get(code).map(|&i| {
            let entry = &self.entries[i];
            (&entry.info, entry.matchers.as_slice())
        })
    }

    /// Commands in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandInfo> {
        self.entries.iter().map(|e| &e.info)
    }

    /// Commands sorted by code.
    pub fn sorted(&self) -> Vec<&CommandInfo> {
        let mut commands: Vec<_> = self.iter().collect();
        commands.sort_by(|a, b| a.code.cmp(&b.code));
        commands
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r#"
[[command]]
code = "PWR"
name = "system-power"
description = "System Power Command"

[[command.value]]
code = "00"
name = "standby"

[[command.value]]
code = "01"
name = "on"

[[command]]
code = "ZVL"
name = "volume"
zone = "zone2"

[[command.value]]
code = "[0-9A-F]{2}"
name = "level"
type = "hexadecimal"
"#;

    #[test]
    fn test_from_toml() {
        let registry = CommandRegistry::from_toml_str(CATALOGUE).unwrap();
        assert_eq!(registry.len(), 2);

        let pwr = registry.get("PWR").unwrap();
        assert_eq!(pwr.zone, "main");
        assert_eq!(pwr.values.len(), 2);
        assert_eq!(pwr.values[1].name, "on");
        assert_eq!(pwr.values[1].value_type, ValueType::Raw);

        let zvl = registry.get("ZVL").unwrap();
        assert_eq!(zvl.zone, "zone2");
        assert_eq!(zvl.values[0].value_type, ValueType::Hexadecimal);

        assert!(registry.get("XYZ").is_none());
    }

    #[test]
    fn test_iteration_order() {
        let registry = CommandRegistry::new(vec![
            CommandInfo {
                code: "SLI".to_string(),
                name: "input-selector".to_string(),
                zone: default_zone(),
                description: String::new(),
                values: vec![],
            },
            CommandInfo {
                code: "AMT".to_string(),
                name: "audio-muting".to_string(),
                zone: default_zone(),
                description: String::new(),
                values: vec![],
            },
        ])
        .unwrap();

        let registered: Vec<_> = registry.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(registered, ["SLI", "AMT"]);

        let sorted: Vec<_> = registry.sorted().iter().map(|c| c.code.as_str()).collect();
        assert_eq!(sorted, ["AMT", "SLI"]);
    }

    #[test]
    fn test_rejects_bad_catalogues() {
        let bad_pattern = CommandInfo {
            code: "MVL".to_string(),
            name: "volume".to_string(),
            zone: default_zone(),
            description: String::new(),
            values: vec![ValueSpec::raw("[0-9", "level")],
        };
        assert!(matches!(
            CommandRegistry::new(vec![bad_pattern]),
            Err(RegistryError::InvalidPattern { .. })
        ));

        let pwr = CommandInfo {
            code: "PWR".to_string(),
            name: "system-power".to_string(),
            zone: default_zone(),
            description: String::new(),
            values: vec![],
        };
        assert!(matches!(
            CommandRegistry::new(vec![pwr.clone(), pwr.clone()]),
            Err(RegistryError::DuplicateCode(code)) if code == "PWR"
        ));

        let long_code = CommandInfo {
            code: "POWER".to_string(),
            ..pwr
        };
        assert!(matches!(
            CommandRegistry::new(vec![long_code]),
            Err(RegistryError::InvalidCode(_))
        ));

        assert!(matches!(
            CommandRegistry::from_toml_str("[[command]]\ncode = 1"),
            Err(RegistryError::Parse(_))
        ));
    }
}
