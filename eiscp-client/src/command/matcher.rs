//! Resolution of received messages against the command registry.

use std::fmt;
use std::sync::Arc;

use log::debug;

use eiscp_protocol::Message;

use crate::command::registry::{CommandInfo, CommandRegistry, ValueSpec, ValueType};
use crate::error::MatchError;

/// A declared value matched against live data.
///
/// Built fresh for every resolution; the registry entry it came from is not
/// touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    /// Pattern of the declared value that matched.
    pub pattern: String,
    pub name: String,
    pub description: String,
    pub value_type: ValueType,
    /// Value as received.
    pub data: String,
}

impl ResolvedValue {
    fn new(spec: &ValueSpec, data: &str) -> Self {
        Self {
            pattern: spec.code.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            value_type: spec.value_type,
            data: data.to_string(),
        }
    }
}

impl fmt::Display for ResolvedValue {
    /// Raw data as-is, or hexadecimal data in decimal. Malformed hex renders
    /// as an empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type {
            ValueType::Raw => f.write_str(&self.data),
            ValueType::Hexadecimal => match i32::from_str_radix(&self.data, 16) {
                Ok(v) => write!(f, "{}", v),
                Err(_) => Ok(()),
            },
        }
    }
}

/// A message resolved to a known command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub command: &'a CommandInfo,
    /// `None` when the command is known but no declared value matched.
    pub value: Option<ResolvedValue>,
}

impl Resolution<'_> {
    /// Rendered value, empty when nothing matched.
    pub fn rendered_value(&self) -> String {
        self.value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }
}

impl fmt::Display for Resolution<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.command.code,
            self.command.name,
            self.command.zone,
            self.rendered_value(),
            self.value.as_ref().map(|v| v.name.as_str()).unwrap_or_default()
        )
    }
}

/// Maps messages to commands and values from a shared registry.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    registry: Arc<CommandRegistry>,
}

impl CommandMatcher {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Resolve a message.
    ///
    /// Declared values are tried in order and the first match wins. A known
    /// command with no matching value resolves with `value: None`.
    pub fn resolve(&self, message: &Message) -> Result<Resolution<'_>, MatchError> {
        let (command, matchers) = self
            .registry
            .lookup(message.code())
            .ok_or_else(|| MatchError::UnknownCommand(message.code().to_string()))?;

        let value = command
            .values
            .iter()
            .zip(matchers)
            .find(|(_, matcher)| matcher.is_match(message.value()))
            .map(|(spec, _)| ResolvedValue::new(spec, message.value()));

        match &value {
            Some(v) => debug!(
                "{} ({}): {:?} matched {} ({})",
                command.name,
                command.code,
                message.value(),
                v.name,
                v.pattern
            ),
            None => debug!(
                "{} ({}): {:?} matched no declared value",
                command.name,
                command.code,
                message.value()
            ),
        }

        Ok(Resolution { command, value })
    }
}
