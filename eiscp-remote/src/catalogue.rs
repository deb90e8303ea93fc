//! Built-in command catalogue and user overrides.

use std::path::Path;

use log::{debug, info};

use eiscp_client::command::{parse_catalogue, CommandInfo, CommandRegistry};

const BUILTIN: &str = include_str!("commands.toml");

/// Build the registry from the built-in catalogue plus an optional user file.
///
/// A user command with the same code as a built-in one replaces it; new
/// codes are appended.
pub fn load_registry(extra: Option<&Path>) -> Result<CommandRegistry, Box<dyn std::error::Error>> {
    let mut commands = parse_catalogue(BUILTIN)?;
    debug!("Loaded {} built-in commands", commands.len());

    if let Some(path) = extra {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read command catalogue {}: {}", path.display(), e))?;
        let overrides = parse_catalogue(&contents)?;
        info!("Loaded {} commands from {}", overrides.len(), path.display());
        merge(&mut commands, overrides);
    }

    Ok(CommandRegistry::new(commands)?)
}

fn merge(commands: &mut Vec<CommandInfo>, overrides: Vec<CommandInfo>) {
    for command in overrides {
        match commands.iter_mut().find(|c| c.code == command.code) {
            Some(existing) => *existing = command,
            None => commands.push(command),
        }
    }
}
