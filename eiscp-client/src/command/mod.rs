//! Command catalogue lookup and message resolution.

pub mod matcher;
pub mod registry;

pub use matcher::{CommandMatcher, Resolution, ResolvedValue};
pub use registry::{parse_catalogue, CommandInfo, CommandRegistry, ValueSpec, ValueType};
